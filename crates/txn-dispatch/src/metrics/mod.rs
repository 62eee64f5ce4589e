//! Peer metrics collection.
//!
//! Peers expose ledger counters on their operations endpoint in the
//! plaintext exposition format. This module fetches that document,
//! tokenizes it, and extracts the two counters used for consistency
//! checks:
//!
//! - `ledger_blockchain_height{channel}`
//! - `ledger_transaction_count{chaincode,channel,transaction_type,validation_code}`

mod client;
mod exposition;
mod ledger;

pub use client::MetricsClient;
pub use exposition::{MetricsDocument, Sample};
pub use ledger::{
    BLOCKCHAIN_HEIGHT, DEFAULT_TRANSACTION_TYPE, DEFAULT_VALIDATION_CODE, TRANSACTION_COUNT,
    TransactionSelector, blockchain_height, transaction_count,
};
