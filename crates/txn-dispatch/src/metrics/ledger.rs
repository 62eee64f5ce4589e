//! Ledger counters exported by peers.

use super::exposition::MetricsDocument;
use crate::error::ParseError;

/// Gauge of committed blocks per channel.
pub const BLOCKCHAIN_HEIGHT: &str = "ledger_blockchain_height";
/// Counter of committed transactions per channel, chaincode, type and
/// validation result.
pub const TRANSACTION_COUNT: &str = "ledger_transaction_count";

pub const DEFAULT_TRANSACTION_TYPE: &str = "ENDORSER_TRANSACTION";
pub const DEFAULT_VALIDATION_CODE: &str = "VALID";

/// Label constraints identifying the transaction counter of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSelector<'a> {
    /// Matched against the `chaincode` label as `<id>` or `<id>:<version>`.
    pub chaincode_id: &'a str,
    pub channel: &'a str,
    pub transaction_type: &'a str,
    pub validation_code: &'a str,
}

impl<'a> TransactionSelector<'a> {
    #[must_use]
    pub fn new(chaincode_id: &'a str, channel: &'a str) -> Self {
        Self {
            chaincode_id,
            channel,
            transaction_type: DEFAULT_TRANSACTION_TYPE,
            validation_code: DEFAULT_VALIDATION_CODE,
        }
    }

    fn describe(&self) -> String {
        format!(
            "chaincode=\"{}:*\",channel=\"{}\",transaction_type=\"{}\",validation_code=\"{}\"",
            self.chaincode_id, self.channel, self.transaction_type, self.validation_code
        )
    }
}

fn chaincode_matches(label: &str, chaincode_id: &str) -> bool {
    label
        .strip_prefix(chaincode_id)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
}

/// Block height of `channel`.
pub fn blockchain_height(doc: &MetricsDocument, channel: &str) -> Result<u64, ParseError> {
    doc.samples_named(BLOCKCHAIN_HEIGHT)
        .find(|s| s.label("channel") == Some(channel))
        .ok_or_else(|| ParseError::MissingMetric {
            metric: BLOCKCHAIN_HEIGHT.to_string(),
            selector: format!("channel=\"{channel}\""),
        })?
        .integer_value()
}

/// Valid transaction count for the selected chaincode.
///
/// When several chaincode versions match (e.g. after an upgrade) their
/// counts are summed. No matching sample at all is an error, not zero.
pub fn transaction_count(
    doc: &MetricsDocument,
    selector: &TransactionSelector<'_>,
) -> Result<u64, ParseError> {
    let mut matched = false;
    let mut total: u64 = 0;

    for sample in doc.samples_named(TRANSACTION_COUNT).filter(|s| {
        s.label("chaincode")
            .is_some_and(|cc| chaincode_matches(cc, selector.chaincode_id))
            && s.label("channel") == Some(selector.channel)
            && s.label("transaction_type") == Some(selector.transaction_type)
            && s.label("validation_code") == Some(selector.validation_code)
    }) {
        matched = true;
        total = total
            .checked_add(sample.integer_value()?)
            .ok_or_else(|| ParseError::InvalidValue {
                metric: TRANSACTION_COUNT.to_string(),
                value: sample.value.clone(),
            })?;
    }

    if !matched {
        return Err(ParseError::MissingMetric {
            metric: TRANSACTION_COUNT.to_string(),
            selector: selector.describe(),
        });
    }
    Ok(total)
}
