//! HTTP client for peer operations endpoints.

use super::exposition::MetricsDocument;
use super::ledger::{TransactionSelector, blockchain_height, transaction_count};
use crate::config::MetricsConfig;
use crate::consistency::PeerMetricSnapshot;
use crate::error::{ConfigError, MetricsError, ParseError};
use crate::topology::PeerEndpoint;
use tracing::debug;

/// Fetches ledger counters from a peer's `/metrics` endpoint.
///
/// Each call issues exactly one request. Failures are returned to the
/// caller as-is; there is no retry.
#[derive(Debug, Clone)]
pub struct MetricsClient {
    http: reqwest::Client,
    transaction_type: String,
    validation_code: String,
    max_body_bytes: usize,
}

impl MetricsClient {
    pub fn new(config: &MetricsConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            transaction_type: config.transaction_type.clone(),
            validation_code: config.validation_code.clone(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// `GET {base}/metrics`, tolerating a trailing slash on the base URL.
    #[must_use]
    pub fn metrics_url(base_url: &str) -> String {
        format!("{}/metrics", base_url.trim_end_matches('/'))
    }

    /// Fetch and parse the ledger height and transaction count of
    /// `channel` as seen by `peer`.
    pub async fn fetch(
        &self,
        peer: &PeerEndpoint,
        channel: &str,
        chaincode_id: &str,
    ) -> Result<PeerMetricSnapshot, MetricsError> {
        let url = Self::metrics_url(&peer.metrics_url);
        debug!(peer = %peer.name, %url, "Fetching peer metrics");

        let mut response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MetricsError::transport(&url, e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(MetricsError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let limit = self.max_body_bytes;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(MetricsError::BodyTooLarge { url, limit });
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| MetricsError::transport(&url, e))?
        {
            if bytes.len() + chunk.len() > limit {
                return Err(MetricsError::BodyTooLarge { url, limit });
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes);

        self.snapshot_from_body(&peer.name, &body, channel, chaincode_id)
            .map_err(|source| MetricsError::Parse { url, source })
    }

    /// Extract a snapshot from an already-fetched metrics document.
    pub fn snapshot_from_body(
        &self,
        peer: &str,
        body: &str,
        channel: &str,
        chaincode_id: &str,
    ) -> Result<PeerMetricSnapshot, ParseError> {
        let doc = MetricsDocument::parse(body)?;
        let selector = TransactionSelector {
            chaincode_id,
            channel,
            transaction_type: self.transaction_type.as_str(),
            validation_code: self.validation_code.as_str(),
        };

        Ok(PeerMetricSnapshot::new(
            peer,
            blockchain_height(&doc, channel)?,
            transaction_count(&doc, &selector)?,
        ))
    }
}
