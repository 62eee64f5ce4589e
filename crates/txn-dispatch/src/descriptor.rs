//! Workload descriptors.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// One unit of work handed to the external worker.
///
/// Descriptors are produced by whatever builds the workload and are only
/// ever read by the dispatcher. `payload` is opaque here: when present it is
/// the worker's entire input document, forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDescriptor {
    pub channel: String,
    pub chaincode_id: String,
    pub organizations: Vec<String>,
    pub connection_profile: PathBuf,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl WorkloadDescriptor {
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        chaincode_id: impl Into<String>,
        organizations: Vec<String>,
        connection_profile: impl Into<PathBuf>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chaincode_id: chaincode_id.into(),
            organizations,
            connection_profile: connection_profile.into(),
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Single-line JSON passed to the worker as one argument.
    ///
    /// The payload is the top-level document. A descriptor without a payload
    /// serializes its own fields instead.
    pub fn to_worker_json(&self) -> Result<String, serde_json::Error> {
        if self.payload.is_null() {
            serde_json::to_string(self)
        } else {
            serde_json::to_string(&self.payload)
        }
    }
}

/// Load a JSON array of descriptors.
pub fn load_descriptors(path: &Path) -> Result<Vec<WorkloadDescriptor>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_worker_json_is_payload_document() {
        let descriptor = WorkloadDescriptor::new(
            "mychannel",
            "samplecc",
            vec!["org1".into(), "org2".into()],
            "/profiles",
        )
        .with_payload(json!({
            "transMode": "constant",
            "nRequest": "100",
            "channelOpt": {"name": "mychannel", "orgName": ["org1", "org2"]}
        }));

        let json = descriptor.to_worker_json().unwrap();
        assert!(!json.contains('\n'));

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["channelOpt"]["name"], "mychannel");
        assert_eq!(value["channelOpt"]["orgName"], json!(["org1", "org2"]));
        assert_eq!(value["transMode"], "constant");
        assert!(value.get("payload").is_none());
        assert!(value.get("chaincodeId").is_none());
    }

    #[test]
    fn test_worker_json_without_payload_is_descriptor() {
        let descriptor = WorkloadDescriptor::new("ch", "cc", vec!["org1".into()], "p.yaml");
        let value: Value = serde_json::from_str(&descriptor.to_worker_json().unwrap()).unwrap();
        assert_eq!(value["channel"], "ch");
        assert_eq!(value["chaincodeId"], "cc");
        assert_eq!(value["organizations"], json!(["org1"]));
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_load_descriptors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"channel": "mychannel", "chaincodeId": "samplecc",
                  "organizations": ["org1"], "connectionProfile": "/profiles"}},
                {{"channel": "otherchannel", "chaincodeId": "samplecc",
                  "organizations": ["org2"], "connectionProfile": "/profiles",
                  "payload": {{"invokeType": "Query"}}}}
            ]"#
        )
        .unwrap();

        let descriptors = load_descriptors(file.path()).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[1].channel, "otherchannel");
        assert_eq!(descriptors[1].payload["invokeType"], "Query");
        assert!(descriptors[0].payload.is_null());
    }

    #[test]
    fn test_load_descriptors_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();
        let err = load_descriptors(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
