//! Structured errors and their wire codec
//!
//! A structured error travels through the VM as the payload of a
//! `dev/kopi/BridgeException`. The bridge never looks inside the payload
//! bytes itself; it hands them to an [`ErrorCodec`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A machine-readable error that survives the VM boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable, dotted error code (`"vm.exception"`, `"bridge.lookup"`, ...)
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional context
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl StructuredError {
    /// Error with no details
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    /// Add a detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Encodes structured errors to bytes and back
pub trait ErrorCodec: Send + Sync {
    /// Serialize an error
    fn encode(&self, error: &StructuredError) -> Result<Vec<u8>, String>;

    /// Deserialize an error
    fn decode(&self, bytes: &[u8]) -> Result<StructuredError, String>;
}

/// JSON codec (the default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ErrorCodec for JsonCodec {
    fn encode(&self, error: &StructuredError) -> Result<Vec<u8>, String> {
        serde_json::to_vec(error).map_err(|e| e.to_string())
    }

    fn decode(&self, bytes: &[u8]) -> Result<StructuredError, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_codec() {
        let error = StructuredError::new("io.denied", "permission denied").with_detail("path", "/etc/shadow");
        let bytes = JsonCodec.encode(&error).unwrap();
        assert_eq!(JsonCodec.decode(&bytes).unwrap(), error);
    }

    #[test]
    fn test_details_are_optional_on_the_wire() {
        let error = JsonCodec
            .decode(br#"{"code":"x.y","message":"m"}"#)
            .unwrap();
        assert!(error.details.is_empty());
        assert_eq!(error.to_string(), "[x.y] m");
        assert!(JsonCodec.decode(b"not json").is_err());
    }
}
