//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering request decoding and parameter extraction.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// A positional parameter was absent.
    #[error("missing parameter at index {index}")]
    MissingParam {
        /// Position of the missing parameter.
        index: usize,
    },

    /// A parameter was present but had the wrong JSON type.
    #[error("parameter {index} must be {expected}")]
    InvalidParam {
        /// Position of the offending parameter.
        index: usize,
        /// Human readable name of the expected type.
        expected: &'static str,
    },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_param_display() {
        let err = ProtocolError::MissingParam { index: 2 };
        assert_eq!(err.to_string(), "missing parameter at index 2");
    }

    #[test]
    fn test_invalid_param_display() {
        let err = ProtocolError::InvalidParam {
            index: 0,
            expected: "a string",
        };
        assert_eq!(err.to_string(), "parameter 0 must be a string");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ProtocolError = json_err.into();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }
}
