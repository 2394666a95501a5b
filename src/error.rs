//! Error types for edgelens.

use crate::escalation::CloudError;

/// Result type alias for edgelens operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for edgelens.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration directory could not be determined.
    #[error("could not determine configuration directory for this platform")]
    ConfigDirNotFound,

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}'")]
    ConfigRead {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("failed to parse config file '{path}'")]
    ConfigParse {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// Failed to write configuration file.
    #[error("failed to write config file '{path}'")]
    ConfigWrite {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize configuration.
    #[error("failed to serialize config")]
    ConfigSerialize {
        /// Underlying serialization error.
        #[source]
        source: toml::ser::Error,
    },

    /// Detector is not present in the configuration source.
    #[error("detector '{detector_id}' is not configured on this node")]
    DetectorNotFound {
        /// Requested detector.
        detector_id: String,
    },

    /// Detector configuration was rejected at load time.
    #[error("detector '{detector_id}' has an invalid configuration: {reason}")]
    ConfigInvalid {
        /// Rejected detector.
        detector_id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Model pair could not be fetched or loaded.
    #[error("models for detector '{detector_id}' are unavailable: {reason}")]
    ModelUnavailable {
        /// Detector whose models are missing.
        detector_id: String,
        /// Why the fetch or load failed.
        reason: String,
    },

    /// Local inference cannot be served right now.
    #[error("inference unavailable: {reason}")]
    ServiceUnavailable {
        /// Description of the condition.
        reason: String,
    },

    /// Model invocation failed.
    #[error("inference failed: {reason}")]
    InferenceExecution {
        /// Description of the inference failure.
        reason: String,
    },

    /// Cloud service could not produce an answer that the caller depends on.
    #[error("cloud escalation failed")]
    CloudUnreachable {
        /// Underlying client error.
        #[source]
        source: CloudError,
    },

    /// Query queue is saturated.
    #[error("query queue is full ({capacity} pending)")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Request did not carry a usable image.
    #[error("invalid image: {reason}")]
    InvalidImage {
        /// Description of the problem.
        reason: String,
    },

    /// A result was attached to a query that already has one.
    #[error("image query '{query_id}' already has a result")]
    ResultAlreadyAttached {
        /// Query identifier.
        query_id: String,
    },

    /// Failed to read an image from disk.
    #[error("failed to read image '{path}'")]
    ImageRead {
        /// Path to the image.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to bind the HTTP listener.
    #[error("failed to bind HTTP listener on {addr}")]
    ServerBind {
        /// Address that could not be bound.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Internal error (for unexpected failures).
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl Error {
    /// Whether a gateway in front of this node should re-route the request to the cloud.
    pub const fn is_gateway_fallback(&self) -> bool {
        matches!(
            self,
            Self::DetectorNotFound { .. }
                | Self::ConfigInvalid { .. }
                | Self::ModelUnavailable { .. }
                | Self::ServiceUnavailable { .. }
                | Self::InferenceExecution { .. }
                | Self::CloudUnreachable { .. }
                | Self::QueueFull { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_classification() {
        let unavailable = Error::ModelUnavailable {
            detector_id: "det_1".into(),
            reason: "timed out".into(),
        };
        assert!(unavailable.is_gateway_fallback());

        let invalid = Error::InvalidImage {
            reason: "empty body".into(),
        };
        assert!(!invalid.is_gateway_fallback());
    }

    #[test]
    fn test_config_invalid_message_names_detector() {
        let err = Error::ConfigInvalid {
            detector_id: "det_door".into(),
            reason: "MULTICLASS requires at least 2 class names, got 1".into(),
        };
        let message = err.to_string();
        assert!(message.contains("det_door"));
        assert!(message.contains("at least 2"));
    }
}
