//! Core error types for lease retrieval.
//!
//! Validation of caller input and configuration loading fail through the
//! types defined here. Subsystem crates define their own errors and map into
//! [`ErrorKind`](crate::result::ErrorKind) when a result is reported.

use thiserror::Error;

/// Central error type for core operations.
#[derive(Error, Debug)]
pub enum LeaseDropError {
    /// Configuration errors (file loading, parsing, validation)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed retrieval request
    #[error("validation error: {0}")]
    Validation(String),

    /// History store errors
    #[error("history store error: {0}")]
    Store(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Failed to parse TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// I/O error reading config
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Result type alias using `LeaseDropError`.
pub type Result<T> = std::result::Result<T, LeaseDropError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LeaseDropError::Validation("identifier must be 6 digits".to_string());
        assert_eq!(
            err.to_string(),
            "validation error: identifier must be 6 digits"
        );

        let err = ConfigError::InvalidValue {
            field: "retry.max_attempts".to_string(),
            reason: "must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid config value for retry.max_attempts: must be at least 1"
        );
    }

    #[test]
    fn test_error_from_config() {
        let config_err = ConfigError::NoConfigDir;
        let err: LeaseDropError = config_err.into();
        assert!(matches!(err, LeaseDropError::Config(_)));
    }
}
