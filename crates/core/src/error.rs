//! Error types for kbchat.
//!
//! This module defines a unified error enum covering configuration, I/O,
//! provider, knowledge, storage and serialization failures.

use thiserror::Error;

/// Unified error type for kbchat.
///
/// Library code returns `Result<T, AppError>`; the query boundary converts
/// these into typed response shapes instead of letting them escape.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// RAG provider errors
    #[error("Provider error: {0}")]
    Provider(String),

    /// Citation, locator and settings errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Conversation store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let err = AppError::Provider("timeout".to_string());
        assert_eq!(err.to_string(), "Provider error: timeout");

        let err = AppError::Other("plain".to_string());
        assert_eq!(err.to_string(), "plain");
    }

    #[test]
    fn test_from_serde_json() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: AppError = parse.unwrap_err().into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
