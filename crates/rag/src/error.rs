//! Provider failure categories.

use thiserror::Error;

/// Failure reported by a RAG provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider rejected the request (bad input, unknown or expired session)
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or rejected credentials
    #[error("access denied: {0}")]
    Auth(String),

    /// Rate limit or quota exhausted
    #[error("throttled: {0}")]
    Throttled(String),

    /// The provider answered with a server-side failure
    #[error("service error ({status}): {message}")]
    Service { status: u16, message: String },

    /// The request never completed
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether this is a validation failure about session state.
    pub fn is_session_rejection(&self) -> bool {
        match self {
            ProviderError::Validation(message) => message.to_lowercase().contains("session"),
            _ => false,
        }
    }
}

impl From<ProviderError> for kbchat_core::AppError {
    fn from(err: ProviderError) -> Self {
        kbchat_core::AppError::Provider(err.to_string())
    }
}
