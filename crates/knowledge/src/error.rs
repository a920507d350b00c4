//! Query failure taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message returned when the provider no longer recognizes the session.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired, start a new conversation";

/// Message returned for any other provider or transport failure.
pub const PROVIDER_ERROR_MESSAGE: &str =
    "The knowledge base is temporarily unavailable, please try again";

/// Message returned for an empty question.
pub const INVALID_QUESTION_MESSAGE: &str = "Invalid question: please enter some text";

/// Failure categories of the query pipeline.
///
/// Only `SessionExpired`, `ProviderError` and `InvalidQuestion` reach callers;
/// the others are recorded in logs and degrade silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SessionExpired,
    ProviderError,
    ConfigUnavailable,
    CitationParseFailure,
    InvalidQuestion,
}

impl ErrorKind {
    /// Stable code used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::ConfigUnavailable => "CONFIG_UNAVAILABLE",
            Self::CitationParseFailure => "CITATION_PARSE_FAILURE",
            Self::InvalidQuestion => "INVALID_QUESTION",
        }
    }
}

/// Error returned by the orchestrator's tagged boundary.
///
/// Display strings are safe to show to users; provider details stay in logs.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    #[error("{}", SESSION_EXPIRED_MESSAGE)]
    SessionExpired,

    #[error("{}", PROVIDER_ERROR_MESSAGE)]
    Provider,

    #[error("{}", INVALID_QUESTION_MESSAGE)]
    InvalidQuestion,
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionExpired => ErrorKind::SessionExpired,
            Self::Provider => ErrorKind::ProviderError,
            Self::InvalidQuestion => ErrorKind::InvalidQuestion,
        }
    }
}
