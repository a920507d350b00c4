//! Client-side error classification.
//!
//! The client only sees the safe message in a failed response, so retry
//! eligibility is decided by substring matching on that message.

use serde::{Deserialize, Serialize};

/// Manual retries allowed for one question before its error becomes terminal.
pub const MAX_RETRIES: u32 = 3;

const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "forbidden",
    "access denied",
    "not authorized",
    "credentials",
    "401",
    "403",
];

const QUOTA_MARKERS: &[&str] = &[
    "quota",
    "rate limit",
    "throttl",
    "too many requests",
    "429",
];

const NETWORK_MARKERS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "unavailable",
    "unreachable",
    "offline",
    "try again",
];

const VALIDATION_MARKERS: &[&str] = &[
    "invalid",
    "validation",
    "expired",
    "required",
    "too long",
    "bad request",
];

/// Client error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientErrorKind {
    Auth,
    Quota,
    Network,
    Validation,
    Unknown,
}

impl ClientErrorKind {
    /// Classify an error message. Earlier categories win.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let matches = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

        if matches(AUTH_MARKERS) {
            Self::Auth
        } else if matches(QUOTA_MARKERS) {
            Self::Quota
        } else if matches(NETWORK_MARKERS) {
            Self::Network
        } else if matches(VALIDATION_MARKERS) {
            Self::Validation
        } else {
            Self::Unknown
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Quota | Self::Network | Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Quota => "quota",
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }
}

/// A failed submission as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorState {
    pub kind: ClientErrorKind,
    pub message: String,

    /// Whether a manual retry is offered
    pub retryable: bool,

    /// Retries already sent for the current question
    pub retry_count: u32,

    pub max_retries: u32,
}

impl ErrorState {
    /// Build the state after a failed attempt. `retry_count` is 0 for the
    /// original submission and is clamped to [`MAX_RETRIES`].
    pub fn from_failure(message: impl Into<String>, retry_count: u32) -> Self {
        let message = message.into();
        let kind = ClientErrorKind::classify(&message);
        let retry_count = retry_count.min(MAX_RETRIES);

        Self {
            kind,
            message,
            retryable: kind.is_retryable() && retry_count < MAX_RETRIES,
            retry_count,
            max_retries: MAX_RETRIES,
        }
    }

    /// Retries still available.
    pub fn retries_left(&self) -> u32 {
        if self.retryable {
            self.max_retries - self.retry_count
        } else {
            0
        }
    }
}
