//! Query and source type definitions.

use serde::{Deserialize, Serialize};

/// Maximum number of characters kept in a source snippet.
pub const MAX_SNIPPET_CHARS: usize = 200;

/// A question submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Natural-language question text
    pub text: String,

    /// Provider session to continue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// Identity of the asking user, for logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Question {
    /// Create a question that starts a new conversation.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_token: None,
            user_id: None,
        }
    }

    /// Continue a provider session.
    pub fn with_session(mut self, token: Option<String>) -> Self {
        self.session_token = token;
        self
    }

    /// Attach the asking user's identity.
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// A deduplicated, user-facing citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Document the cited segment belongs to
    pub document_id: String,

    /// Page number for paginated documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_label: Option<u32>,

    /// Original location identifier reported by the provider
    pub location_uri: String,

    /// At most 200 characters of the cited text
    pub snippet: String,

    /// Human-readable document name, when the locator knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Expiring download link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// Whether document access is enabled for this response
    pub download_allowed: bool,
}

impl Source {
    /// Deduplication key: `documentId:segment`, with `-` for unsegmented documents.
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.document_id, self.segment_label)
    }
}

/// Build the deduplication key for a document segment.
pub fn dedup_key(document_id: &str, segment_label: Option<u32>) -> String {
    match segment_label {
        Some(label) => format!("{}:{}", document_id, label),
        None => format!("{}:-", document_id),
    }
}

/// Query result in wire shape.
///
/// Failures use the same shape: empty answer, no session, no sources, and a
/// safe `error` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// Synthesized answer, empty on failure
    pub answer: String,

    /// Session token to forward on the next turn
    pub session_token: Option<String>,

    /// Deduplicated citations
    pub sources: Vec<Source>,

    /// Model that produced the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,

    /// Safe, user-facing failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResponse {
    /// Create a successful response.
    pub fn answered(
        answer: String,
        session_token: Option<String>,
        sources: Vec<Source>,
        model_used: String,
    ) -> Self {
        Self {
            answer,
            session_token,
            sources,
            model_used: Some(model_used),
            error: None,
        }
    }

    /// Create the empty failure shape.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            answer: String::new(),
            session_token: None,
            sources: Vec::new(),
            model_used: None,
            error: Some(message.into()),
        }
    }

    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Settings in effect for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveSettings {
    /// Model that synthesizes answers
    pub model_id: String,

    /// Whether sources may carry download links
    pub document_access: bool,
}
