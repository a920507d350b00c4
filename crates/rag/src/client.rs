//! RAG provider abstraction and request/response types.
//!
//! This module defines the core abstractions for talking to a
//! retrieve-and-generate backend.

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};

/// Retrieve-and-generate request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagRequest {
    /// The user's question
    pub question: String,

    /// Knowledge base searched by the provider
    pub knowledge_base_id: String,

    /// Model that synthesizes the answer
    pub model_id: String,

    /// Provider session to continue; absent starts a new conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl RagRequest {
    /// Create a new request that starts a fresh provider session.
    pub fn new(
        question: impl Into<String>,
        knowledge_base_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            knowledge_base_id: knowledge_base_id.into(),
            model_id: model_id.into(),
            session_token: None,
        }
    }

    /// Continue an existing provider session.
    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

/// A citation exactly as the provider returned it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCitation {
    /// Storage location of the cited segment, when the provider reports one
    #[serde(default)]
    pub location_uri: Option<String>,

    /// Retrieved text backing the citation
    #[serde(default)]
    pub snippet_text: String,

    /// Free-form provider metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RawCitation {
    /// Create a citation with a location and text.
    pub fn new(location_uri: impl Into<String>, snippet_text: impl Into<String>) -> Self {
        Self {
            location_uri: Some(location_uri.into()),
            snippet_text: snippet_text.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Retrieve-and-generate response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagResponse {
    /// Synthesized answer text
    pub answer: String,

    /// Session token to forward on the next turn
    #[serde(default)]
    pub session_token: Option<String>,

    /// Citations in provider order
    #[serde(default)]
    pub citations: Vec<RawCitation>,
}

/// Trait for RAG providers.
///
/// Implementations hide the wire protocol and report failures as
/// [`ProviderError`] so callers can tell validation problems from outages.
#[async_trait::async_trait]
pub trait RagProvider: Send + Sync {
    /// Get the provider name (e.g., "http", "mock").
    fn provider_name(&self) -> &str;

    /// Search the knowledge base and synthesize an answer.
    async fn retrieve_and_generate(
        &self,
        request: &RagRequest,
    ) -> Result<RagResponse, ProviderError>;
}
