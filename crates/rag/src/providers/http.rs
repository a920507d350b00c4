//! HTTP retrieve-and-generate provider.
//!
//! Speaks a JSON protocol modelled on managed knowledge-base services:
//! `POST {base}/retrieve-and-generate` with the question, knowledge base,
//! model and optional session id.

use crate::client::{RagProvider, RagRequest, RagResponse, RawCitation};
use crate::error::ProviderError;
use kbchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wire request format.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    input: WireInput<'a>,
    knowledge_base_id: &'a str,
    model_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WireInput<'a> {
    text: &'a str,
}

/// Wire response format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    output: WireOutput,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    citations: Vec<WireCitation>,
}

#[derive(Debug, Deserialize)]
struct WireOutput {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCitation {
    #[serde(default)]
    retrieved_references: Vec<WireReference>,
}

#[derive(Debug, Deserialize)]
struct WireReference {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    location: Option<WireLocation>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLocation {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    s3_location: Option<WireS3Location>,
}

#[derive(Debug, Deserialize)]
struct WireS3Location {
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    #[serde(alias = "Message")]
    message: String,
}

/// HTTP RAG provider.
pub struct HttpRagProvider {
    /// Base URL of the service
    base_url: String,

    /// Bearer token sent with every request
    api_key: Option<String>,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpRagProvider {
    /// Create a provider with default client settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Create a provider with credentials and a request timeout.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into(),
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/retrieve-and-generate",
            self.base_url.trim_end_matches('/')
        )
    }

    fn to_wire_request<'a>(&self, request: &'a RagRequest) -> WireRequest<'a> {
        WireRequest {
            input: WireInput {
                text: &request.question,
            },
            knowledge_base_id: &request.knowledge_base_id,
            model_id: &request.model_id,
            session_id: request.session_token.as_deref(),
        }
    }

    fn convert_response(&self, response: WireResponse) -> RagResponse {
        let citations = response
            .citations
            .into_iter()
            .flat_map(|c| c.retrieved_references)
            .map(|reference| RawCitation {
                location_uri: reference.location.and_then(|loc| {
                    loc.uri.or_else(|| loc.s3_location.and_then(|s3| s3.uri))
                }),
                snippet_text: reference.content.map(|c| c.text).unwrap_or_default(),
                metadata: reference.metadata,
            })
            .collect();

        RagResponse {
            answer: response.output.text,
            session_token: response.session_id,
            citations,
        }
    }
}

/// Map a non-success status and its body to a provider error.
fn classify_status(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<WireErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        400 | 404 | 422 => ProviderError::Validation(message),
        401 | 403 => ProviderError::Auth(message),
        429 => ProviderError::Throttled(message),
        _ => ProviderError::Service { status, message },
    }
}

#[async_trait::async_trait]
impl RagProvider for HttpRagProvider {
    fn provider_name(&self) -> &str {
        "http"
    }

    async fn retrieve_and_generate(
        &self,
        request: &RagRequest,
    ) -> Result<RagResponse, ProviderError> {
        tracing::info!(
            knowledge_base = %request.knowledge_base_id,
            model = %request.model_id,
            continued = request.session_token.is_some(),
            "Sending retrieve-and-generate request"
        );

        let mut builder = self
            .client
            .post(self.endpoint())
            .json(&self.to_wire_request(request));

        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let err = classify_status(status.as_u16(), &body);
            tracing::warn!("Provider rejected request: {}", err);
            return Err(err);
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let converted = self.convert_response(wire);
        tracing::debug!(
            "Received answer ({} chars, {} citations)",
            converted.answer.len(),
            converted.citations.len()
        );

        Ok(converted)
    }
}
