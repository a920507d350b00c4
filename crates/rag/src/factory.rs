//! RAG provider factory.
//!
//! Creates provider clients from the configured provider kind, endpoint,
//! credentials and timeout.

use crate::client::RagProvider;
use crate::providers::{HttpRagProvider, MockRagProvider};
use kbchat_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Create a RAG provider by name.
///
/// # Arguments
/// * `provider` - Provider identifier ("http", "mock")
/// * `endpoint` - Base URL of the service (required for "http")
/// * `api_key` - Optional bearer token
/// * `timeout` - Request timeout
///
/// # Errors
/// Returns an error if the provider is unknown, the endpoint is missing,
/// or the HTTP client cannot be built.
pub fn create_provider(
    provider: &str,
    endpoint: Option<&str>,
    api_key: Option<String>,
    timeout: Duration,
) -> AppResult<Arc<dyn RagProvider>> {
    match provider.to_lowercase().as_str() {
        "http" => {
            let base_url = endpoint
                .filter(|e| !e.trim().is_empty())
                .ok_or_else(|| AppError::Config("HTTP provider requires an endpoint".to_string()))?;
            let client = HttpRagProvider::with_options(base_url, api_key, timeout)?;
            Ok(Arc::new(client))
        }
        "mock" => Ok(Arc::new(MockRagProvider::new())),
        _ => Err(AppError::Config(format!("Unknown RAG provider: {}", provider))),
    }
}
