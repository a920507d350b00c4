//! Scripted RAG provider for tests and offline use.

use crate::client::{RagProvider, RagRequest, RagResponse};
use crate::error::ProviderError;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Mock provider that replays queued outcomes and records every request.
///
/// When the queue is empty it answers with an echo of the question and
/// continues (or opens) a deterministic session.
#[derive(Debug, Default)]
pub struct MockRagProvider {
    outcomes: Mutex<VecDeque<Result<RagResponse, ProviderError>>>,
    requests: Mutex<Vec<RagRequest>>,
}

impl MockRagProvider {
    /// Create an empty mock provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn push_response(&self, response: RagResponse) -> &Self {
        self.push(Ok(response))
    }

    /// Queue a failure.
    pub fn push_error(&self, error: ProviderError) -> &Self {
        self.push(Err(error))
    }

    fn push(&self, outcome: Result<RagResponse, ProviderError>) -> &Self {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<RagRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn echo(request: &RagRequest) -> RagResponse {
        RagResponse {
            answer: format!("Echo: {}", request.question),
            session_token: Some(
                request
                    .session_token
                    .clone()
                    .unwrap_or_else(|| "mock-session-1".to_string()),
            ),
            citations: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl RagProvider for MockRagProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn retrieve_and_generate(
        &self,
        request: &RagRequest,
    ) -> Result<RagResponse, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let next = self
            .outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front());

        next.unwrap_or_else(|| Ok(Self::echo(request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_echoes() {
        let provider = MockRagProvider::new();
        provider
            .push_error(ProviderError::Transport("down".to_string()))
            .push_response(RagResponse {
                answer: "scripted".to_string(),
                session_token: Some("s-1".to_string()),
                citations: Vec::new(),
            });

        let request = RagRequest::new("hi", "KB", "m");
        assert!(provider.retrieve_and_generate(&request).await.is_err());
        assert_eq!(
            provider.retrieve_and_generate(&request).await.unwrap().answer,
            "scripted"
        );

        let echoed = provider.retrieve_and_generate(&request).await.unwrap();
        assert_eq!(echoed.answer, "Echo: hi");
        assert_eq!(echoed.session_token.as_deref(), Some("mock-session-1"));
        assert_eq!(provider.requests().len(), 3);
    }
}
