//! Query orchestration.
//!
//! Resolves settings, calls the RAG provider, classifies failures and shapes
//! citations into sources.

use crate::context::AppContext;
use crate::error::QueryError;
use crate::types::{ChatResponse, Question};
use kbchat_rag::{ProviderError, RagRequest};
use std::sync::Arc;
use tracing::Instrument;

/// Trait for anything that answers questions in wire shape.
///
/// `handle` never fails; failures come back as [`ChatResponse::failed`].
#[async_trait::async_trait]
pub trait QueryService: Send + Sync {
    async fn handle(&self, question: Question) -> ChatResponse;
}

/// Orchestrates one question through configuration, provider and citations.
pub struct QueryOrchestrator {
    context: Arc<AppContext>,
}

impl QueryOrchestrator {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Answer a question, returning a tagged result.
    ///
    /// This function:
    /// 1. Rejects empty questions
    /// 2. Resolves the effective model (defaults on any failure)
    /// 3. Calls the provider, forwarding the session token only when present
    /// 4. Classifies provider failures
    /// 5. Resolves citations into sources
    pub async fn query(&self, question: &Question) -> Result<ChatResponse, QueryError> {
        let text = question.text.trim();
        if text.is_empty() {
            return Err(QueryError::InvalidQuestion);
        }

        let settings = self.context.configuration.effective_settings().await;

        let mut request = RagRequest::new(
            text,
            self.context.knowledge_base_id.as_str(),
            settings.model_id.as_str(),
        );
        if let Some(token) = question.session_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.with_session(token);
        }

        let response = self
            .context
            .provider
            .retrieve_and_generate(&request)
            .await
            .map_err(classify_provider_error)?;

        let sources = self
            .context
            .citations
            .resolve(&response.citations, &settings)
            .await;

        tracing::info!(
            model = %settings.model_id,
            citations = response.citations.len(),
            sources = sources.len(),
            "Answered question"
        );

        Ok(ChatResponse::answered(
            response.answer,
            response.session_token,
            sources,
            settings.model_id,
        ))
    }
}

/// Map a provider failure onto the public taxonomy. Details stay in the logs.
fn classify_provider_error(err: ProviderError) -> QueryError {
    if err.is_session_rejection() {
        tracing::warn!(kind = "SESSION_EXPIRED", "Provider rejected session: {}", err);
        QueryError::SessionExpired
    } else {
        tracing::error!(kind = "PROVIDER_ERROR", "Provider call failed: {}", err);
        QueryError::Provider
    }
}

#[async_trait::async_trait]
impl QueryService for QueryOrchestrator {
    async fn handle(&self, question: Question) -> ChatResponse {
        let span = tracing::info_span!(
            "query",
            user = question.user_id.as_deref().unwrap_or("guest"),
            continued = question.session_token.is_some()
        );

        async {
            match self.query(&question).await {
                Ok(response) => response,
                Err(err) => ChatResponse::failed(err.to_string()),
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::CitationResolver;
    use crate::error::{PROVIDER_ERROR_MESSAGE, SESSION_EXPIRED_MESSAGE};
    use crate::settings::{CachedConfigResolver, RemoteSettings, SettingsSource};
    use crate::types::EffectiveSettings;
    use kbchat_core::{AppError, AppResult};
    use kbchat_rag::{MockRagProvider, RagResponse, RawCitation};
    use std::time::Duration;

    struct BrokenSource;

    #[async_trait::async_trait]
    impl SettingsSource for BrokenSource {
        fn source_name(&self) -> &str {
            "broken"
        }

        async fn fetch(&self) -> AppResult<RemoteSettings> {
            Err(AppError::Knowledge("connection refused".to_string()))
        }
    }

    fn defaults() -> EffectiveSettings {
        EffectiveSettings {
            model_id: "default-model".to_string(),
            document_access: false,
        }
    }

    fn orchestrator_with(
        provider: Arc<MockRagProvider>,
        resolver: CachedConfigResolver,
    ) -> QueryOrchestrator {
        let context = AppContext::new(
            provider,
            Arc::new(resolver),
            CitationResolver::without_locator(),
            "KB1",
        );
        QueryOrchestrator::new(Arc::new(context))
    }

    fn orchestrator(provider: Arc<MockRagProvider>) -> QueryOrchestrator {
        orchestrator_with(provider, CachedConfigResolver::fixed(defaults()))
    }

    fn answer(text: &str, session: &str, citations: Vec<RawCitation>) -> RagResponse {
        RagResponse {
            answer: text.to_string(),
            session_token: Some(session.to_string()),
            citations,
        }
    }

    #[tokio::test]
    async fn test_new_conversation_omits_session() {
        let provider = Arc::new(MockRagProvider::new());
        provider.push_response(answer("first", "sess-1", Vec::new()));
        let orchestrator = orchestrator(provider.clone());

        let response = orchestrator.handle(Question::new("hello")).await;

        assert_eq!(response.answer, "first");
        assert_eq!(response.session_token.as_deref(), Some("sess-1"));
        assert_eq!(response.model_used.as_deref(), Some("default-model"));
        assert!(response.error.is_none());

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].session_token.is_none());
        assert_eq!(requests[0].knowledge_base_id, "KB1");
        assert_eq!(requests[0].model_id, "default-model");
    }

    #[tokio::test]
    async fn test_session_token_forwarded_verbatim() {
        let provider = Arc::new(MockRagProvider::new());
        provider.push_response(answer("second", "sess-1", Vec::new()));
        let orchestrator = orchestrator(provider.clone());

        let question = Question::new("and then?").with_session(Some("sess-1".to_string()));
        orchestrator.handle(question).await;

        assert_eq!(
            provider.requests()[0].session_token.as_deref(),
            Some("sess-1")
        );
    }

    #[tokio::test]
    async fn test_session_rejection_maps_to_expired() {
        let provider = Arc::new(MockRagProvider::new());
        provider.push_error(ProviderError::Validation(
            "Session with Id sess-9 is not valid".to_string(),
        ));
        let orchestrator = orchestrator(provider);

        let question = Question::new("still there?").with_session(Some("sess-9".to_string()));
        let response = orchestrator.handle(question).await;

        let error = response.error.unwrap();
        assert!(error.contains("expired"));
        assert_eq!(error, SESSION_EXPIRED_MESSAGE);
        assert!(response.session_token.is_none());
        assert!(response.sources.is_empty());
        assert_eq!(response.answer, "");
    }

    #[tokio::test]
    async fn test_other_failures_do_not_leak_details() {
        let provider = Arc::new(MockRagProvider::new());
        provider
            .push_error(ProviderError::Service {
                status: 500,
                message: "stack trace at internal-host:1234".to_string(),
            })
            .push_error(ProviderError::Validation("input too long".to_string()))
            .push_error(ProviderError::Transport("dns failure".to_string()));
        let orchestrator = orchestrator(provider);

        for _ in 0..3 {
            let response = orchestrator.handle(Question::new("q")).await;
            assert_eq!(response.error.as_deref(), Some(PROVIDER_ERROR_MESSAGE));
            assert!(response.session_token.is_none());
            assert!(response.sources.is_empty());
        }
    }

    #[tokio::test]
    async fn test_query_returns_tagged_error() {
        let provider = Arc::new(MockRagProvider::new());
        provider.push_error(ProviderError::Throttled("slow down".to_string()));
        let orchestrator = orchestrator(provider);

        let result = orchestrator.query(&Question::new("q")).await;
        assert_eq!(result, Err(QueryError::Provider));
    }

    #[tokio::test]
    async fn test_empty_question_skips_provider() {
        let provider = Arc::new(MockRagProvider::new());
        let orchestrator = orchestrator(provider.clone());

        let response = orchestrator.handle(Question::new("   ")).await;
        assert!(response.error.unwrap().contains("Invalid question"));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_config_failure_uses_default_model() {
        let provider = Arc::new(MockRagProvider::new());
        provider.push_response(answer("normal answer", "sess-1", Vec::new()));
        let resolver = CachedConfigResolver::new(
            Some(Arc::new(BrokenSource)),
            defaults(),
            Duration::from_secs(60),
        );
        let orchestrator = orchestrator_with(provider.clone(), resolver);

        let response = orchestrator.handle(Question::new("q")).await;

        assert_eq!(response.answer, "normal answer");
        assert!(response.error.is_none());
        assert_eq!(response.model_used.as_deref(), Some("default-model"));
        assert_eq!(provider.requests()[0].model_id, "default-model");
    }

    #[tokio::test]
    async fn test_citations_become_sources() {
        let provider = Arc::new(MockRagProvider::new());
        provider.push_response(answer(
            "cited",
            "sess-1",
            vec![
                RawCitation::new("kb/doc-A/pages/page-3.json", "evidence"),
                RawCitation::new("kb/doc-A/pages/page-3.json", "dup"),
                RawCitation::new("unparsable", "skip me"),
            ],
        ));
        let orchestrator = orchestrator(provider);

        let response = orchestrator.handle(Question::new("q")).await;

        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].document_id, "doc-A");
        assert_eq!(response.sources[0].segment_label, Some(3));
        assert_eq!(response.sources[0].snippet, "evidence");
        assert!(!response.sources[0].download_allowed);
    }
}
