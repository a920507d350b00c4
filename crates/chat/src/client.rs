//! Query client state machine.
//!
//! Owns one conversation at a time: its capped history, the provider session
//! token and the error state of the last submission. Every history mutation
//! is persisted to the configured [`KeyValueStore`]; storage failures are
//! logged and never block the conversation.
//!
//! Submission is split into `begin_*` (prepare a [`Question`]) and
//! [`QueryClient::complete`] (apply the response) so a caller driving its own
//! transport can observe the `Sending` state in between.

use crate::classify::ErrorState;
use crate::history::{ChatHistory, ChatMessage, DEFAULT_MAX_MESSAGES};
use crate::store::{ConversationScope, KeyValueStore, StoreError};
use chrono::{DateTime, Utc};
use kbchat_knowledge::{ChatResponse, Question, QueryService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default provider session inactivity window.
pub const DEFAULT_SESSION_INACTIVITY: Duration = Duration::from_secs(3600);

/// Rejected client action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("a question is already being answered")]
    Busy,

    #[error("question is empty")]
    EmptyQuestion,

    #[error("no retry available")]
    NoRetryAvailable,
}

/// Where the client is in the submit cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Sending,
    Failed(ErrorState),
}

/// Client tuning.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub max_messages: usize,

    /// Age after which a stored session token is dropped before sending
    pub session_inactivity: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            session_inactivity: DEFAULT_SESSION_INACTIVITY,
        }
    }
}

/// Provider session as persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub token: String,
    pub last_activity_at: DateTime<Utc>,
}

impl StoredSession {
    fn is_stale(&self, now: DateTime<Utc>, inactivity: Duration) -> bool {
        match chrono::Duration::from_std(inactivity) {
            Ok(window) => now - self.last_activity_at > window,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Attempt {
    text: String,

    /// Retries already sent for this question
    retries: u32,
}

/// Conversation client.
pub struct QueryClient {
    store: Arc<dyn KeyValueStore>,
    options: ClientOptions,
    scope: ConversationScope,
    history: ChatHistory,
    session: Option<StoredSession>,
    state: ClientState,
    attempt: Option<Attempt>,
}

impl QueryClient {
    /// Open a conversation, loading any persisted state for `scope`.
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        scope: ConversationScope,
        options: ClientOptions,
    ) -> Self {
        let mut client = Self {
            store,
            history: ChatHistory::new(options.max_messages),
            options,
            scope,
            session: None,
            state: ClientState::Idle,
            attempt: None,
        };
        client.load();
        client
    }

    pub fn scope(&self) -> &ConversationScope {
        &self.scope
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.history.messages()
    }

    /// Current error, if the last submission failed.
    pub fn error(&self) -> Option<&ErrorState> {
        match &self.state {
            ClientState::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    pub fn is_sending(&self) -> bool {
        self.state == ClientState::Sending
    }

    /// Record the user's question and prepare the request.
    pub fn begin_submit(&mut self, text: &str) -> Result<Question, ClientError> {
        if self.is_sending() {
            return Err(ClientError::Busy);
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyQuestion);
        }

        self.history.push(ChatMessage::user(text));
        self.persist();

        self.attempt = Some(Attempt {
            text: text.to_string(),
            retries: 0,
        });
        Ok(self.start_sending(text, Utc::now()))
    }

    /// Prepare a resubmission of the failed question. The question is not
    /// appended to history a second time.
    pub fn begin_retry(&mut self) -> Result<Question, ClientError> {
        if self.is_sending() {
            return Err(ClientError::Busy);
        }

        let retryable = self.error().map(|e| e.retryable).unwrap_or(false);
        let (text, retries) = match (self.attempt.as_mut(), retryable) {
            (Some(attempt), true) => {
                attempt.retries += 1;
                (attempt.text.clone(), attempt.retries)
            }
            _ => return Err(ClientError::NoRetryAvailable),
        };

        tracing::info!(retry = retries, "Retrying question");
        Ok(self.start_sending(&text, Utc::now()))
    }

    /// Apply the orchestrator's response to the in-flight submission.
    pub fn complete(&mut self, response: ChatResponse) {
        if !self.is_sending() {
            tracing::warn!("Ignoring response with no submission in flight");
            return;
        }

        match response.error {
            Some(message) => self.fail(message),
            None => {
                if let Some(token) = response.session_token {
                    self.session = Some(StoredSession {
                        token,
                        last_activity_at: Utc::now(),
                    });
                }

                self.history.push(ChatMessage::assistant(
                    response.answer,
                    response.sources,
                    response.model_used,
                ));
                self.attempt = None;
                self.state = ClientState::Idle;
                self.persist();
            }
        }
    }

    /// Submit a question and wait for the answer.
    pub async fn submit(
        &mut self,
        service: &dyn QueryService,
        text: &str,
    ) -> Result<(), ClientError> {
        let question = self.begin_submit(text)?;
        let response = service.handle(question).await;
        self.complete(response);
        Ok(())
    }

    /// Resubmit the failed question.
    pub async fn retry(&mut self, service: &dyn QueryService) -> Result<(), ClientError> {
        let question = self.begin_retry()?;
        let response = service.handle(question).await;
        self.complete(response);
        Ok(())
    }

    /// Clear the error notice. History is left untouched.
    pub fn dismiss_error(&mut self) {
        if matches!(self.state, ClientState::Failed(_)) {
            self.state = ClientState::Idle;
            self.attempt = None;
        }
    }

    /// Switch to another user or conversation.
    ///
    /// In-memory state for the old scope is discarded before the new scope is
    /// loaded.
    pub fn switch_scope(&mut self, scope: ConversationScope) -> Result<(), ClientError> {
        if self.is_sending() {
            return Err(ClientError::Busy);
        }

        tracing::debug!(
            identity = scope.identity_label(),
            conversation = %scope.conversation_id,
            "Switching conversation"
        );

        self.history = ChatHistory::new(self.options.max_messages);
        self.session = None;
        self.state = ClientState::Idle;
        self.attempt = None;
        self.scope = scope;
        self.load();
        Ok(())
    }

    /// Start a fresh conversation for the same identity.
    pub fn new_conversation(&mut self) -> Result<(), ClientError> {
        let scope = ConversationScope::fresh(self.scope.identity.clone());
        self.switch_scope(scope)
    }

    /// Drop this conversation's history and session, in memory and in the store.
    pub fn clear(&mut self) -> Result<(), ClientError> {
        if self.is_sending() {
            return Err(ClientError::Busy);
        }

        self.history.clear();
        self.session = None;
        self.state = ClientState::Idle;
        self.attempt = None;

        for key in [self.scope.messages_key(), self.scope.session_key()] {
            if let Err(e) = self.store.remove(&key) {
                tracing::warn!(key = %key, "Failed to remove conversation state: {}", e);
            }
        }
        Ok(())
    }

    fn start_sending(&mut self, text: &str, now: DateTime<Utc>) -> Question {
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.is_stale(now, self.options.session_inactivity))
        {
            tracing::info!("Session inactive too long, starting a new provider session");
            self.session = None;
            self.persist();
        }

        self.state = ClientState::Sending;
        Question::new(text)
            .with_session(self.session_token().map(str::to_string))
            .with_user(self.scope.identity.clone())
    }

    fn fail(&mut self, message: String) {
        let retries = self.attempt.as_ref().map(|a| a.retries).unwrap_or(0);

        // A rejected session cannot be continued.
        if message.to_lowercase().contains("session") {
            self.session = None;
            self.persist();
        }

        let error = ErrorState::from_failure(message, retries);
        tracing::warn!(
            kind = error.kind.as_str(),
            retryable = error.retryable,
            retry_count = error.retry_count,
            "Question failed: {}",
            error.message
        );
        self.state = ClientState::Failed(error);
    }

    fn load(&mut self) {
        match self.read::<Vec<ChatMessage>>(&self.scope.messages_key()) {
            Ok(Some(messages)) => {
                self.history = ChatHistory::from_messages(messages, self.options.max_messages);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring unreadable conversation history: {}", e),
        }

        match self.read::<StoredSession>(&self.scope.session_key()) {
            Ok(session) => self.session = session,
            Err(e) => tracing::warn!("Ignoring unreadable session: {}", e),
        }

        tracing::debug!(
            messages = self.history.len(),
            has_session = self.session.is_some(),
            "Loaded conversation"
        );
    }

    fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn persist(&self) {
        if let Err(e) = self.write_state() {
            match e {
                StoreError::QuotaExceeded { .. } => {
                    tracing::warn!("Conversation not saved: {}", e)
                }
                _ => tracing::error!("Failed to save conversation: {}", e),
            }
        }
    }

    fn write_state(&self) -> Result<(), StoreError> {
        let messages = serde_json::to_string(self.history.messages())?;
        self.store.set(&self.scope.messages_key(), &messages)?;

        match &self.session {
            Some(session) => {
                let session = serde_json::to_string(session)?;
                self.store.set(&self.scope.session_key(), &session)
            }
            None => self.store.remove(&self.scope.session_key()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClientErrorKind, MAX_RETRIES};
    use crate::history::Role;
    use crate::store::MemoryStore;
    use kbchat_knowledge::error::{PROVIDER_ERROR_MESSAGE, SESSION_EXPIRED_MESSAGE};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Service replaying scripted responses and recording questions.
    #[derive(Default)]
    struct ScriptedService {
        responses: Mutex<VecDeque<ChatResponse>>,
        questions: Mutex<Vec<Question>>,
    }

    impl ScriptedService {
        fn with(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                questions: Mutex::new(Vec::new()),
            }
        }

        fn questions(&self) -> Vec<Question> {
            self.questions.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl QueryService for ScriptedService {
        async fn handle(&self, question: Question) -> ChatResponse {
            self.questions.lock().unwrap().push(question);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ChatResponse::failed("script exhausted"))
        }
    }

    fn ok(answer: &str, token: &str) -> ChatResponse {
        ChatResponse::answered(
            answer.to_string(),
            Some(token.to_string()),
            Vec::new(),
            "model-x".to_string(),
        )
    }

    fn client_with(store: Arc<MemoryStore>) -> QueryClient {
        QueryClient::open(
            store,
            ConversationScope::new(Some("alice".to_string()), "c1"),
            ClientOptions::default(),
        )
    }

    fn client() -> QueryClient {
        client_with(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_submit_success() {
        let service = ScriptedService::with(vec![ok("answer", "sess-1")]);
        let mut client = client();

        client.submit(&service, "question").await.unwrap();

        assert_eq!(client.state(), &ClientState::Idle);
        assert_eq!(client.messages().len(), 2);
        assert_eq!(client.messages()[0].role, Role::User);
        assert_eq!(client.messages()[1].role, Role::Assistant);
        assert_eq!(client.messages()[1].model_used.as_deref(), Some("model-x"));
        assert_eq!(client.session_token(), Some("sess-1"));

        let question = &service.questions()[0];
        assert!(question.session_token.is_none());
        assert_eq!(question.user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_session_token_forwarded_on_next_turn() {
        let service = ScriptedService::with(vec![ok("one", "sess-1"), ok("two", "sess-1")]);
        let mut client = client();

        client.submit(&service, "first").await.unwrap();
        client.submit(&service, "second").await.unwrap();

        let questions = service.questions();
        assert_eq!(questions[1].session_token.as_deref(), Some("sess-1"));
    }

    #[test]
    fn test_submit_while_sending_is_rejected() {
        let mut client = client();

        client.begin_submit("first").unwrap();
        assert!(client.is_sending());
        assert_eq!(client.begin_submit("second"), Err(ClientError::Busy));
        assert_eq!(client.begin_retry(), Err(ClientError::Busy));
        assert_eq!(client.messages().len(), 1);

        client.complete(ok("answer", "sess-1"));
        assert!(client.begin_submit("second").is_ok());
    }

    #[test]
    fn test_empty_question_rejected() {
        let mut client = client();
        assert_eq!(client.begin_submit("  \n"), Err(ClientError::EmptyQuestion));
        assert!(client.messages().is_empty());
        assert_eq!(client.state(), &ClientState::Idle);
    }

    #[tokio::test]
    async fn test_failure_keeps_question_and_offers_retry() {
        let service = ScriptedService::with(vec![
            ChatResponse::failed(PROVIDER_ERROR_MESSAGE),
            ok("recovered", "sess-1"),
        ]);
        let mut client = client();

        client.submit(&service, "question").await.unwrap();

        let error = client.error().unwrap();
        assert_eq!(error.kind, ClientErrorKind::Network);
        assert!(error.retryable);
        assert_eq!(error.retry_count, 0);
        assert_eq!(error.retries_left(), MAX_RETRIES);
        assert_eq!(client.messages().len(), 1);

        client.retry(&service).await.unwrap();

        assert_eq!(client.state(), &ClientState::Idle);
        let contents: Vec<&str> = client.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question", "recovered"]);
        assert_eq!(service.questions()[1].text, "question");
    }

    #[tokio::test]
    async fn test_three_retries_then_terminal() {
        let service = ScriptedService::with(vec![ChatResponse::failed(PROVIDER_ERROR_MESSAGE); 4]);
        let mut client = client();

        client.submit(&service, "question").await.unwrap();

        let mut retries = 0;
        while client.retry(&service).await.is_ok() {
            retries += 1;
            let error = client.error().unwrap();
            assert_eq!(error.retry_count, retries);
            assert!(error.retry_count <= error.max_retries);
        }

        assert_eq!(retries, MAX_RETRIES);
        let error = client.error().unwrap();
        assert!(!error.retryable);
        assert_eq!(error.retry_count, MAX_RETRIES);
        assert_eq!(error.retries_left(), 0);
        assert_eq!(client.messages().len(), 1);
        assert_eq!(service.questions().len(), 4);
    }

    #[tokio::test]
    async fn test_success_resets_retry_count() {
        let service = ScriptedService::with(vec![
            ChatResponse::failed(PROVIDER_ERROR_MESSAGE),
            ok("fine", "sess-1"),
            ChatResponse::failed(PROVIDER_ERROR_MESSAGE),
        ]);
        let mut client = client();

        client.submit(&service, "one").await.unwrap();
        client.retry(&service).await.unwrap();
        client.submit(&service, "two").await.unwrap();

        assert_eq!(client.error().unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_session_expired_is_terminal_and_clears_token() {
        let service = ScriptedService::with(vec![
            ok("one", "sess-1"),
            ChatResponse::failed(SESSION_EXPIRED_MESSAGE),
        ]);
        let mut client = client();

        client.submit(&service, "first").await.unwrap();
        client.submit(&service, "second").await.unwrap();

        let error = client.error().unwrap();
        assert_eq!(error.kind, ClientErrorKind::Validation);
        assert!(!error.retryable);
        assert!(client.session_token().is_none());
    }

    #[tokio::test]
    async fn test_dismiss_error_keeps_history() {
        let service = ScriptedService::with(vec![ChatResponse::failed(PROVIDER_ERROR_MESSAGE)]);
        let mut client = client();

        client.submit(&service, "question").await.unwrap();
        client.dismiss_error();

        assert_eq!(client.state(), &ClientState::Idle);
        assert_eq!(client.messages().len(), 1);
        assert_eq!(client.begin_retry(), Err(ClientError::NoRetryAvailable));
    }

    #[tokio::test]
    async fn test_history_persisted_and_reloaded() {
        let store = Arc::new(MemoryStore::new());
        let service = ScriptedService::with(vec![ok("answer", "sess-1")]);

        let mut client = client_with(store.clone());
        client.submit(&service, "question").await.unwrap();

        let reopened = client_with(store.clone());
        assert_eq!(reopened.messages().len(), 2);
        assert_eq!(reopened.session_token(), Some("sess-1"));

        let raw = store
            .get("kbchat:user-alice:c1:messages")
            .unwrap()
            .unwrap();
        assert!(raw.contains("question"));
    }

    #[tokio::test]
    async fn test_quota_failure_does_not_block() {
        let store = Arc::new(MemoryStore::with_capacity(16));
        let service = ScriptedService::with(vec![ok("answer", "sess-1")]);
        let mut client = client_with(store);

        client.submit(&service, "question").await.unwrap();

        assert_eq!(client.state(), &ClientState::Idle);
        assert_eq!(client.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let store = Arc::new(MemoryStore::new());
        let service = ScriptedService::with(vec![ok("for alice", "sess-a")]);
        let mut client = client_with(store.clone());

        client.submit(&service, "alice asks").await.unwrap();

        client
            .switch_scope(ConversationScope::new(None, "c1"))
            .unwrap();
        assert!(client.messages().is_empty());
        assert!(client.session_token().is_none());

        client
            .switch_scope(ConversationScope::new(Some("alice".to_string()), "c1"))
            .unwrap();
        assert_eq!(client.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_lookalike_scopes_do_not_share_history() {
        let store = Arc::new(MemoryStore::new());
        let service = ScriptedService::default();

        let mut colon_user = QueryClient::open(
            store.clone(),
            ConversationScope::new(Some("a:b".to_string()), "c"),
            ClientOptions::default(),
        );
        colon_user.submit(&service, "secret of a:b/c").await.unwrap();

        let other = QueryClient::open(
            store.clone(),
            ConversationScope::new(Some("a".to_string()), "b:c"),
            ClientOptions::default(),
        );
        assert!(other.messages().is_empty());

        let mut guest = QueryClient::open(
            store.clone(),
            ConversationScope::new(None, "c1"),
            ClientOptions::default(),
        );
        guest.submit(&service, "guest private").await.unwrap();

        let named_guest = QueryClient::open(
            store,
            ConversationScope::new(Some("guest".to_string()), "c1"),
            ClientOptions::default(),
        );
        assert!(named_guest.messages().is_empty());
    }

    #[tokio::test]
    async fn test_new_conversation_clears_session() {
        let service = ScriptedService::with(vec![ok("answer", "sess-1")]);
        let mut client = client();
        client.submit(&service, "question").await.unwrap();

        let old_id = client.scope().conversation_id.clone();
        client.new_conversation().unwrap();

        assert_ne!(client.scope().conversation_id, old_id);
        assert_eq!(client.scope().identity.as_deref(), Some("alice"));
        assert!(client.messages().is_empty());
        assert!(client.session_token().is_none());
    }

    #[test]
    fn test_stale_session_dropped_before_sending() {
        let store = Arc::new(MemoryStore::new());
        let stale = StoredSession {
            token: "sess-old".to_string(),
            last_activity_at: Utc::now() - chrono::Duration::hours(2),
        };
        store
            .set(
                "kbchat:user-alice:c1:session",
                &serde_json::to_string(&stale).unwrap(),
            )
            .unwrap();

        let mut client = client_with(store.clone());
        assert_eq!(client.session_token(), Some("sess-old"));

        let question = client.begin_submit("hello again").unwrap();
        assert!(question.session_token.is_none());
        assert_eq!(store.get("kbchat:user-alice:c1:session").unwrap(), None);
    }

    #[test]
    fn test_fresh_session_kept() {
        let store = Arc::new(MemoryStore::new());
        let recent = StoredSession {
            token: "sess-recent".to_string(),
            last_activity_at: Utc::now() - chrono::Duration::minutes(5),
        };
        store
            .set(
                "kbchat:user-alice:c1:session",
                &serde_json::to_string(&recent).unwrap(),
            )
            .unwrap();

        let mut client = client_with(store);
        let question = client.begin_submit("hello").unwrap();
        assert_eq!(question.session_token.as_deref(), Some("sess-recent"));
    }

    #[tokio::test]
    async fn test_clear_removes_persisted_state() {
        let store = Arc::new(MemoryStore::new());
        let service = ScriptedService::with(vec![ok("answer", "sess-1")]);
        let mut client = client_with(store.clone());
        client.submit(&service, "question").await.unwrap();

        client.clear().unwrap();

        assert!(client.messages().is_empty());
        assert_eq!(store.get("kbchat:user-alice:c1:messages").unwrap(), None);
        assert_eq!(store.get("kbchat:user-alice:c1:session").unwrap(), None);
    }

    #[test]
    fn test_unreadable_history_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.set("kbchat:user-alice:c1:messages", "not json").unwrap();

        let client = client_with(store);
        assert!(client.messages().is_empty());
    }
}
