//! Conversation history.

use chrono::{DateTime, Utc};
use kbchat_knowledge::Source;
use serde::{Deserialize, Serialize};

/// Messages kept per conversation unless configured otherwise.
pub const DEFAULT_MAX_MESSAGES: usize = 50;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in a conversation. Messages are never edited after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub sources: Vec<Source>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            sources: Vec::new(),
            model_used: None,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        sources: Vec<Source>,
        model_used: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            sources,
            model_used,
        }
    }
}

/// Append-only message list capped at `max_messages`; the oldest entries fall
/// off the front.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
    max_messages: usize,
}

impl ChatHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(1),
        }
    }

    /// Rebuild a history from persisted messages, keeping the newest.
    pub fn from_messages(messages: Vec<ChatMessage>, max_messages: usize) -> Self {
        let mut history = Self::new(max_messages);
        history.messages = messages;
        history.enforce_cap();
        history
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.enforce_cap();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn enforce_cap(&mut self) {
        if self.messages.len() > self.max_messages {
            let overflow = self.messages.len() - self.max_messages;
            self.messages.drain(..overflow);
        }
    }
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_drops_oldest() {
        let mut history = ChatHistory::new(3);
        for i in 0..5 {
            history.push(ChatMessage::user(format!("q{}", i)));
        }

        let contents: Vec<&str> = history
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn test_default_cap() {
        let mut history = ChatHistory::default();
        for i in 0..(DEFAULT_MAX_MESSAGES + 10) {
            history.push(ChatMessage::user(i.to_string()));
        }
        assert_eq!(history.len(), DEFAULT_MAX_MESSAGES);
        assert_eq!(history.messages()[0].content, "10");
    }

    #[test]
    fn test_from_messages_trims() {
        let messages: Vec<ChatMessage> = (0..4).map(|i| ChatMessage::user(i.to_string())).collect();
        let history = ChatHistory::from_messages(messages, 2);
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap().content, "3");
    }

    #[test]
    fn test_message_serialization() {
        let message = ChatMessage::assistant("answer", Vec::new(), Some("model-x".to_string()));
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["role"], "assistant");
        assert_eq!(json["modelUsed"], "model-x");
        assert!(json["sources"].as_array().unwrap().is_empty());

        let user = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert!(user.get("modelUsed").is_none());
    }
}
