//! Conversation client for kbchat.
//!
//! Drives submission and retry against a [`kbchat_knowledge::QueryService`],
//! keeps a capped per-conversation history and persists it through a
//! pluggable key-value store.

pub mod classify;
pub mod client;
pub mod history;
pub mod store;

pub use classify::{ClientErrorKind, ErrorState, MAX_RETRIES};
pub use client::{ClientError, ClientOptions, ClientState, QueryClient, StoredSession};
pub use history::{ChatHistory, ChatMessage, Role, DEFAULT_MAX_MESSAGES};
pub use store::{ConversationScope, FileStore, KeyValueStore, MemoryStore, StoreError};
