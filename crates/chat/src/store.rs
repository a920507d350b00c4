//! Pluggable key-value storage for conversation state.
//!
//! Keys are namespaced as `kbchat:<identity>:<conversationId>:<slot>` so
//! conversations of different users never overwrite each other. The identity
//! segment is `user-<id>` for a signed-in user and `guest` otherwise; `%` and
//! `:` inside ids are percent-encoded so every scope maps to its own keys.

use kbchat_core::AppError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Namespace prefix for every key.
pub const KEY_PREFIX: &str = "kbchat";

/// Identity used when no user is signed in.
pub const GUEST_IDENTITY: &str = "guest";

/// Storage failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store has no room for the value
    #[error("storage quota exceeded writing {key} ({needed} bytes, {available} available)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store's internal lock was poisoned
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Which conversation a piece of state belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationScope {
    pub identity: Option<String>,
    pub conversation_id: String,
}

impl ConversationScope {
    pub fn new(identity: Option<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            identity: identity.filter(|id| !id.trim().is_empty()),
            conversation_id: conversation_id.into(),
        }
    }

    /// Scope for a fresh conversation with a random id.
    pub fn fresh(identity: Option<String>) -> Self {
        Self::new(identity, uuid::Uuid::new_v4().to_string())
    }

    /// Identity for display and logging; guests share the guest marker.
    pub fn identity_label(&self) -> &str {
        self.identity.as_deref().unwrap_or(GUEST_IDENTITY)
    }

    fn identity_segment(&self) -> String {
        match &self.identity {
            Some(id) => format!("user-{}", escape_segment(id)),
            None => GUEST_IDENTITY.to_string(),
        }
    }

    pub fn messages_key(&self) -> String {
        self.key("messages")
    }

    pub fn session_key(&self) -> String {
        self.key("session")
    }

    fn key(&self, slot: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            KEY_PREFIX,
            self.identity_segment(),
            escape_segment(&self.conversation_id),
            slot
        )
    }
}

/// Escape the key separator and the escape character itself.
fn escape_segment(value: &str) -> String {
    value.replace('%', "%25").replace(':', "%3A")
}

/// In-memory store with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes once keys and values exceed `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.lock()?;

        if let Some(capacity) = self.capacity {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = key.len() + value.len();
            if used + needed > capacity {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available: capacity.saturating_sub(used),
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Store keeping one file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create the store, creating `root` if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_key(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Map a key to a file name. Unsafe bytes become `%XX`, so distinct keys
/// never share a file.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scope_keys() {
        let guest = ConversationScope::new(None, "c1");
        assert_eq!(guest.messages_key(), "kbchat:guest:c1:messages");
        assert_eq!(guest.session_key(), "kbchat:guest:c1:session");

        let user = ConversationScope::new(Some("alice".to_string()), "c1");
        assert_eq!(user.messages_key(), "kbchat:user-alice:c1:messages");
        assert_ne!(guest.messages_key(), user.messages_key());

        let blank = ConversationScope::new(Some("  ".to_string()), "c1");
        assert_eq!(blank.identity_label(), GUEST_IDENTITY);
        assert_eq!(blank.messages_key(), guest.messages_key());
    }

    #[test]
    fn test_scope_keys_never_collide() {
        let pairs = [
            (
                ConversationScope::new(Some("a:b".to_string()), "c"),
                ConversationScope::new(Some("a".to_string()), "b:c"),
            ),
            (
                ConversationScope::new(Some("guest".to_string()), "c1"),
                ConversationScope::new(None, "c1"),
            ),
            (
                ConversationScope::new(Some("a%3Ab".to_string()), "c"),
                ConversationScope::new(Some("a:b".to_string()), "c"),
            ),
        ];

        for (left, right) in &pairs {
            assert_ne!(left, right);
            assert_ne!(left.messages_key(), right.messages_key());
            assert_ne!(left.session_key(), right.session_key());
        }

        let scope = ConversationScope::new(Some("a:b".to_string()), "x%y");
        assert_eq!(scope.messages_key(), "kbchat:user-a%3Ab:x%25y:messages");
    }

    #[test]
    fn test_fresh_scopes_differ() {
        let a = ConversationScope::fresh(None);
        let b = ConversationScope::fresh(None);
        assert_ne!(a.conversation_id, b.conversation_id);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_memory_store_quota() {
        let store = MemoryStore::with_capacity(10);
        store.set("a", "1234").unwrap();

        match store.set("b", "123456789") {
            Err(StoreError::QuotaExceeded { key, .. }) => assert_eq!(key, "b"),
            other => panic!("Expected quota error, got {:?}", other),
        }

        // Overwriting an existing key only counts the new value.
        store.set("a", "12345678").unwrap();
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path().join("conversations")).unwrap();

        let key = "kbchat:bob/evil:c1:messages";
        assert_eq!(store.get(key).unwrap(), None);

        store.set(key, "[]").unwrap();
        assert_eq!(store.get(key).unwrap().as_deref(), Some("[]"));

        // The key never escapes the store directory.
        let entries: Vec<_> = std::fs::read_dir(store.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        store.remove(key).unwrap();
        store.remove(key).unwrap();
        assert_eq!(store.get(key).unwrap(), None);
    }

    #[test]
    fn test_encode_key_is_injective_for_separators() {
        assert_ne!(encode_key("a:b"), encode_key("a_b"));
        assert_eq!(encode_key("kbchat:guest"), "kbchat%3Aguest");
    }
}
