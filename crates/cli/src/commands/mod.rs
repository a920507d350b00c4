//! Command handlers for the kbchat CLI.
//!
//! This module organizes all CLI commands into separate submodules.

pub mod ask;
pub mod chat;
pub mod history;

// Re-export command types for convenience
pub use ask::AskCommand;
pub use chat::ChatCommand;
pub use history::HistoryCommand;

use kbchat_chat::{ClientOptions, ConversationScope, FileStore, KeyValueStore};
use kbchat_core::{config::AppConfig, AppResult};
use kbchat_knowledge::{AppContext, QueryOrchestrator, Source};
use std::sync::Arc;
use std::time::Duration;

/// Build the query orchestrator from configuration.
fn orchestrator(config: &AppConfig) -> AppResult<QueryOrchestrator> {
    let context = AppContext::from_config(config)?;
    Ok(QueryOrchestrator::new(Arc::new(context)))
}

/// Open the file-backed conversation store.
fn conversation_store(config: &AppConfig) -> AppResult<Arc<dyn KeyValueStore>> {
    let store = FileStore::open(config.conversations_dir())?;
    tracing::debug!("Conversation store: {:?}", store.root());
    Ok(Arc::new(store))
}

fn client_options(config: &AppConfig) -> ClientOptions {
    ClientOptions {
        max_messages: config.history.max_messages,
        session_inactivity: Duration::from_secs(config.session.inactivity_secs),
    }
}

/// Scope for a user and conversation; a missing id means the default conversation.
fn scope(user: Option<String>, conversation: Option<String>) -> ConversationScope {
    ConversationScope::new(user, conversation.unwrap_or_else(|| "default".to_string()))
}

/// Print sources as a numbered list.
fn print_sources(sources: &[Source]) {
    if sources.is_empty() {
        return;
    }

    println!("\nSources:");
    for (i, source) in sources.iter().enumerate() {
        let name = source.display_name.as_deref().unwrap_or(&source.document_id);
        match source.segment_label {
            Some(page) => println!("  [{}] {} (page {})", i + 1, name, page),
            None => println!("  [{}] {}", i + 1, name),
        }
        println!("      {}", source.snippet.replace('\n', " "));
        if let Some(ref url) = source.download_url {
            println!("      {}", url);
        }
    }
}
