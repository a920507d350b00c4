//! History command handler.
//!
//! Shows or clears a saved conversation.

use super::{client_options, conversation_store, print_sources, scope};
use clap::{Args, Subcommand};
use kbchat_chat::{QueryClient, Role};
use kbchat_core::{config::AppConfig, AppError, AppResult};

/// Show or clear a saved conversation
#[derive(Args, Debug)]
pub struct HistoryCommand {
    #[command(subcommand)]
    pub action: HistoryAction,
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// Print the saved messages
    Show(HistoryShowCommand),
    /// Delete the saved messages and session
    Clear(HistoryClearCommand),
}

impl HistoryCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            HistoryAction::Show(cmd) => cmd.execute(config),
            HistoryAction::Clear(cmd) => cmd.execute(config),
        }
    }
}

/// Print the saved messages
#[derive(Args, Debug)]
pub struct HistoryShowCommand {
    /// User identity (default: guest)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Conversation id (default: "default")
    #[arg(long)]
    pub conversation: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl HistoryShowCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing history show command");

        let client = QueryClient::open(
            conversation_store(config)?,
            scope(self.user.clone(), self.conversation.clone()),
            client_options(config),
        );

        if self.json {
            let json = serde_json::to_string_pretty(client.messages())
                .map_err(|e| AppError::Serialization(e.to_string()))?;
            println!("{}", json);
            return Ok(());
        }

        if client.messages().is_empty() {
            println!("No saved messages.");
            return Ok(());
        }

        for message in client.messages() {
            let who = match message.role {
                Role::User => "you",
                Role::Assistant => "kb",
            };
            println!(
                "[{}] {}: {}",
                message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                who,
                message.content
            );
            print_sources(&message.sources);
        }

        Ok(())
    }
}

/// Delete the saved messages and session
#[derive(Args, Debug)]
pub struct HistoryClearCommand {
    /// User identity (default: guest)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Conversation id (default: "default")
    #[arg(long)]
    pub conversation: Option<String>,
}

impl HistoryClearCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing history clear command");

        let mut client = QueryClient::open(
            conversation_store(config)?,
            scope(self.user.clone(), self.conversation.clone()),
            client_options(config),
        );
        client
            .clear()
            .map_err(|e| AppError::Storage(e.to_string()))?;

        println!("Cleared conversation {}", client.scope().conversation_id);
        Ok(())
    }
}
