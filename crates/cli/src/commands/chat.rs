//! Chat command handler.
//!
//! Interactive conversation over stdin with a persisted history.

use super::{client_options, conversation_store, orchestrator, print_sources, scope};
use clap::Args;
use kbchat_chat::{ClientError, ClientState, QueryClient, Role};
use kbchat_core::{config::AppConfig, AppResult};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "Commands: /retry, /dismiss, /new, /quit";

/// Interactive conversation
#[derive(Args, Debug)]
pub struct ChatCommand {
    /// User identity (default: guest)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Conversation to resume (default: "default")
    #[arg(long)]
    pub conversation: Option<String>,
}

impl ChatCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing chat command");

        let service = orchestrator(config)?;
        let mut client = QueryClient::open(
            conversation_store(config)?,
            scope(self.user.clone(), self.conversation.clone()),
            client_options(config),
        );

        println!(
            "Conversation {} ({} saved messages). {}",
            client.scope().conversation_id,
            client.messages().len(),
            HELP
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let input = line.trim();
            let outcome = match input {
                "" => continue,
                "/quit" | "/exit" => break,
                "/help" => {
                    println!("{}", HELP);
                    continue;
                }
                "/dismiss" => {
                    client.dismiss_error();
                    continue;
                }
                "/new" => {
                    client.new_conversation().map(|_| {
                        println!("Started conversation {}", client.scope().conversation_id)
                    })
                }
                "/retry" => client.retry(&service).await,
                question => client.submit(&service, question).await,
            };

            match outcome {
                Ok(()) => render(&client),
                Err(ClientError::NoRetryAvailable) => println!("Nothing to retry."),
                Err(e) => println!("{}", e),
            }
        }

        Ok(())
    }
}

/// Print the latest answer or the current error.
fn render(client: &QueryClient) {
    match client.state() {
        ClientState::Failed(error) => {
            if error.retryable {
                println!(
                    "Error: {} (/retry, {} left)",
                    error.message,
                    error.retries_left()
                );
            } else {
                println!("Error: {}", error.message);
            }
        }
        _ => {
            if let Some(message) = client.messages().last() {
                if message.role == Role::Assistant {
                    println!("{}", message.content);
                    print_sources(&message.sources);
                }
            }
        }
    }
}
