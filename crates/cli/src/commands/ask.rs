//! Ask command handler.
//!
//! One-shot question against the knowledge base.

use super::{orchestrator, print_sources};
use clap::Args;
use kbchat_core::{config::AppConfig, AppError, AppResult};
use kbchat_knowledge::{Question, QueryService};

/// Ask a single question
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: String,

    /// Session token from a previous answer, to continue that conversation
    #[arg(short, long)]
    pub session: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    /// Execute the ask command.
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");
        tracing::debug!("Ask command options: {:?}", self);

        let orchestrator = orchestrator(config)?;
        let question = Question::new(self.question.as_str()).with_session(self.session.clone());

        let response = orchestrator.handle(question).await;

        if self.json {
            let json = serde_json::to_string_pretty(&response)
                .map_err(|e| AppError::Serialization(e.to_string()))?;
            println!("{}", json);
            return Ok(());
        }

        if let Some(error) = response.error {
            return Err(AppError::Provider(error));
        }

        println!("{}", response.answer);
        print_sources(&response.sources);

        if let Some(token) = response.session_token {
            eprintln!("\nContinue with: --session {}", token);
        }
        if let Some(model) = response.model_used {
            tracing::debug!("Answered by model {}", model);
        }

        Ok(())
    }
}
