//! kbchat CLI
//!
//! Main entry point for the kbchat command-line tool.
//! Asks questions against a managed knowledge base and keeps conversations.

mod commands;

use clap::{Parser, Subcommand};
use commands::{AskCommand, ChatCommand, HistoryCommand};
use kbchat_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// kbchat - conversational knowledge base queries
#[derive(Parser, Debug)]
#[command(name = "kbchat")]
#[command(about = "Conversational knowledge base queries with cited sources", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "KBCHAT_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "KBCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// RAG provider (http, mock)
    #[arg(short, long, global = true, env = "KBCHAT_PROVIDER")]
    provider: Option<String>,

    /// RAG provider endpoint
    #[arg(short, long, global = true, env = "KBCHAT_ENDPOINT")]
    endpoint: Option<String>,

    /// Knowledge base identifier
    #[arg(short, long, global = true, env = "KBCHAT_KNOWLEDGE_BASE")]
    knowledge_base: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask a single question
    Ask(AskCommand),

    /// Interactive conversation
    Chat(ChatCommand),

    /// Show or clear a saved conversation
    History(HistoryCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from environment
    let config = AppConfig::load()?;

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.provider,
        cli.endpoint,
        cli.knowledge_base,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color, cli.log_json)?;

    tracing::info!("kbchat starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Provider: {}", config.rag.provider);
    tracing::debug!("Knowledge base: {}", config.rag.knowledge_base_id);

    config.validate()?;
    config.ensure_kbchat_dir()?;

    let command_name = match &cli.command {
        Commands::Ask(_) => "ask",
        Commands::Chat(_) => "chat",
        Commands::History(_) => "history",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Chat(cmd) => cmd.execute(&config).await,
        Commands::History(cmd) => cmd.execute(&config),
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
