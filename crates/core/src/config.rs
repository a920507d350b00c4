//! Configuration management for kbchat.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Built-in defaults
//! - Config file (.kbchat/config.yaml)
//! - Environment variables
//! - Command-line flags
//!
//! The configuration is workspace-centric, with local state stored in `.kbchat/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Model used whenever the configuration resolver cannot produce one.
pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-haiku-20240307-v1:0";

/// Upper bound for the effective-settings cache lifetime.
pub const MAX_SETTINGS_TTL_SECS: u64 = 60;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .kbchat/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// RAG provider settings
    pub rag: RagConfig,

    /// Configuration resolver settings
    pub settings: SettingsConfig,

    /// Document access settings
    pub documents: DocumentsConfig,

    /// Provider session settings
    pub session: SessionConfig,

    /// Conversation history settings
    pub history: HistoryConfig,
}

/// RAG provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagConfig {
    /// Provider kind ("http" or "mock")
    #[serde(default = "default_rag_provider")]
    pub provider: String,

    /// Base URL of the retrieve-and-generate service
    #[serde(default = "default_rag_endpoint")]
    pub endpoint: String,

    /// Knowledge base queried by every request
    #[serde(default = "default_knowledge_base_id")]
    pub knowledge_base_id: String,

    /// Environment variable holding the provider API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_rag_timeout")]
    pub timeout_secs: u64,
}

fn default_rag_provider() -> String {
    "http".to_string()
}

fn default_rag_endpoint() -> String {
    "http://localhost:8080".to_string()
}

fn default_knowledge_base_id() -> String {
    "default".to_string()
}

fn default_rag_timeout() -> u64 {
    60
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            provider: default_rag_provider(),
            endpoint: default_rag_endpoint(),
            knowledge_base_id: default_knowledge_base_id(),
            api_key_env: None,
            timeout_secs: default_rag_timeout(),
        }
    }
}

/// Where effective model settings come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsConfig {
    /// Model used when the settings source is unavailable
    #[serde(default = "default_model")]
    pub default_model: String,

    /// YAML file holding the live settings
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// HTTP endpoint returning the live settings as JSON
    #[serde(default)]
    pub url: Option<String>,

    /// Cache lifetime for resolved settings, at most 60 seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_cache_ttl() -> u64 {
    MAX_SETTINGS_TTL_SECS
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            file: None,
            url: None,
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

/// Document locator backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorKind {
    /// Signed links built from a local catalog
    Signed,
    /// Remote document service
    Http,
}

/// Document access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentsConfig {
    /// Default for the document-access feature flag when settings do not say
    #[serde(default)]
    pub enabled: bool,

    /// Locator backend; no locator means no download links
    #[serde(default)]
    pub locator: Option<LocatorKind>,

    /// Catalog file mapping document ids to names and storage paths (signed locator)
    #[serde(default)]
    pub catalog: Option<PathBuf>,

    /// Base URL for download links (signed) or document service (http)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the link signing secret
    #[serde(default = "default_signing_key_env")]
    pub signing_key_env: String,

    /// Lifetime of generated links in seconds
    #[serde(default = "default_link_ttl")]
    pub link_ttl_secs: u64,

    /// Per-document lookup timeout in milliseconds
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_ms: u64,
}

fn default_signing_key_env() -> String {
    "KBCHAT_SIGNING_KEY".to_string()
}

fn default_link_ttl() -> u64 {
    900
}

fn default_lookup_timeout() -> u64 {
    2000
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            locator: None,
            catalog: None,
            base_url: None,
            signing_key_env: default_signing_key_env(),
            link_ttl_secs: default_link_ttl(),
            lookup_timeout_ms: default_lookup_timeout(),
        }
    }
}

/// Provider session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Inactivity after which the provider is assumed to have dropped a session
    #[serde(default = "default_inactivity")]
    pub inactivity_secs: u64,
}

fn default_inactivity() -> u64 {
    3600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_secs: default_inactivity(),
        }
    }
}

/// Conversation history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Messages kept per conversation
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Directory for persisted conversations (defaults to .kbchat/conversations)
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

fn default_max_messages() -> usize {
    50
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            store_dir: None,
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    rag: Option<RagConfig>,
    settings: Option<SettingsConfig>,
    documents: Option<DocumentsConfig>,
    session: Option<SessionConfig>,
    history: Option<HistoryConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            log_level: None,
            verbose: false,
            no_color: false,
            rag: RagConfig::default(),
            settings: SettingsConfig::default(),
            documents: DocumentsConfig::default(),
            session: SessionConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the config file and environment variables.
    ///
    /// Environment variables:
    /// - `KBCHAT_WORKSPACE`: Override workspace path
    /// - `KBCHAT_CONFIG`: Path to config file
    /// - `KBCHAT_PROVIDER`: RAG provider kind
    /// - `KBCHAT_ENDPOINT`: RAG provider endpoint
    /// - `KBCHAT_KNOWLEDGE_BASE`: Knowledge base id
    /// - `KBCHAT_DEFAULT_MODEL`: Fallback model id
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use kbchat_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Knowledge base: {}", config.rag.knowledge_base_id);
    /// ```
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("KBCHAT_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("KBCHAT_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = match config.config_file {
            Some(ref cf) => cf.clone(),
            None => config.workspace.join(".kbchat/config.yaml"),
        };

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(provider) = std::env::var("KBCHAT_PROVIDER") {
            config.rag.provider = provider;
        }

        if let Ok(endpoint) = std::env::var("KBCHAT_ENDPOINT") {
            config.rag.endpoint = endpoint;
        }

        if let Ok(kb) = std::env::var("KBCHAT_KNOWLEDGE_BASE") {
            config.rag.knowledge_base_id = kb;
        }

        if let Ok(model) = std::env::var("KBCHAT_DEFAULT_MODEL") {
            config.settings.default_model = model;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(rag) = config_file.rag {
            result.rag = rag;
        }
        if let Some(settings) = config_file.settings {
            result.settings = settings;
        }
        if let Some(documents) = config_file.documents {
            result.documents = documents;
        }
        if let Some(session) = config_file.session {
            result.session = session;
        }
        if let Some(history) = config_file.history {
            result.history = history;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over environment variables and the config file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        endpoint: Option<String>,
        knowledge_base: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(endpoint) = endpoint {
            self.rag.endpoint = endpoint;
        }

        if let Some(provider) = provider {
            self.rag.provider = provider;
        }

        if let Some(kb) = knowledge_base {
            self.rag.knowledge_base_id = kb;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .kbchat directory.
    pub fn kbchat_dir(&self) -> PathBuf {
        self.workspace.join(".kbchat")
    }

    /// Ensure the .kbchat directory exists.
    pub fn ensure_kbchat_dir(&self) -> AppResult<()> {
        let dir = self.kbchat_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create .kbchat directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Directory holding persisted conversations.
    pub fn conversations_dir(&self) -> PathBuf {
        self.history
            .store_dir
            .clone()
            .unwrap_or_else(|| self.kbchat_dir().join("conversations"))
    }

    /// Resolve the provider API key from its environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.rag
            .api_key_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var).ok())
    }

    /// Resolve the document link signing secret.
    pub fn resolve_signing_key(&self) -> Option<String> {
        std::env::var(&self.documents.signing_key_env).ok()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> AppResult<()> {
        if self.rag.endpoint.trim().is_empty() {
            return Err(AppError::Config("RAG endpoint must not be empty".to_string()));
        }

        if self.rag.knowledge_base_id.trim().is_empty() {
            return Err(AppError::Config(
                "Knowledge base id must not be empty".to_string(),
            ));
        }

        if self.settings.cache_ttl_secs > MAX_SETTINGS_TTL_SECS {
            return Err(AppError::Config(format!(
                "settings.cacheTtlSecs must be at most {} (got {})",
                MAX_SETTINGS_TTL_SECS, self.settings.cache_ttl_secs
            )));
        }

        if self.history.max_messages == 0 {
            return Err(AppError::Config(
                "history.maxMessages must be greater than zero".to_string(),
            ));
        }

        if self.documents.lookup_timeout_ms == 0 {
            return Err(AppError::Config(
                "documents.lookupTimeoutMs must be greater than zero".to_string(),
            ));
        }

        match self.documents.locator {
            Some(LocatorKind::Signed) => {
                if self.documents.catalog.is_none() || self.documents.base_url.is_none() {
                    return Err(AppError::Config(
                        "Signed document locator requires documents.catalog and documents.baseUrl"
                            .to_string(),
                    ));
                }
            }
            Some(LocatorKind::Http) => {
                if self.documents.base_url.is_none() {
                    return Err(AppError::Config(
                        "HTTP document locator requires documents.baseUrl".to_string(),
                    ));
                }
            }
            None => {}
        }

        Ok(())
    }
}
