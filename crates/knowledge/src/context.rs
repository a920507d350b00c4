//! Process-wide collaborators for the query pipeline.
//!
//! The context is built once at startup from [`AppConfig`] and shared by
//! reference; nothing here is a global.

use crate::citations::CitationResolver;
use crate::locator::{DocumentLocator, HttpDocumentLocator, SignedLinkLocator};
use crate::settings::{
    CachedConfigResolver, ConfigurationResolver, HttpSettingsSource, SettingsSource,
    YamlSettingsSource,
};
use crate::types::EffectiveSettings;
use kbchat_core::config::LocatorKind;
use kbchat_core::{AppConfig, AppError, AppResult};
use kbchat_rag::{create_provider, RagProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Timeout for settings lookups.
const SETTINGS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators shared by every query.
pub struct AppContext {
    /// RAG provider
    pub provider: Arc<dyn RagProvider>,

    /// Effective model and feature-flag resolver
    pub configuration: Arc<dyn ConfigurationResolver>,

    /// Citation resolver with its optional locator
    pub citations: CitationResolver,

    /// Knowledge base queried by every request
    pub knowledge_base_id: String,
}

impl AppContext {
    pub fn new(
        provider: Arc<dyn RagProvider>,
        configuration: Arc<dyn ConfigurationResolver>,
        citations: CitationResolver,
        knowledge_base_id: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            configuration,
            citations,
            knowledge_base_id: knowledge_base_id.into(),
        }
    }

    /// Build the context from application configuration.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let provider = create_provider(
            &config.rag.provider,
            Some(&config.rag.endpoint),
            config.resolve_api_key(),
            Duration::from_secs(config.rag.timeout_secs),
        )?;

        let configuration: Arc<dyn ConfigurationResolver> = Arc::new(CachedConfigResolver::new(
            settings_source(config)?,
            EffectiveSettings {
                model_id: config.settings.default_model.clone(),
                document_access: config.documents.enabled,
            },
            Duration::from_secs(config.settings.cache_ttl_secs),
        ));

        let citations = CitationResolver::new(
            document_locator(config)?,
            Duration::from_millis(config.documents.lookup_timeout_ms),
        );

        tracing::debug!(
            provider = provider.provider_name(),
            knowledge_base = %config.rag.knowledge_base_id,
            "Built query context"
        );

        Ok(Self::new(
            provider,
            configuration,
            citations,
            config.rag.knowledge_base_id.clone(),
        ))
    }
}

/// Resolve a possibly relative path against the workspace.
fn in_workspace(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

fn settings_source(config: &AppConfig) -> AppResult<Option<Arc<dyn SettingsSource>>> {
    if let Some(ref file) = config.settings.file {
        let source: Arc<dyn SettingsSource> =
            Arc::new(YamlSettingsSource::new(in_workspace(&config.workspace, file)));
        return Ok(Some(source));
    }

    if let Some(ref url) = config.settings.url {
        let source: Arc<dyn SettingsSource> =
            Arc::new(HttpSettingsSource::new(url.clone(), SETTINGS_FETCH_TIMEOUT)?);
        return Ok(Some(source));
    }

    Ok(None)
}

fn document_locator(config: &AppConfig) -> AppResult<Option<Arc<dyn DocumentLocator>>> {
    let documents = &config.documents;
    let timeout = Duration::from_millis(documents.lookup_timeout_ms);

    match documents.locator {
        None => Ok(None),
        Some(LocatorKind::Signed) => {
            let catalog = documents.catalog.as_ref().ok_or_else(|| {
                AppError::Config("Signed document locator requires a catalog".to_string())
            })?;
            let base_url = documents.base_url.clone().ok_or_else(|| {
                AppError::Config("Signed document locator requires a base URL".to_string())
            })?;
            let secret = config.resolve_signing_key().ok_or_else(|| {
                AppError::Config(format!(
                    "Signing key not found in environment variable: {}",
                    documents.signing_key_env
                ))
            })?;

            let locator: Arc<dyn DocumentLocator> = Arc::new(SignedLinkLocator::from_catalog_file(
                &in_workspace(&config.workspace, catalog),
                base_url,
                secret,
                Duration::from_secs(documents.link_ttl_secs),
            )?);
            Ok(Some(locator))
        }
        Some(LocatorKind::Http) => {
            let base_url = documents.base_url.clone().ok_or_else(|| {
                AppError::Config("HTTP document locator requires a base URL".to_string())
            })?;
            let locator: Arc<dyn DocumentLocator> =
                Arc::new(HttpDocumentLocator::new(base_url, timeout)?);
            Ok(Some(locator))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(temp: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.workspace = temp.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_from_default_config() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);

        let context = AppContext::from_config(&config).unwrap();
        assert_eq!(context.provider.provider_name(), "http");
        assert_eq!(context.knowledge_base_id, "default");
        assert_eq!(
            context.configuration.effective_model().await,
            config.settings.default_model
        );
    }

    #[tokio::test]
    async fn test_settings_file_is_workspace_relative() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("settings.yaml"), "modelId: from-file\n").unwrap();

        let mut config = config_in(&temp);
        config.rag.provider = "mock".to_string();
        config.settings.file = Some(PathBuf::from("settings.yaml"));

        let context = AppContext::from_config(&config).unwrap();
        assert_eq!(context.configuration.effective_model().await, "from-file");
    }

    #[test]
    fn test_signed_locator_requires_secret() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("catalog.yaml"), "{}\n").unwrap();

        let mut config = config_in(&temp);
        config.documents.locator = Some(LocatorKind::Signed);
        config.documents.catalog = Some(PathBuf::from("catalog.yaml"));
        config.documents.base_url = Some("https://files".to_string());
        config.documents.signing_key_env = "KBCHAT_TEST_UNSET_SIGNING_KEY".to_string();

        match AppContext::from_config(&config) {
            Err(err) => assert!(err.to_string().contains("Signing key not found")),
            Ok(_) => panic!("Expected error without signing key"),
        }
    }

    #[test]
    fn test_http_locator_from_config() {
        let temp = TempDir::new().unwrap();
        let mut config = config_in(&temp);
        config.documents.locator = Some(LocatorKind::Http);
        config.documents.base_url = Some("https://docs.example.com".to_string());

        assert!(AppContext::from_config(&config).is_ok());
    }
}
