//! Effective model and feature-flag resolution.
//!
//! Settings are read from a pluggable [`SettingsSource`] and cached for a
//! short TTL. Resolution never fails: any source error degrades to the
//! configured defaults.

use crate::error::ErrorKind;
use crate::types::EffectiveSettings;
use kbchat_core::config::MAX_SETTINGS_TTL_SECS;
use kbchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Settings as published by a settings source. Missing fields keep defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    #[serde(default)]
    pub model_id: Option<String>,

    #[serde(default)]
    pub document_access: Option<bool>,
}

/// Trait for settings sources.
#[async_trait::async_trait]
pub trait SettingsSource: Send + Sync {
    /// Get the source name, for logging.
    fn source_name(&self) -> &str;

    /// Fetch the current settings.
    async fn fetch(&self) -> AppResult<RemoteSettings>;
}

/// Settings read from a YAML file on every fetch.
pub struct YamlSettingsSource {
    path: PathBuf,
}

impl YamlSettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl SettingsSource for YamlSettingsSource {
    fn source_name(&self) -> &str {
        "yaml"
    }

    async fn fetch(&self) -> AppResult<RemoteSettings> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AppError::Knowledge(format!(
                "Failed to read settings at {:?}: {}",
                self.path, e
            ))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            AppError::Knowledge(format!(
                "Failed to parse settings at {:?}: {}",
                self.path, e
            ))
        })
    }
}

/// Settings fetched as JSON from an HTTP endpoint.
pub struct HttpSettingsSource {
    url: String,
    client: reqwest::Client,
}

impl HttpSettingsSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Knowledge(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl SettingsSource for HttpSettingsSource {
    fn source_name(&self) -> &str {
        "http"
    }

    async fn fetch(&self) -> AppResult<RemoteSettings> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AppError::Knowledge(format!("Settings request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Knowledge(format!(
                "Settings endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Knowledge(format!("Failed to parse settings: {}", e)))
    }
}

/// Trait for resolving the settings in effect.
///
/// Implementations must not fail; they return documented defaults instead.
#[async_trait::async_trait]
pub trait ConfigurationResolver: Send + Sync {
    /// Resolve model id and feature flags.
    async fn effective_settings(&self) -> EffectiveSettings;

    /// Resolve only the model id.
    async fn effective_model(&self) -> String {
        self.effective_settings().await.model_id
    }
}

struct CachedSettings {
    settings: EffectiveSettings,
    fetched_at: Instant,
}

/// TTL-cached resolver over an optional settings source.
pub struct CachedConfigResolver {
    source: Option<Arc<dyn SettingsSource>>,
    defaults: EffectiveSettings,
    ttl: Duration,
    cache: Mutex<Option<CachedSettings>>,
}

impl CachedConfigResolver {
    /// Create a resolver. The TTL is capped at 60 seconds.
    pub fn new(
        source: Option<Arc<dyn SettingsSource>>,
        defaults: EffectiveSettings,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            defaults,
            ttl: ttl.min(Duration::from_secs(MAX_SETTINGS_TTL_SECS)),
            cache: Mutex::new(None),
        }
    }

    /// Resolver that always returns the defaults.
    pub fn fixed(defaults: EffectiveSettings) -> Self {
        Self::new(None, defaults, Duration::ZERO)
    }

    /// Drop the cached value so the next call refetches.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    fn merge(&self, remote: RemoteSettings) -> EffectiveSettings {
        EffectiveSettings {
            model_id: remote
                .model_id
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| self.defaults.model_id.clone()),
            document_access: remote
                .document_access
                .unwrap_or(self.defaults.document_access),
        }
    }
}

#[async_trait::async_trait]
impl ConfigurationResolver for CachedConfigResolver {
    async fn effective_settings(&self) -> EffectiveSettings {
        let Some(source) = self.source.as_ref() else {
            return self.defaults.clone();
        };

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return cached.settings.clone();
            }
        }

        match source.fetch().await {
            Ok(remote) => {
                let settings = self.merge(remote);
                tracing::debug!(
                    source = source.source_name(),
                    model = %settings.model_id,
                    document_access = settings.document_access,
                    "Resolved effective settings"
                );
                *cache = Some(CachedSettings {
                    settings: settings.clone(),
                    fetched_at: Instant::now(),
                });
                settings
            }
            Err(e) => {
                tracing::warn!(
                    source = source.source_name(),
                    kind = ErrorKind::ConfigUnavailable.as_str(),
                    "Settings unavailable, using defaults: {}",
                    e
                );
                self.defaults.clone()
            }
        }
    }
}
