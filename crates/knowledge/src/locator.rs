//! Document locators.
//!
//! A locator maps a document id to a display name and an expiring download
//! link. Lookups never fail: an unknown document or a backend error yields
//! `None`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kbchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Download reference for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLink {
    /// Human-readable document name
    pub display_name: String,

    /// Time-limited download URL
    pub download_url: String,

    /// When the link stops working
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Trait for document locators.
#[async_trait::async_trait]
pub trait DocumentLocator: Send + Sync {
    /// Get the locator name, for logging.
    fn locator_name(&self) -> &str;

    /// Look up a document. Returns `None` when not found or on any error.
    async fn locate(&self, document_id: &str) -> Option<DocumentLink>;
}

/// Catalog entry for a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Display name
    pub name: String,

    /// Object path relative to the download base URL
    pub path: String,
}

/// Locator that signs links for documents listed in a local catalog.
///
/// Links have the form `{base}/{path}?expires=<unix>&signature=<hex>` where
/// the signature is HMAC-SHA256 keyed with the secret over `path:expires`.
pub struct SignedLinkLocator {
    catalog: HashMap<String, CatalogEntry>,
    base_url: String,
    secret: String,
    ttl: Duration,
}

impl SignedLinkLocator {
    pub fn new(
        catalog: HashMap<String, CatalogEntry>,
        base_url: impl Into<String>,
        secret: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            base_url: base_url.into(),
            secret: secret.into(),
            ttl,
        }
    }

    /// Load the catalog from a YAML map of document id to entry.
    pub fn from_catalog_file(
        path: &Path,
        base_url: impl Into<String>,
        secret: impl Into<String>,
        ttl: Duration,
    ) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Knowledge(format!("Failed to read catalog at {:?}: {}", path, e))
        })?;

        let catalog: HashMap<String, CatalogEntry> =
            serde_yaml::from_str(&content).map_err(|e| {
                AppError::Knowledge(format!("Failed to parse catalog at {:?}: {}", path, e))
            })?;

        tracing::debug!("Loaded document catalog with {} entries", catalog.len());
        Ok(Self::new(catalog, base_url, secret, ttl))
    }

    fn mac(&self, path: &str, expires: i64) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(path.as_bytes());
        mac.update(b":");
        mac.update(expires.to_string().as_bytes());
        Some(mac)
    }

    /// Sign an object path for the given expiry. Returns lowercase hex.
    pub fn sign(&self, path: &str, expires: i64) -> Option<String> {
        let mac = self.mac(path, expires)?;
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a signature produced by [`SignedLinkLocator::sign`] and its expiry.
    /// The comparison runs in constant time.
    pub fn verify(&self, path: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if expires <= now.timestamp() {
            return false;
        }

        match (hex::decode(signature), self.mac(path, expires)) {
            (Ok(bytes), Some(mac)) => mac.verify_slice(&bytes).is_ok(),
            _ => false,
        }
    }

    fn link_for(&self, entry: &CatalogEntry, now: DateTime<Utc>) -> Option<DocumentLink> {
        let ttl = ChronoDuration::from_std(self.ttl).ok()?;
        let expires_at = now + ttl;
        let expires = expires_at.timestamp();
        let path = entry.path.trim_start_matches('/');
        let signature = self.sign(path, expires)?;

        Some(DocumentLink {
            display_name: entry.name.clone(),
            download_url: format!(
                "{}/{}?expires={}&signature={}",
                self.base_url.trim_end_matches('/'),
                path,
                expires,
                signature
            ),
            expires_at: Some(expires_at),
        })
    }
}

#[async_trait::async_trait]
impl DocumentLocator for SignedLinkLocator {
    fn locator_name(&self) -> &str {
        "signed"
    }

    async fn locate(&self, document_id: &str) -> Option<DocumentLink> {
        let entry = self.catalog.get(document_id)?;
        self.link_for(entry, Utc::now())
    }
}

/// Locator backed by a remote document service (`GET {base}/documents/{id}`).
pub struct HttpDocumentLocator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDocumentLocator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Knowledge(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn document_url(&self, document_id: &str) -> String {
        format!(
            "{}/documents/{}",
            self.base_url.trim_end_matches('/'),
            document_id
        )
    }

    async fn fetch(&self, document_id: &str) -> AppResult<Option<DocumentLink>> {
        let response = self
            .client
            .get(self.document_url(document_id))
            .send()
            .await
            .map_err(|e| AppError::Knowledge(format!("Document lookup failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(AppError::Knowledge(format!(
                "Document service returned {}",
                response.status()
            )));
        }

        let link = response
            .json()
            .await
            .map_err(|e| AppError::Knowledge(format!("Failed to parse document link: {}", e)))?;

        Ok(Some(link))
    }
}

#[async_trait::async_trait]
impl DocumentLocator for HttpDocumentLocator {
    fn locator_name(&self) -> &str {
        "http"
    }

    async fn locate(&self, document_id: &str) -> Option<DocumentLink> {
        match self.fetch(document_id).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(document_id, "Document lookup failed: {}", e);
                None
            }
        }
    }
}
