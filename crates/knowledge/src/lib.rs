//! Knowledge base query pipeline.
//!
//! Answers questions against a managed RAG provider, carries the provider's
//! session token between turns and turns raw citations into deduplicated
//! sources with optional download links.

pub mod citations;
pub mod context;
pub mod error;
pub mod locator;
pub mod orchestrator;
pub mod settings;
pub mod types;

// Re-export commonly used types
pub use citations::{parse_location, prepare_sources, CitationLocation, CitationResolver};
pub use context::AppContext;
pub use error::{ErrorKind, QueryError};
pub use locator::{DocumentLink, DocumentLocator, HttpDocumentLocator, SignedLinkLocator};
pub use orchestrator::{QueryOrchestrator, QueryService};
pub use settings::{
    CachedConfigResolver, ConfigurationResolver, HttpSettingsSource, RemoteSettings,
    SettingsSource, YamlSettingsSource,
};
pub use types::{ChatResponse, EffectiveSettings, Question, Source};
