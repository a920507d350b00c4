//! Citation resolution.
//!
//! Turns raw provider citations into deduplicated [`Source`] records.
//!
//! Location identifiers follow this grammar:
//!
//! ```text
//! location    = [ scheme "://" ] container "/" document-id [ "/" rest ]
//! rest        = *( segment "/" ) [ "pages/page-" digits [ "." ext ] ]
//! ```
//!
//! The document id is the first path segment after the container. When the
//! identifier ends in a numbered page file inside a `pages` directory, the
//! page number becomes the segment label. Anything else has no label.
//! Identifiers that do not match the grammar are skipped one by one; they
//! never fail the batch.

use crate::error::ErrorKind;
use crate::locator::{DocumentLink, DocumentLocator};
use crate::types::{dedup_key, EffectiveSettings, Source, MAX_SNIPPET_CHARS};
use futures::future::join_all;
use kbchat_rag::RawCitation;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Directory holding per-page files of a paginated document.
pub const PAGES_DIR: &str = "pages";

/// File name prefix of a page file.
pub const PAGE_FILE_PREFIX: &str = "page-";

/// Metadata keys consulted when a citation carries no explicit location.
const METADATA_URI_KEYS: [&str; 3] = ["sourceUri", "source_uri", "x-amz-bedrock-kb-source-uri"];

/// Parsed location of a cited segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationLocation {
    pub document_id: String,
    pub segment_label: Option<u32>,
}

/// Parse a location identifier. Returns `None` when it does not match the grammar.
pub fn parse_location(uri: &str) -> Option<CitationLocation> {
    let trimmed = uri.trim();
    let path = match trimmed.split_once("://") {
        Some((scheme, rest)) if is_scheme(scheme) => rest,
        Some(_) => return None,
        None => trimmed,
    };

    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // container + document id
    if segments.len() < 2 {
        return None;
    }

    let document_id = segments[1];
    if document_id.chars().any(char::is_whitespace) {
        return None;
    }

    let segment_label = match segments.len() {
        n if n >= 4 && segments[n - 2] == PAGES_DIR => parse_page_number(segments[n - 1]),
        _ => None,
    };

    Some(CitationLocation {
        document_id: document_id.to_string(),
        segment_label,
    })
}

fn is_scheme(scheme: &str) -> bool {
    !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Parse `page-<digits>[.<ext>]`.
fn parse_page_number(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_prefix(PAGE_FILE_PREFIX)?;
    let digits = match stem.split_once('.') {
        Some((digits, _ext)) => digits,
        None => stem,
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok()
}

/// Location identifier of a raw citation, falling back to metadata.
fn extract_location(citation: &RawCitation) -> Option<&str> {
    citation
        .location_uri
        .as_deref()
        .filter(|uri| !uri.trim().is_empty())
        .or_else(|| {
            METADATA_URI_KEYS
                .iter()
                .find_map(|key| citation.metadata.get(*key).and_then(|v| v.as_str()))
                .filter(|uri| !uri.trim().is_empty())
        })
}

/// Keep the first 200 characters of a snippet.
pub fn truncate_snippet(text: &str) -> String {
    text.chars().take(MAX_SNIPPET_CHARS).collect()
}

/// Parse, deduplicate and truncate raw citations without any I/O.
///
/// Output preserves first-seen order and never exceeds the input length.
/// `download_allowed` mirrors the document-access flag; links are added by
/// [`CitationResolver::resolve`].
pub fn prepare_sources(citations: &[RawCitation], document_access: bool) -> Vec<Source> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for citation in citations {
        let Some(uri) = extract_location(citation) else {
            tracing::debug!(
                kind = ErrorKind::CitationParseFailure.as_str(),
                "Skipping citation without location"
            );
            continue;
        };

        let Some(location) = parse_location(uri) else {
            tracing::debug!(
                kind = ErrorKind::CitationParseFailure.as_str(),
                uri,
                "Skipping citation with unparsable location"
            );
            continue;
        };

        let key = dedup_key(&location.document_id, location.segment_label);
        if !seen.insert(key) {
            continue;
        }

        sources.push(Source {
            document_id: location.document_id,
            segment_label: location.segment_label,
            location_uri: uri.to_string(),
            snippet: truncate_snippet(&citation.snippet_text),
            display_name: None,
            download_url: None,
            download_allowed: document_access,
        });
    }

    sources
}

/// Resolves raw citations into sources, enriching them with download links.
pub struct CitationResolver {
    locator: Option<Arc<dyn DocumentLocator>>,
    lookup_timeout: Duration,
}

impl CitationResolver {
    pub fn new(locator: Option<Arc<dyn DocumentLocator>>, lookup_timeout: Duration) -> Self {
        Self {
            locator,
            lookup_timeout,
        }
    }

    /// Resolver that never produces download links.
    pub fn without_locator() -> Self {
        Self::new(None, Duration::ZERO)
    }

    /// Resolve citations under the given settings.
    ///
    /// Locator lookups run concurrently, one per distinct document, each
    /// bounded by the lookup timeout. A failed or slow lookup only leaves
    /// that document without a link.
    pub async fn resolve(
        &self,
        citations: &[RawCitation],
        settings: &EffectiveSettings,
    ) -> Vec<Source> {
        let mut sources = prepare_sources(citations, settings.document_access);

        if !settings.document_access || sources.is_empty() {
            return sources;
        }

        let Some(locator) = self.locator.as_ref() else {
            return sources;
        };

        let mut document_ids: Vec<String> = Vec::new();
        for source in &sources {
            if !document_ids.contains(&source.document_id) {
                document_ids.push(source.document_id.clone());
            }
        }

        let lookups = document_ids.iter().map(|id| self.lookup(locator.as_ref(), id));
        let links: HashMap<&str, DocumentLink> = document_ids
            .iter()
            .map(String::as_str)
            .zip(join_all(lookups).await)
            .filter_map(|(id, link)| link.map(|l| (id, l)))
            .collect();

        tracing::debug!(
            locator = locator.locator_name(),
            "Resolved {} of {} document links",
            links.len(),
            document_ids.len()
        );

        for source in &mut sources {
            if let Some(link) = links.get(source.document_id.as_str()) {
                source.display_name = Some(link.display_name.clone());
                source.download_url = Some(link.download_url.clone());
            }
        }

        sources
    }

    async fn lookup(
        &self,
        locator: &dyn DocumentLocator,
        document_id: &str,
    ) -> Option<DocumentLink> {
        match tokio::time::timeout(self.lookup_timeout, locator.locate(document_id)).await {
            Ok(link) => link,
            Err(_) => {
                tracing::warn!(
                    document_id,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Document lookup timed out"
                );
                None
            }
        }
    }
}
