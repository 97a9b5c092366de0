//! Content Filter: decides which fetched pages become Raw Documents.
//!
//! Reject reasons are checked in a fixed order and the first match wins:
//! `non_english`, `static_asset`, `empty_body`. Classification is pure;
//! the only side effect is a debug log line per reject.

pub mod clean;

use tracing::debug;

use sitecorpus_crawler::{FetchedPage, mime_essence};
use sitecorpus_shared::{FilterConfig, RawDocument, Result};

pub use clean::{TextCleaner, fingerprint, normalize_for_fingerprint};

/// Title used when the renderer found none.
const UNTITLED: &str = "Untitled";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Why a page was not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RejectReason {
    /// Detected language differs from the target language.
    NonEnglish,
    /// Content type is on the asset denylist.
    StaticAsset,
    /// Too few words after cleanup.
    EmptyBody,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonEnglish => "non_english",
            Self::StaticAsset => "static_asset",
            Self::EmptyBody => "empty_body",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one fetched page.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Keep(RawDocument),
    Reject(RejectReason),
}

// ---------------------------------------------------------------------------
// ContentFilter
// ---------------------------------------------------------------------------

/// One `asset_denylist` entry.
#[derive(Debug, Clone)]
enum DenyRule {
    /// `type/subtype`, matched exactly.
    Exact(String),
    /// `type/*`, matched on the top-level type.
    TopLevel(String),
}

impl DenyRule {
    fn parse(entry: &str) -> Self {
        let entry = mime_essence(entry);
        match entry.strip_suffix("/*") {
            Some(top) => Self::TopLevel(top.to_string()),
            None => Self::Exact(entry),
        }
    }

    fn matches(&self, essence: &str) -> bool {
        match self {
            Self::Exact(t) => essence == t,
            Self::TopLevel(top) => essence
                .split_once('/')
                .is_some_and(|(t, _)| t == top),
        }
    }
}

/// Keep/reject classifier configured from [`FilterConfig`].
#[derive(Debug, Clone)]
pub struct ContentFilter {
    target_language: String,
    denylist: Vec<DenyRule>,
    min_words: usize,
    cleaner: TextCleaner,
}

impl ContentFilter {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        Ok(Self {
            target_language: primary_subtag(&config.target_language),
            denylist: config.asset_denylist.iter().map(|e| DenyRule::parse(e)).collect(),
            min_words: config.min_words.max(1),
            cleaner: TextCleaner::new(&config.strip_patterns)?,
        })
    }

    /// Classify a fetched page.
    pub fn classify(&self, page: &FetchedPage) -> Classification {
        match self.check(page) {
            Ok(doc) => Classification::Keep(doc),
            Err(reason) => {
                debug!(
                    url = %page.url,
                    reason = reason.as_str(),
                    content_type = %page.content_type,
                    language = page.language.as_deref().unwrap_or("-"),
                    "page rejected"
                );
                Classification::Reject(reason)
            }
        }
    }

    fn check(&self, page: &FetchedPage) -> std::result::Result<RawDocument, RejectReason> {
        if let Some(tag) = page.language.as_deref() {
            let lang = primary_subtag(tag);
            if !lang.is_empty() && lang != self.target_language {
                return Err(RejectReason::NonEnglish);
            }
        }

        let essence = mime_essence(&page.content_type);
        if self.denylist.iter().any(|rule| rule.matches(&essence)) {
            return Err(RejectReason::StaticAsset);
        }

        let body_text = self.cleaner.clean(&page.text);
        if body_text.split_whitespace().count() < self.min_words {
            return Err(RejectReason::EmptyBody);
        }

        let title = page
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED)
            .to_string();

        Ok(RawDocument {
            id: fingerprint(&body_text),
            source_url: page.url.clone(),
            title,
            body_text,
            language_tag: page.language.clone(),
            content_type: essence,
            fetched_at: page.fetched_at,
        })
    }
}

/// `en-US` -> `en`, `FR` -> `fr`.
fn primary_subtag(tag: &str) -> String {
    tag.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}
