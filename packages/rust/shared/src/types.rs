//! Core domain types for the crawl and ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Content fingerprint of a document: hex SHA-256 of its normalized body text.
///
/// This is the document's identity for deduplication, storage, and upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 chars, used in log lines and file names.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A UUID v7 wrapper for crawl and ingest run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// UrlRecord
// ---------------------------------------------------------------------------

/// A URL discovered during a crawl run.
///
/// Unique by normalized URL within a run. Only `visited` ever changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Normalized URL (scheme + host + path, no fragment or query).
    pub url: String,
    /// Page this URL was first seen on; `None` for seeds.
    pub discovered_from: Option<String>,
    /// Whether the URL has been fetched in this run.
    pub visited: bool,
}

// ---------------------------------------------------------------------------
// RawDocument
// ---------------------------------------------------------------------------

/// A page that passed the Content Filter, as persisted in the Local Content Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Content fingerprint of `body_text`.
    pub id: DocumentId,
    /// URL the page was fetched from.
    pub source_url: String,
    /// Page title (or "Untitled").
    pub title: String,
    /// Cleaned body text.
    pub body_text: String,
    /// Language tag reported by the renderer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_tag: Option<String>,
    /// MIME type of the response.
    pub content_type: String,
    /// When the page was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl RawDocument {
    /// Whitespace-separated word count of the body.
    pub fn word_count(&self) -> usize {
        self.body_text.split_whitespace().count()
    }
}

// ---------------------------------------------------------------------------
// Ingestion records
// ---------------------------------------------------------------------------

/// Terminal outcome of one ingestion attempt for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    SkippedDuplicate,
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One Audit Log entry. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
    /// Ingest run that produced this record.
    pub run_id: RunId,
    /// Content fingerprint of the document.
    pub document_id: DocumentId,
    /// Source URL of the document.
    pub source_url: String,
    /// Outcome.
    pub status: IngestStatus,
    /// Error detail for `failed` records.
    pub error_detail: Option<String>,
    /// When the attempt was made.
    pub attempted_at: DateTime<Utc>,
    /// Batch the document was submitted in; `None` when skipped before upload.
    pub batch_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// A group of documents submitted to the remote index in one upload call.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: String,
    pub document_ids: Vec<DocumentId>,
    pub submitted_at: DateTime<Utc>,
}

impl Batch {
    /// Start a new batch with a fresh time-sortable id.
    pub fn new(document_ids: Vec<DocumentId>) -> Self {
        Self {
            batch_id: Uuid::now_v7().to_string(),
            document_ids,
            submitted_at: Utc::now(),
        }
    }
}
