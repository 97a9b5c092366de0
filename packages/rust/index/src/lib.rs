//! Remote index boundary: upload, query, bucket resolution, remote crawl.
//!
//! The remote index is a black-box document store. [`RemoteIndex`] is the
//! seam the Ingestor and the chat answerer talk to; [`HttpIndex`] is the
//! HTTP implementation.

pub mod bucket;
pub mod http;
pub mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sitecorpus_shared::{DocumentId, RawDocument};

pub use bucket::{ensure_bucket, find_bucket, title_from_url};
pub use http::HttpIndex;
pub use process::{ProcessState, WaitOutcome, wait_for_process};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a remote index call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Connection-level failure.
    #[error("remote index unreachable: {0}")]
    Unreachable(String),

    /// The call exceeded its timeout.
    #[error("remote index timed out")]
    Timeout,

    /// The service answered with an unsuccessful status.
    #[error("remote index rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The service answered with a body we could not interpret.
    #[error("malformed remote response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Transport-level failure: the service may be down or throttling.
    ///
    /// These are retried within a call and count toward halting a run.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Boundary types
// ---------------------------------------------------------------------------

/// A bucket (collection) in the remote index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: i64,
    pub name: String,
}

/// One document as sent to the remote index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDocument {
    pub document_id: DocumentId,
    pub text: String,
    pub source_url: String,
    pub title: String,
}

impl From<&RawDocument> for UploadDocument {
    fn from(doc: &RawDocument) -> Self {
        Self {
            document_id: doc.id.clone(),
            text: doc.body_text.clone(),
            source_url: doc.source_url.clone(),
            title: doc.title.clone(),
        }
    }
}

/// Per-document result reported by the remote index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentResult {
    pub document_id: DocumentId,
    /// `Err` carries the service's error detail.
    pub outcome: Result<(), String>,
}

/// What an upload call reported. The service answers in either shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The batch was accepted as a whole.
    Batch,
    /// Individual results per document.
    PerDocument(Vec<DocumentResult>),
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub snippet: String,
    pub source_url: String,
    /// Title reported by the index, or derived from the URL.
    pub title: String,
    pub score: Option<f64>,
}

// ---------------------------------------------------------------------------
// RemoteIndex
// ---------------------------------------------------------------------------

/// Operations the pipeline needs from the remote index.
#[async_trait]
pub trait RemoteIndex: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, RemoteError>;

    async fn create_bucket(&self, name: &str) -> Result<Bucket, RemoteError>;

    /// Upload one batch of documents in a single call.
    async fn upload(
        &self,
        bucket: &Bucket,
        documents: &[UploadDocument],
    ) -> Result<UploadOutcome, RemoteError>;

    /// Ranked results for a question, best first.
    async fn query(
        &self,
        bucket: &Bucket,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, RemoteError>;

    /// Ask the service to crawl a site itself. Returns the process id.
    async fn start_site_crawl(
        &self,
        bucket: &Bucket,
        source_url: &str,
        depth: u32,
        cap: usize,
    ) -> Result<String, RemoteError>;

    /// Current state of a service-side process.
    async fn process_status(&self, process_id: &str) -> Result<ProcessState, RemoteError>;
}
