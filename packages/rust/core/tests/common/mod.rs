//! Fakes shared by the core integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use url::Url;
use uuid::Uuid;

use sitecorpus_crawler::{FetchError, FetchedPage, PageFetcher};
use sitecorpus_index::{Bucket, ProcessState, RemoteError, RemoteIndex, SearchHit, UploadDocument, UploadOutcome};
use sitecorpus_shared::{DocumentId, RawDocument};

pub fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{prefix}_{}", Uuid::now_v7()))
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).single().unwrap()
}

/// Stored document `n`, fetched `n` minutes after a fixed epoch.
pub fn document(n: i64) -> RawDocument {
    RawDocument {
        id: DocumentId(format!("fp{n:04}")),
        source_url: format!("https://www.itnb.ch/en/page-{n}"),
        title: format!("Page {n}"),
        body_text: format!("Body of page {n} about sovereign cloud services"),
        language_tag: Some("en".into()),
        content_type: "text/html".into(),
        fetched_at: epoch() + Duration::minutes(n),
    }
}

// ---------------------------------------------------------------------------
// Remote index
// ---------------------------------------------------------------------------

/// In-memory remote index with scriptable upload failures.
#[derive(Default)]
pub struct FakeIndex {
    /// 1-based upload call numbers that fail as unreachable.
    pub fail_calls: Mutex<HashSet<usize>>,
    /// Fail every upload call.
    pub always_down: Mutex<bool>,
    /// Document ids of every upload call, in order.
    pub calls: Mutex<Vec<Vec<DocumentId>>>,
    /// Documents the index holds, by id.
    pub stored: Mutex<HashMap<DocumentId, usize>>,
    pub buckets: Mutex<Vec<Bucket>>,
}

impl FakeIndex {
    pub fn failing_on(calls: &[usize]) -> Self {
        let index = Self::default();
        index.fail_calls.lock().unwrap().extend(calls.iter().copied());
        index
    }

    pub fn heal(&self) {
        self.fail_calls.lock().unwrap().clear();
        *self.always_down.lock().unwrap() = false;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Ids uploaded by calls after the first `skip`.
    pub fn uploaded_since(&self, skip: usize) -> Vec<DocumentId> {
        self.calls.lock().unwrap().iter().skip(skip).flatten().cloned().collect()
    }

    /// Times any document was accepted more than once.
    pub fn duplicate_uploads(&self) -> usize {
        self.stored.lock().unwrap().values().filter(|n| **n > 1).count()
    }
}

#[async_trait]
impl RemoteIndex for FakeIndex {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, RemoteError> {
        Ok(self.buckets.lock().unwrap().clone())
    }

    async fn create_bucket(&self, name: &str) -> Result<Bucket, RemoteError> {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = Bucket {
            id: buckets.len() as i64 + 1,
            name: name.into(),
        };
        buckets.push(bucket.clone());
        Ok(bucket)
    }

    async fn upload(&self, _: &Bucket, documents: &[UploadDocument]) -> Result<UploadOutcome, RemoteError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(documents.iter().map(|d| d.document_id.clone()).collect());
        let call = calls.len();

        if *self.always_down.lock().unwrap() || self.fail_calls.lock().unwrap().contains(&call) {
            return Err(RemoteError::Unreachable("connection refused".into()));
        }

        let mut stored = self.stored.lock().unwrap();
        for doc in documents {
            *stored.entry(doc.document_id.clone()).or_default() += 1;
        }
        Ok(UploadOutcome::Batch)
    }

    async fn query(&self, _: &Bucket, _: &str, _: usize) -> Result<Vec<SearchHit>, RemoteError> {
        Ok(vec![])
    }

    async fn start_site_crawl(&self, _: &Bucket, _: &str, _: u32, _: usize) -> Result<String, RemoteError> {
        Ok("process-1".into())
    }

    async fn process_status(&self, _: &str) -> Result<ProcessState, RemoteError> {
        Ok(ProcessState::Complete)
    }
}

// ---------------------------------------------------------------------------
// Page fetcher
// ---------------------------------------------------------------------------

/// Fetcher answering from a fixed map of URL to outcome.
#[derive(Default)]
pub struct MapFetcher {
    pages: HashMap<String, Result<FetchedPage, FetchError>>,
}

impl MapFetcher {
    pub fn page(mut self, url: &str, language: Option<&str>, text: &str, links: &[&str]) -> Self {
        let page = FetchedPage {
            url: url.into(),
            title: Some("ITNB".into()),
            text: text.into(),
            content_type: "text/html".into(),
            language: language.map(String::from),
            links: links.iter().map(|l| l.to_string()).collect(),
            fetched_at: Utc::now(),
        };
        self.pages.insert(url.into(), Ok(page));
        self
    }

    pub fn error(mut self, url: &str, error: FetchError) -> Self {
        self.pages.insert(url.into(), Err(error));
        self
    }
}

#[async_trait]
impl PageFetcher for MapFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        self.pages
            .get(url.as_str())
            .cloned()
            .unwrap_or(Err(FetchError::HttpStatus(404)))
    }
}
