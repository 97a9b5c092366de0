//! HTTP client for the managed retrieval index.
//!
//! Speaks a bucket/ingest/search REST API authenticated with an
//! `X-API-Key` header. Transport failures (connection errors, timeouts,
//! 429, 5xx) are retried with exponential backoff up to the attempt
//! ceiling; any other unsuccessful status fails immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use sitecorpus_shared::{DocumentId, RemoteConfig, Result, SiteCorpusError};

use crate::bucket::title_from_url;
use crate::process::ProcessState;
use crate::{Bucket, DocumentResult, RemoteError, RemoteIndex, SearchHit, UploadDocument, UploadOutcome};

/// Base delay for upload/query retries; doubles per attempt.
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);

/// HTTP implementation of [`RemoteIndex`].
pub struct HttpIndex {
    client: Client,
    base_url: String,
    api_key: String,
    attempts: u32,
    retry_base: Duration,
}

impl HttpIndex {
    /// Create a client for `config.base_url` with the given API key.
    pub fn new(config: &RemoteConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SiteCorpusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            attempts: 1,
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    /// Set the attempt ceiling and base backoff for transport failures.
    pub fn with_retry(mut self, attempts: u32, base: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_base = base;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, retrying transport failures.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> std::result::Result<Response, RemoteError> {
        let mut last_err = None;

        for attempt in 0..self.attempts {
            if attempt > 0 {
                let delay = self.retry_base.saturating_mul(1 << (attempt - 1).min(6));
                debug!(attempt, delay_ms = delay.as_millis(), "retrying remote call");
                tokio::time::sleep(delay).await;
            }

            let result = build()
                .header("X-API-Key", &self.api_key)
                .send()
                .await;

            let err = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    RemoteError::Rejected { status, message }
                }
                Err(e) if e.is_timeout() => RemoteError::Timeout,
                Err(e) => RemoteError::Unreachable(e.to_string()),
            };

            if !err.is_transport() {
                return Err(err);
            }
            warn!(attempt = attempt + 1, error = %err, "remote call failed");
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| RemoteError::Unreachable("no attempts made".into())))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> std::result::Result<T, RemoteError> {
        let response = self.send(build).await?;
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Malformed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBucket {
    bucket_id: i64,
    name: String,
}

impl From<WireBucket> for Bucket {
    fn from(b: WireBucket) -> Self {
        Self {
            id: b.bucket_id,
            name: b.name,
        }
    }
}

#[derive(Deserialize)]
struct BucketList {
    #[serde(default)]
    buckets: Vec<WireBucket>,
}

#[derive(Deserialize)]
struct BucketCreated {
    bucket: WireBucket,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireDocument<'a> {
    bucket_id: i64,
    document_id: &'a str,
    file_name: String,
    file_type: &'static str,
    source_url: &'a str,
    title: &'a str,
    text: &'a str,
    search_data: SearchData<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchData<'a> {
    source_url: &'a str,
    title: &'a str,
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    documents: Vec<WireDocument<'a>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIngest {
    #[serde(default)]
    process_id: Option<String>,
    status: String,
    #[serde(default)]
    status_message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDocumentStatus {
    document_id: String,
    status: String,
    #[serde(default)]
    status_message: Option<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    ingest: WireIngest,
    #[serde(default)]
    documents: Option<Vec<WireDocumentStatus>>,
}

#[derive(Deserialize)]
struct IngestResponse {
    ingest: WireIngest,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    n: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHit {
    #[serde(default)]
    text: String,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    search_data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SearchResults {
    #[serde(default)]
    results: Vec<WireHit>,
}

#[derive(Deserialize)]
struct SearchResponse {
    search: SearchResults,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebsiteSource<'a> {
    bucket_id: i64,
    source_url: &'a str,
    depth: u32,
    cap: usize,
    search_data: serde_json::Value,
}

#[derive(Serialize)]
struct WebsiteCrawlRequest<'a> {
    websites: Vec<WebsiteSource<'a>>,
}

/// Statuses that mean a document or batch was not ingested.
fn is_failure_status(status: &str) -> bool {
    matches!(
        status.to_ascii_lowercase().as_str(),
        "error" | "failed" | "cancelled"
    )
}

// ---------------------------------------------------------------------------
// RemoteIndex impl
// ---------------------------------------------------------------------------

#[async_trait]
impl RemoteIndex for HttpIndex {
    async fn list_buckets(&self) -> std::result::Result<Vec<Bucket>, RemoteError> {
        let list: BucketList = self
            .send_json(|| self.client.get(self.url("bucket")))
            .await?;
        Ok(list.buckets.into_iter().map(Bucket::from).collect())
    }

    async fn create_bucket(&self, name: &str) -> std::result::Result<Bucket, RemoteError> {
        let body = serde_json::json!({ "name": name });
        let created: BucketCreated = self
            .send_json(|| self.client.post(self.url("bucket")).json(&body))
            .await?;
        Ok(created.bucket.into())
    }

    #[instrument(skip_all, fields(bucket = bucket.id, documents = documents.len()))]
    async fn upload(
        &self,
        bucket: &Bucket,
        documents: &[UploadDocument],
    ) -> std::result::Result<UploadOutcome, RemoteError> {
        let request = UploadRequest {
            documents: documents
                .iter()
                .map(|d| WireDocument {
                    bucket_id: bucket.id,
                    document_id: d.document_id.as_str(),
                    file_name: format!("{}.txt", d.document_id.short()),
                    file_type: "txt",
                    source_url: &d.source_url,
                    title: &d.title,
                    text: &d.text,
                    search_data: SearchData {
                        source_url: &d.source_url,
                        title: &d.title,
                    },
                })
                .collect(),
        };

        let response: UploadResponse = self
            .send_json(|| self.client.post(self.url("ingest/documents")).json(&request))
            .await?;

        if let Some(statuses) = response.documents {
            let results = statuses
                .into_iter()
                .map(|s| DocumentResult {
                    document_id: DocumentId(s.document_id),
                    outcome: if is_failure_status(&s.status) {
                        Err(s.status_message.unwrap_or(s.status))
                    } else {
                        Ok(())
                    },
                })
                .collect();
            return Ok(UploadOutcome::PerDocument(results));
        }

        if is_failure_status(&response.ingest.status) {
            return Err(RemoteError::Rejected {
                status: 200,
                message: response
                    .ingest
                    .status_message
                    .unwrap_or(response.ingest.status),
            });
        }

        debug!(process_id = ?response.ingest.process_id, "batch accepted");
        Ok(UploadOutcome::Batch)
    }

    async fn query(
        &self,
        bucket: &Bucket,
        question: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<SearchHit>, RemoteError> {
        let request = SearchRequest {
            query: question,
            n: top_k,
        };
        let path = format!("search/{}", bucket.id);
        let response: SearchResponse = self
            .send_json(|| self.client.post(self.url(&path)).json(&request))
            .await?;

        Ok(response
            .search
            .results
            .into_iter()
            .map(|hit| {
                let source_url = hit
                    .source_url
                    .filter(|u| !u.is_empty())
                    .unwrap_or_else(|| "Unknown".to_string());
                let title = hit
                    .search_data
                    .as_ref()
                    .and_then(|d| d.get("title"))
                    .and_then(|t| t.as_str())
                    .filter(|t| !t.trim().is_empty())
                    .map(String::from)
                    .unwrap_or_else(|| title_from_url(&source_url));
                SearchHit {
                    snippet: hit.text,
                    source_url,
                    title,
                    score: hit.score,
                }
            })
            .collect())
    }

    async fn start_site_crawl(
        &self,
        bucket: &Bucket,
        source_url: &str,
        depth: u32,
        cap: usize,
    ) -> std::result::Result<String, RemoteError> {
        let request = WebsiteCrawlRequest {
            websites: vec![WebsiteSource {
                bucket_id: bucket.id,
                source_url,
                depth,
                cap,
                search_data: serde_json::json!({ "source": "site_crawl" }),
            }],
        };
        let response: IngestResponse = self
            .send_json(|| {
                self.client
                    .post(self.url("ingest/documents/website"))
                    .json(&request)
            })
            .await?;

        response
            .ingest
            .process_id
            .ok_or_else(|| RemoteError::Malformed("crawl response has no processId".into()))
    }

    async fn process_status(&self, process_id: &str) -> std::result::Result<ProcessState, RemoteError> {
        let path = format!("ingest/{process_id}");
        let response: IngestResponse = self
            .send_json(|| self.client.get(self.url(&path)))
            .await?;
        Ok(ProcessState::parse(&response.ingest.status))
    }
}
