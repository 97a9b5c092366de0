//! Retrieval-backed question answering.
//!
//! Each question is sent to the remote index; the ranked hits become the
//! context of a streamed completion from an OpenAI-compatible
//! `/chat/completions` endpoint. Without a model the best snippet is shown.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use sitecorpus_index::{Bucket, RemoteIndex, SearchHit, find_bucket};
use sitecorpus_shared::{LlmConfig, Result, SiteCorpusError};

/// Longest snippet shown when no model is configured.
const SNIPPET_LIMIT: usize = 2500;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

/// A cited source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub url: String,
}

/// What was produced for a question.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// Streamed completion text.
    Generated(String),
    /// Best snippet, truncated; used without a model or when it fails.
    TopMatch(String),
    /// The index returned nothing.
    NoResults,
}

/// An answer and its deduplicated sources.
#[derive(Debug, Clone)]
pub struct Reply {
    pub answer: Answer,
    pub sources: Vec<Source>,
}

// ---------------------------------------------------------------------------
// ChatModel
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Streaming client for an OpenAI-compatible completion API.
pub struct ChatModel {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl ChatModel {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(COMPLETION_TIMEOUT)
            .build()
            .map_err(|e| SiteCorpusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Stream a completion for `question` over `hits`, passing each token to
    /// `on_token`. Returns the full text.
    #[instrument(skip_all, fields(model = %self.model, context = hits.len()))]
    pub async fn complete(
        &self,
        question: &str,
        hits: &[SearchHit],
        on_token: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String> {
        let prompt = user_prompt(question, hits);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            stream: true,
        };

        let mut response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SiteCorpusError::Network(format!("completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SiteCorpusError::Network(format!(
                "completion endpoint returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let mut decoder = SseDecoder::default();
        let mut text = String::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SiteCorpusError::Network(format!("completion stream broke: {e}")))?
        {
            decoder.feed(&chunk, |token| {
                on_token(token);
                text.push_str(token);
            })?;
            if decoder.done {
                break;
            }
        }

        debug!(chars = text.len(), "completion finished");
        Ok(text)
    }
}

/// Incremental decoder for `data:` lines of a server-sent event stream.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Feed raw bytes, passing the content delta of every complete line to
    /// `emit`. Deltas before a malformed line are emitted before the error.
    fn feed(&mut self, bytes: &[u8], mut emit: impl FnMut(&str)) -> Result<()> {
        self.buffer.extend_from_slice(bytes);

        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.done = true;
                break;
            }

            let event: serde_json::Value = serde_json::from_str(data)
                .map_err(|e| SiteCorpusError::parse(format!("bad completion event: {e}")))?;
            if let Some(delta) = event["choices"][0]["delta"]["content"].as_str() {
                if !delta.is_empty() {
                    emit(delta);
                }
            }
        }
        Ok(())
    }
}

/// User turn: every hit as a cited source, then the question.
fn user_prompt(question: &str, hits: &[SearchHit]) -> String {
    let context = hits
        .iter()
        .map(|h| format!("Source: {} ({})\nContent: {}", h.title, h.source_url, h.snippet))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Context:\n{context}\n\nQuestion: {question}")
}

// ---------------------------------------------------------------------------
// Answerer
// ---------------------------------------------------------------------------

/// Answers questions against one bucket of the remote index.
pub struct Answerer<'a> {
    index: &'a dyn RemoteIndex,
    bucket: Bucket,
    top_k: usize,
    model: Option<ChatModel>,
}

impl<'a> Answerer<'a> {
    pub fn new(index: &'a dyn RemoteIndex, bucket: Bucket, top_k: usize, model: Option<ChatModel>) -> Self {
        Self {
            index,
            bucket,
            top_k: top_k.max(1),
            model,
        }
    }

    /// Resolve the bucket for `bucket_name` and build an answerer over it.
    pub async fn connect(
        index: &'a dyn RemoteIndex,
        bucket_name: &str,
        top_k: usize,
        model: Option<ChatModel>,
    ) -> Result<Self> {
        let bucket = find_bucket(index, bucket_name)
            .await
            .map_err(|e| SiteCorpusError::Remote(format!("failed to list buckets: {e}")))?
            .ok_or_else(|| SiteCorpusError::Remote("no bucket found; run ingest first".into()))?;
        info!(bucket = %bucket.name, id = bucket.id, "answering from bucket");
        Ok(Self::new(index, bucket, top_k, model))
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Answer one question. Tokens of a generated answer go to `on_token`
    /// as they arrive.
    #[instrument(skip(self, on_token))]
    pub async fn ask(&self, question: &str, on_token: &mut (dyn FnMut(&str) + Send)) -> Result<Reply> {
        let hits = self
            .index
            .query(&self.bucket, question, self.top_k)
            .await
            .map_err(|e| SiteCorpusError::Remote(format!("search failed: {e}")))?;

        if hits.is_empty() {
            return Ok(Reply {
                answer: Answer::NoResults,
                sources: Vec::new(),
            });
        }

        let sources = dedup_sources(&hits);
        let answer = match &self.model {
            Some(model) => {
                let mut streamed = String::new();
                let mut forward = |token: &str| {
                    streamed.push_str(token);
                    on_token(token);
                };
                let completion = model.complete(question, &hits, &mut forward).await;
                match completion {
                    Ok(text) => Answer::Generated(text),
                    // Tokens already reached the caller; keep them as the answer.
                    Err(e) if !streamed.is_empty() => {
                        warn!(error = %e, chars = streamed.len(), "completion stream broke, keeping partial answer");
                        Answer::Generated(streamed)
                    }
                    Err(e) => {
                        warn!(error = %e, "completion failed, showing top match");
                        Answer::TopMatch(truncate_snippet(&hits[0].snippet, SNIPPET_LIMIT))
                    }
                }
            }
            None => Answer::TopMatch(truncate_snippet(&hits[0].snippet, SNIPPET_LIMIT)),
        };

        Ok(Reply { answer, sources })
    }
}

/// Sources in rank order, one per URL.
pub fn dedup_sources(hits: &[SearchHit]) -> Vec<Source> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|h| seen.insert(h.source_url.as_str()))
        .map(|h| Source {
            title: h.title.clone(),
            url: h.source_url.clone(),
        })
        .collect()
}

/// Cut `text` to at most `limit` characters, marking the cut with `...`.
pub fn truncate_snippet(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
