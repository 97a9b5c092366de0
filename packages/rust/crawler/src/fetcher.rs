//! Fetcher boundary: URL in, rendered text plus metadata out.
//!
//! [`PageFetcher`] is the seam to whatever renders pages. [`HttpFetcher`]
//! is the built-in implementation: a plain HTTP GET whose HTML is rendered
//! to text locally.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{CONTENT_LANGUAGE, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use sitecorpus_shared::{Result, SiteCorpusError};

use crate::render::render_html;

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("sitecorpus/", env!("CARGO_PKG_VERSION"));

/// Response types that are rendered as text.
const TEXT_TYPES: &[&str] = &["text/html", "application/xhtml+xml", "text/plain"];

// ---------------------------------------------------------------------------
// FetchedPage / FetchError
// ---------------------------------------------------------------------------

/// A page as returned by the renderer.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested.
    pub url: String,
    /// Page title, if the renderer found one.
    pub title: Option<String>,
    /// Rendered text content.
    pub text: String,
    /// MIME essence of the response.
    pub content_type: String,
    /// Detected or declared language tag.
    pub language: Option<String>,
    /// Absolute outbound links, fragments stripped.
    pub links: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    /// Placeholder for a response that could not be rendered as text.
    pub fn non_text(url: &Url, content_type: &str) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            text: String::new(),
            content_type: content_type.to_string(),
            language: None,
            links: Vec::new(),
            fetched_at: Utc::now(),
        }
    }
}

/// Why a fetch did not produce a page.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connection-level failure, or a 429/5xx response. Retryable.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The request timed out. Retried once.
    #[error("request timed out")]
    Timeout,

    /// The response is not text. Terminal; handed to the Content Filter.
    #[error("non-text response ({content_type})")]
    NonTextResponse { content_type: String },

    /// Any other unsuccessful HTTP status. Terminal.
    #[error("HTTP {0}")]
    HttpStatus(u16),
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure(_) | Self::Timeout)
    }

    /// Total attempts allowed for this kind of failure under `ceiling`.
    pub fn max_attempts(&self, ceiling: u32) -> u32 {
        match self {
            Self::NetworkFailure(_) => ceiling.max(1),
            Self::Timeout => ceiling.clamp(1, 2),
            Self::NonTextResponse { .. } | Self::HttpStatus(_) => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// Fetches and renders one URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> std::result::Result<FetchedPage, FetchError>;
}

/// HTTP fetcher that renders HTML locally.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given per-request timeout.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SiteCorpusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<FetchedPage, FetchError> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(FetchError::NetworkFailure(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(mime_essence)
            .unwrap_or_else(|| "text/html".to_string());

        if !TEXT_TYPES.contains(&content_type.as_str()) {
            return Err(FetchError::NonTextResponse { content_type });
        }

        let header_language = response
            .headers()
            .get(CONTENT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let body = response.text().await.map_err(classify_reqwest_error)?;

        let page = if content_type == "text/plain" {
            FetchedPage {
                url: url.to_string(),
                title: None,
                text: body,
                content_type,
                language: header_language,
                links: Vec::new(),
                fetched_at: Utc::now(),
            }
        } else {
            let rendered = render_html(&body, url);
            FetchedPage {
                url: url.to_string(),
                title: rendered.title,
                text: rendered.text,
                content_type,
                language: rendered.language.or(header_language),
                links: rendered.links,
                fetched_at: Utc::now(),
            }
        };

        Ok(page)
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::NetworkFailure(e.to_string())
    }
}

/// `text/HTML; charset=utf-8` -> `text/html`.
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn attempt_budgets_per_kind() {
        assert_eq!(FetchError::NetworkFailure("x".into()).max_attempts(4), 4);
        assert_eq!(FetchError::Timeout.max_attempts(4), 2);
        assert_eq!(FetchError::Timeout.max_attempts(1), 1);
        assert_eq!(FetchError::HttpStatus(404).max_attempts(4), 1);
        let non_text = FetchError::NonTextResponse {
            content_type: "application/pdf".into(),
        };
        assert_eq!(non_text.max_attempts(4), 1);
        assert!(!non_text.is_retryable());
        assert!(FetchError::Timeout.is_retryable());
    }

    #[test]
    fn mime_essence_strips_parameters() {
        assert_eq!(mime_essence("text/HTML; charset=utf-8"), "text/html");
        assert_eq!(mime_essence("application/pdf"), "application/pdf");
    }

    #[tokio::test]
    async fn fetches_and_renders_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/en"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    r#"<html lang="en"><head><title>Home</title></head>
                    <body><main><p>Welcome.</p><a href="/en/about">About</a></main></body></html>"#,
                    "text/html; charset=utf-8",
                ),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(5).unwrap();
        let url = Url::parse(&format!("{}/en", server.uri())).unwrap();
        let page = fetcher.fetch(&url).await.expect("fetch");

        assert_eq!(page.title.as_deref(), Some("Home"));
        assert_eq!(page.language.as_deref(), Some("en"));
        assert_eq!(page.content_type, "text/html");
        assert!(page.text.contains("Welcome."));
        assert_eq!(page.links, vec![format!("{}/en/about", server.uri())]);
    }

    #[tokio::test]
    async fn pdf_is_non_text_response() {
        let server = MockServer::start().await;
        Mock::given(path("/brochure.pdf"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"%PDF-1.7".to_vec(), "application/pdf"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(5).unwrap();
        let url = Url::parse(&format!("{}/brochure.pdf", server.uri())).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::NonTextResponse {
                content_type: "application/pdf".into()
            }
        );
    }

    #[tokio::test]
    async fn server_errors_are_network_failures() {
        let server = MockServer::start().await;
        Mock::given(path("/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(5).unwrap();
        let busy = Url::parse(&format!("{}/busy", server.uri())).unwrap();
        assert!(matches!(
            fetcher.fetch(&busy).await,
            Err(FetchError::NetworkFailure(_))
        ));

        let missing = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        assert_eq!(fetcher.fetch(&missing).await.unwrap_err(), FetchError::HttpStatus(404));
    }

    #[tokio::test]
    async fn slow_response_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_string("late"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(1).unwrap();
        let url = Url::parse(&format!("{}/slow", server.uri())).unwrap();
        assert_eq!(fetcher.fetch(&url).await.unwrap_err(), FetchError::Timeout);
    }
}
