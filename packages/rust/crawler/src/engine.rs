//! Concurrent, scope-aware crawl loop.
//!
//! The crawler drains the [`Frontier`] breadth-first in waves of at most
//! `concurrency` fetches, retries transient failures with exponential
//! backoff, feeds newly found links back into the frontier, and hands every
//! fetched page to a [`PageSink`]. Only the crawl loop touches the frontier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use url::Url;

use sitecorpus_shared::{CrawlConfig, Result};

use crate::fetcher::{FetchError, FetchedPage, HttpFetcher, PageFetcher};
use crate::frontier::{Frontier, QueuedUrl};

/// Base delay for fetch retries; doubles per attempt.
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);

/// Upper bound on a single retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// PageSink
// ---------------------------------------------------------------------------

/// Receives fetched pages in the order the crawl completes them.
#[async_trait]
pub trait PageSink: Send {
    /// Offer a page. Returns `true` if it was kept (counts toward `max_pages`).
    async fn accept(&mut self, page: FetchedPage) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// CrawlResult
// ---------------------------------------------------------------------------

/// Summary of a completed crawl run.
#[derive(Debug, Clone, Default)]
pub struct CrawlResult {
    /// Pages fetched and offered to the sink (including non-text responses).
    pub pages_fetched: usize,
    /// Pages the sink kept.
    pub pages_kept: usize,
    /// Pages the sink rejected.
    pub pages_rejected: usize,
    /// URLs given up on after retries (URL, error message).
    pub errors: Vec<(String, String)>,
    /// URL records known to the frontier at the end of the run.
    pub urls_discovered: usize,
    /// Total duration of the crawl.
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Crawl loop over a pluggable [`PageFetcher`].
pub struct Crawler {
    config: CrawlConfig,
    fetcher: Arc<dyn PageFetcher>,
    retry_base: Duration,
}

impl Crawler {
    /// `concurrency` below 1 is raised to 1.
    pub fn new(mut config: CrawlConfig, fetcher: Arc<dyn PageFetcher>) -> Self {
        config.concurrency = config.concurrency.max(1);
        Self {
            config,
            fetcher,
            retry_base: DEFAULT_RETRY_BASE,
        }
    }

    /// Crawler backed by the built-in [`HttpFetcher`].
    pub fn with_http(config: CrawlConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.request_timeout_secs)?;
        Ok(Self::new(config, Arc::new(fetcher)))
    }

    /// Override the retry base delay.
    pub fn retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Crawl until the frontier is exhausted or `max_pages` pages were kept.
    #[instrument(skip_all, fields(max_pages = self.config.max_pages))]
    pub async fn crawl(&self, frontier: &mut Frontier, sink: &mut dyn PageSink) -> Result<CrawlResult> {
        let start_time = std::time::Instant::now();
        let mut result = CrawlResult::default();

        info!(
            depth = self.config.depth,
            concurrency = self.config.concurrency,
            retry_attempts = self.config.retry_attempts,
            "starting crawl"
        );

        while frontier.has_pending() && result.pages_kept < self.config.max_pages {
            let room = (self.config.max_pages - result.pages_kept).min(self.config.concurrency as usize);
            let wave = frontier.claim(room);

            let mut handles = Vec::with_capacity(wave.len());
            for queued in wave {
                let fetcher = self.fetcher.clone();
                let attempts = self.config.retry_attempts;
                let rate_limit = self.config.rate_limit_ms;
                let retry_base = self.retry_base;
                let url = queued.url.clone();
                let handle = tokio::spawn(async move {
                    fetch_with_retry(fetcher.as_ref(), &url, attempts, rate_limit, retry_base).await
                });
                handles.push((queued, handle));
            }

            for (queued, handle) in handles {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        result.errors.push((queued.url.to_string(), format!("task failed: {e}")));
                        continue;
                    }
                };

                let page = match outcome {
                    Ok(page) => {
                        self.enqueue_links(frontier, &queued, &page);
                        page
                    }
                    Err(FetchError::NonTextResponse { content_type }) => {
                        debug!(url = %queued.url, %content_type, "non-text response");
                        FetchedPage::non_text(&queued.url, &content_type)
                    }
                    Err(e) => {
                        warn!(url = %queued.url, error = %e, "giving up on page");
                        result.errors.push((queued.url.to_string(), e.to_string()));
                        continue;
                    }
                };

                result.pages_fetched += 1;
                if result.pages_kept >= self.config.max_pages {
                    continue;
                }
                if sink.accept(page).await? {
                    result.pages_kept += 1;
                } else {
                    result.pages_rejected += 1;
                }
            }
        }

        result.urls_discovered = frontier.records().len();
        result.duration = start_time.elapsed();

        info!(
            pages_fetched = result.pages_fetched,
            pages_kept = result.pages_kept,
            pages_rejected = result.pages_rejected,
            errors = result.errors.len(),
            urls_discovered = result.urls_discovered,
            duration_ms = result.duration.as_millis(),
            "crawl completed"
        );

        Ok(result)
    }

    fn enqueue_links(&self, frontier: &mut Frontier, from: &QueuedUrl, page: &FetchedPage) {
        let parent = from.url.as_str();
        for link in &page.links {
            if let Ok(link_url) = Url::parse(link) {
                frontier.discover(&link_url, Some(parent), from.depth + 1);
            }
        }
    }
}

/// Fetch one URL, retrying per the error kind's attempt budget.
async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    url: &Url,
    ceiling: u32,
    rate_limit_ms: u64,
    retry_base: Duration,
) -> std::result::Result<FetchedPage, FetchError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if rate_limit_ms > 0 {
            tokio::time::sleep(Duration::from_millis(rate_limit_ms)).await;
        }

        match fetcher.fetch(url).await {
            Ok(page) => return Ok(page),
            Err(e) if attempt < e.max_attempts(ceiling) => {
                let delay = backoff_delay(retry_base, attempt);
                debug!(%url, attempt, error = %e, delay_ms = delay.as_millis(), "retrying fetch");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(seeds: &[&str]) -> CrawlConfig {
        CrawlConfig {
            seed_urls: seeds.iter().map(|s| s.to_string()).collect(),
            max_pages: 50,
            depth: 3,
            concurrency: 2,
            retry_attempts: 3,
            request_timeout_secs: 5,
            rate_limit_ms: 0,
            include_patterns: vec![],
            exclude_patterns: vec![],
        }
    }

    /// Keeps everything and remembers what it saw.
    #[derive(Default)]
    struct CollectSink {
        pages: Vec<FetchedPage>,
    }

    #[async_trait]
    impl PageSink for CollectSink {
        async fn accept(&mut self, page: FetchedPage) -> Result<bool> {
            let keep = !page.text.is_empty();
            self.pages.push(page);
            Ok(keep)
        }
    }

    /// Scripted fetcher: a queue of outcomes per URL, plus a call log.
    struct ScriptedFetcher {
        script: Mutex<HashMap<String, Vec<std::result::Result<FetchedPage, FetchError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new() -> Self {
            Self {
                script: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn page(self, url: &str, links: &[&str]) -> Self {
            let page = FetchedPage {
                url: url.into(),
                title: Some(url.into()),
                text: format!("content of {url}"),
                content_type: "text/html".into(),
                language: Some("en".into()),
                links: links.iter().map(|l| l.to_string()).collect(),
                fetched_at: Utc::now(),
            };
            self.outcome(url, Ok(page))
        }

        fn outcome(self, url: &str, outcome: std::result::Result<FetchedPage, FetchError>) -> Self {
            self.script
                .lock()
                .unwrap()
                .entry(url.into())
                .or_default()
                .push(outcome);
            self
        }

        fn calls_for(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &Url) -> std::result::Result<FetchedPage, FetchError> {
            let key = url.to_string();
            self.calls.lock().unwrap().push(key.clone());
            let mut script = self.script.lock().unwrap();
            match script.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) => queue[0].clone(),
                None => Err(FetchError::HttpStatus(404)),
            }
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 30), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn each_url_fetched_at_most_once() {
        // a <-> b cycle plus a self-link and a duplicate link.
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .page(
                    "https://www.itnb.ch/en",
                    &["https://www.itnb.ch/en/a", "https://www.itnb.ch/en", "https://www.itnb.ch/en/a#x"],
                )
                .page("https://www.itnb.ch/en/a", &["https://www.itnb.ch/en/b", "https://www.itnb.ch/en"])
                .page("https://www.itnb.ch/en/b", &["https://www.itnb.ch/en/a"]),
        );
        let cfg = config(&["https://www.itnb.ch/en"]);
        let mut frontier = Frontier::new(&cfg).unwrap();
        let crawler = Crawler::new(cfg, fetcher.clone());
        let mut sink = CollectSink::default();

        let result = crawler.crawl(&mut frontier, &mut sink).await.unwrap();

        assert_eq!(result.pages_fetched, 3);
        assert_eq!(result.pages_kept, 3);
        for url in ["https://www.itnb.ch/en", "https://www.itnb.ch/en/a", "https://www.itnb.ch/en/b"] {
            assert_eq!(fetcher.calls_for(url), 1, "{url} fetched more than once");
        }
        assert_eq!(frontier.visited_count(), 3);
    }

    #[tokio::test]
    async fn off_domain_links_never_fetched() {
        let fetcher = Arc::new(
            ScriptedFetcher::new().page("https://www.itnb.ch/en", &["https://twitter.com/itnb"]),
        );
        let cfg = config(&["https://www.itnb.ch/en"]);
        let mut frontier = Frontier::new(&cfg).unwrap();
        let crawler = Crawler::new(cfg, fetcher.clone());
        let mut sink = CollectSink::default();

        let result = crawler.crawl(&mut frontier, &mut sink).await.unwrap();

        assert_eq!(result.urls_discovered, 2);
        assert_eq!(fetcher.calls_for("https://twitter.com/itnb"), 0);
        let record = frontier
            .record(&Url::parse("https://twitter.com/itnb").unwrap())
            .unwrap();
        assert!(!record.visited);
    }

    #[tokio::test]
    async fn network_failures_retried_then_skipped() {
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .page("https://www.itnb.ch/en", &["https://www.itnb.ch/en/flaky", "https://www.itnb.ch/en/down"])
                .outcome("https://www.itnb.ch/en/flaky", Err(FetchError::NetworkFailure("reset".into())))
                .page("https://www.itnb.ch/en/flaky", &[])
                .outcome("https://www.itnb.ch/en/down", Err(FetchError::NetworkFailure("refused".into()))),
        );
        let cfg = config(&["https://www.itnb.ch/en"]);
        let mut frontier = Frontier::new(&cfg).unwrap();
        let crawler = Crawler::new(cfg, fetcher.clone()).retry_base(Duration::from_millis(1));
        let mut sink = CollectSink::default();

        let result = crawler.crawl(&mut frontier, &mut sink).await.unwrap();

        assert_eq!(fetcher.calls_for("https://www.itnb.ch/en/flaky"), 2);
        assert_eq!(fetcher.calls_for("https://www.itnb.ch/en/down"), 3);
        assert_eq!(result.pages_kept, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].0, "https://www.itnb.ch/en/down");
    }

    #[tokio::test]
    async fn timeouts_retried_once() {
        let fetcher = Arc::new(
            ScriptedFetcher::new().outcome("https://www.itnb.ch/en", Err(FetchError::Timeout)),
        );
        let cfg = config(&["https://www.itnb.ch/en"]);
        let mut frontier = Frontier::new(&cfg).unwrap();
        let crawler = Crawler::new(cfg, fetcher.clone()).retry_base(Duration::from_millis(1));
        let mut sink = CollectSink::default();

        let result = crawler.crawl(&mut frontier, &mut sink).await.unwrap();

        assert_eq!(fetcher.calls_for("https://www.itnb.ch/en"), 2);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn non_text_response_goes_to_sink() {
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .page("https://www.itnb.ch/en", &["https://www.itnb.ch/en/brochure.pdf"])
                .outcome(
                    "https://www.itnb.ch/en/brochure.pdf",
                    Err(FetchError::NonTextResponse {
                        content_type: "application/pdf".into(),
                    }),
                ),
        );
        let cfg = config(&["https://www.itnb.ch/en"]);
        let mut frontier = Frontier::new(&cfg).unwrap();
        let crawler = Crawler::new(cfg, fetcher.clone());
        let mut sink = CollectSink::default();

        let result = crawler.crawl(&mut frontier, &mut sink).await.unwrap();

        assert_eq!(fetcher.calls_for("https://www.itnb.ch/en/brochure.pdf"), 1);
        assert_eq!(result.pages_rejected, 1);
        assert!(result.errors.is_empty());
        let pdf = sink
            .pages
            .iter()
            .find(|p| p.content_type == "application/pdf")
            .expect("pdf offered to sink");
        assert!(pdf.text.is_empty());
    }

    #[tokio::test]
    async fn stops_at_max_pages() {
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .page(
                    "https://www.itnb.ch/en",
                    &["https://www.itnb.ch/en/1", "https://www.itnb.ch/en/2", "https://www.itnb.ch/en/3"],
                )
                .page("https://www.itnb.ch/en/1", &[])
                .page("https://www.itnb.ch/en/2", &[])
                .page("https://www.itnb.ch/en/3", &[]),
        );
        let mut cfg = config(&["https://www.itnb.ch/en"]);
        cfg.max_pages = 2;
        let mut frontier = Frontier::new(&cfg).unwrap();
        let crawler = Crawler::new(cfg, fetcher.clone());
        let mut sink = CollectSink::default();

        let result = crawler.crawl(&mut frontier, &mut sink).await.unwrap();

        assert_eq!(result.pages_kept, 2);
        assert_eq!(sink.pages.len(), 2);
    }

    #[tokio::test]
    async fn zero_concurrency_still_crawls() {
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .page("https://www.itnb.ch/en", &["https://www.itnb.ch/en/a"])
                .page("https://www.itnb.ch/en/a", &[]),
        );
        let mut cfg = config(&["https://www.itnb.ch/en"]);
        cfg.concurrency = 0;
        cfg.max_pages = 5;
        let mut frontier = Frontier::new(&cfg).unwrap();
        let crawler = Crawler::new(cfg, fetcher.clone());
        assert_eq!(crawler.config().concurrency, 1);
        let mut sink = CollectSink::default();

        let result = tokio::time::timeout(Duration::from_secs(5), crawler.crawl(&mut frontier, &mut sink))
            .await
            .expect("crawl finished")
            .unwrap();

        assert_eq!(result.pages_fetched, 2);
        assert_eq!(fetcher.calls_for("https://www.itnb.ch/en/a"), 1);
    }

    /// Serves an empty page after a short pause, tracking overlapping fetches.
    #[derive(Default)]
    struct OverlapFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        links: Vec<String>,
    }

    #[async_trait]
    impl PageFetcher for OverlapFetcher {
        async fn fetch(&self, url: &Url) -> std::result::Result<FetchedPage, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let is_seed = url.path() == "/en";
            Ok(FetchedPage {
                url: url.to_string(),
                title: None,
                text: format!("content of {url}"),
                content_type: "text/html".into(),
                language: Some("en".into()),
                links: if is_seed { self.links.clone() } else { vec![] },
                fetched_at: Utc::now(),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_fetches_bounded_by_concurrency() {
        let fetcher = Arc::new(OverlapFetcher {
            links: (1..=8).map(|i| format!("https://www.itnb.ch/en/{i}")).collect(),
            ..Default::default()
        });
        let cfg = config(&["https://www.itnb.ch/en"]);
        let mut frontier = Frontier::new(&cfg).unwrap();
        let crawler = Crawler::new(cfg, fetcher.clone());
        let mut sink = CollectSink::default();

        let result = crawler.crawl(&mut frontier, &mut sink).await.unwrap();

        assert_eq!(result.pages_fetched, 9);
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak in-flight fetches was {peak}");
    }

    #[tokio::test]
    async fn crawl_with_mock_server() {
        let server = MockServer::start().await;

        let page1 = r#"<html lang="en"><body><main>
            <h1>Page One</h1><p>Welcome to page one.</p>
            <a href="/page2">Go to page 2</a>
        </main></body></html>"#;
        let page2 = r#"<html lang="en"><body><main>
            <h1>Page Two</h1><p>This is page two.</p>
            <a href="/page3">Go to page 3</a><a href="/">Home</a>
        </main></body></html>"#;
        let page3 = r#"<html lang="en"><body><main>
            <h1>Page Three</h1><p>Final page.</p>
        </main></body></html>"#;

        for (p, body) in [("/", page1), ("/page2", page2), ("/page3", page3)] {
            Mock::given(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
                .expect(1)
                .mount(&server)
                .await;
        }

        let cfg = config(&[&server.uri()]);
        let mut frontier = Frontier::new(&cfg).unwrap().allow_localhost();
        let crawler = Crawler::with_http(cfg).unwrap();
        let mut sink = CollectSink::default();

        let result = crawler.crawl(&mut frontier, &mut sink).await.unwrap();

        assert_eq!(result.pages_fetched, 3);
        assert!(result.errors.is_empty());
        let titles: Vec<_> = sink.pages.iter().filter_map(|p| p.title.clone()).collect();
        assert!(titles.contains(&"Page Three".to_string()));
    }
}
