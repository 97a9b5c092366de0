//! End-to-end crawl pipeline: frontier → fetch → filter → Local Content Store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use sitecorpus_crawler::{CrawlResult, Crawler, FetchedPage, Frontier, PageSink};
use sitecorpus_filter::{Classification, ContentFilter, RejectReason};
use sitecorpus_shared::{Result, SiteCorpusError};
use sitecorpus_storage::Storage;

/// Result of one [`crawl_site`] run.
#[derive(Debug)]
pub struct CrawlReport {
    /// Id of the `crawl_runs` row recording this run.
    pub run_id: String,
    /// Counters from the crawl loop.
    pub crawl: CrawlResult,
    /// Filter rejects by reason.
    pub rejects: BTreeMap<RejectReason, usize>,
}

impl CrawlReport {
    pub fn rejected(&self, reason: RejectReason) -> usize {
        self.rejects.get(&reason).copied().unwrap_or(0)
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each fetched page has been classified.
    fn page_classified(&self, url: &str, kept: bool, kept_total: usize, max_pages: usize);
    /// Called after each ingest batch has been recorded.
    fn batch_recorded(&self, batch: usize, documents: usize, failed: usize);
    /// Called when the pipeline completes.
    fn done(&self);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_classified(&self, _url: &str, _kept: bool, _kept_total: usize, _max_pages: usize) {}
    fn batch_recorded(&self, _batch: usize, _documents: usize, _failed: usize) {}
    fn done(&self) {}
}

// ---------------------------------------------------------------------------
// FilterSink
// ---------------------------------------------------------------------------

/// Classifies crawled pages and persists the ones worth keeping.
struct FilterSink<'a> {
    filter: &'a ContentFilter,
    storage: &'a Storage,
    progress: &'a dyn ProgressReporter,
    max_pages: usize,
    kept: usize,
    rejects: BTreeMap<RejectReason, usize>,
}

#[async_trait]
impl PageSink for FilterSink<'_> {
    async fn accept(&mut self, page: FetchedPage) -> Result<bool> {
        let kept = match self.filter.classify(&page) {
            Classification::Keep(doc) => {
                self.storage.persist(&doc).await?;
                debug!(url = %doc.source_url, fingerprint = doc.id.short(), "document stored");
                self.kept += 1;
                true
            }
            Classification::Reject(reason) => {
                *self.rejects.entry(reason).or_default() += 1;
                false
            }
        };
        self.progress
            .page_classified(&page.url, kept, self.kept, self.max_pages);
        Ok(kept)
    }
}

// ---------------------------------------------------------------------------
// crawl_site
// ---------------------------------------------------------------------------

/// Run one crawl: drain `frontier`, filter every page, persist keepers.
///
/// The run and every URL record it discovered are written to `storage`.
/// Documents are persisted as they arrive, so an interrupted crawl keeps
/// everything accepted before the interrupt.
#[instrument(skip_all)]
pub async fn crawl_site(
    crawler: &Crawler,
    mut frontier: Frontier,
    filter: &ContentFilter,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<CrawlReport> {
    let seed = frontier
        .records()
        .first()
        .map(|r| r.url.clone())
        .ok_or_else(|| SiteCorpusError::validation("crawl needs at least one seed URL"))?;

    progress.phase("Crawling");
    let run_id = storage.insert_crawl_run(&seed).await?;
    info!(%run_id, %seed, "crawl run started");

    let mut sink = FilterSink {
        filter,
        storage,
        progress,
        max_pages: crawler.config().max_pages,
        kept: 0,
        rejects: BTreeMap::new(),
    };
    let crawl = crawler.crawl(&mut frontier, &mut sink).await?;
    let rejects = sink.rejects;

    progress.phase("Recording run");
    storage.record_urls(&run_id, frontier.records()).await?;

    let stats = serde_json::json!({
        "pages_fetched": crawl.pages_fetched,
        "pages_kept": crawl.pages_kept,
        "pages_rejected": crawl.pages_rejected,
        "rejects": rejects
            .iter()
            .map(|(reason, n)| (reason.as_str(), *n))
            .collect::<BTreeMap<_, _>>(),
        "errors": crawl.errors.len(),
        "urls_discovered": crawl.urls_discovered,
        "duration_ms": crawl.duration.as_millis() as u64,
    });
    storage.finish_crawl_run(&run_id, &stats.to_string()).await?;

    info!(
        %run_id,
        kept = crawl.pages_kept,
        rejected = crawl.pages_rejected,
        errors = crawl.errors.len(),
        "crawl run finished"
    );
    progress.done();

    Ok(CrawlReport {
        run_id,
        crawl,
        rejects,
    })
}
