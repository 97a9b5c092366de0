//! CLI command definitions, routing, and tracing setup.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use sitecorpus_core::{Answer, Answerer, ChatModel, ProgressReporter, Reply, crawl_site, export_corpus, ingest_store};
use sitecorpus_crawler::{Crawler, Frontier};
use sitecorpus_filter::{ContentFilter, RejectReason};
use sitecorpus_index::{HttpIndex, RemoteIndex, WaitOutcome, ensure_bucket, wait_for_process};
use sitecorpus_shared::{
    AppConfig, CrawlConfig, FilterConfig, IngestConfig, IngestStatus, RunId, init_config_at,
    load_config, load_config_from, read_api_key,
};
use sitecorpus_storage::{AuditLog, AuditSummary, Storage, read_records};

const CORPUS_DB: &str = "corpus.db";
const AUDIT_LOG: &str = "audit.jsonl";
const DEFAULT_EXPORT: &str = "corpus_export.json";

/// Retry base for remote index calls.
const UPLOAD_RETRY_BASE: Duration = Duration::from_millis(500);

/// Poll interval for remote-native crawls.
const PROCESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// sitecorpus: website corpus acquisition and retrieval ingestion.
#[derive(Parser)]
#[command(
    name = "sitecorpus",
    version,
    about = "Crawl a website into a filtered local corpus and ingest it into a retrieval index.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.sitecorpus/sitecorpus.toml).
    #[arg(long, global = true, env = "SITECORPUS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl the configured site and store accepted pages in the local corpus.
    Crawl {
        /// Seed URL (repeatable). Replaces the configured seeds.
        #[arg(long = "seed")]
        seeds: Vec<String>,

        /// Stop after this many accepted pages.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Maximum link depth from a seed.
        #[arg(long)]
        depth: Option<u32>,

        /// Concurrent page fetches.
        #[arg(long)]
        concurrency: Option<u32>,
    },

    /// Upload pending corpus documents to the remote index.
    Ingest {
        /// Documents per upload call.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Fixed wait between batches, in milliseconds.
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Bucket to ingest into.
        #[arg(long)]
        bucket: Option<String>,
    },

    /// Ask the index service to crawl the site itself and wait for it.
    RemoteCrawl {
        /// Site to crawl (defaults to the first configured seed).
        #[arg(long)]
        url: Option<String>,

        /// Maximum link depth.
        #[arg(long)]
        depth: Option<u32>,

        /// Maximum pages.
        #[arg(long)]
        cap: Option<usize>,

        /// Bucket to crawl into.
        #[arg(long)]
        bucket: Option<String>,

        /// Give up waiting after this many seconds.
        #[arg(long, default_value = "600")]
        timeout_secs: u64,

        /// Print the process id and return without waiting.
        #[arg(long)]
        no_wait: bool,
    },

    /// Answer one question from the index.
    Ask {
        /// The question.
        question: String,

        /// Number of results to retrieve.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Interactive question loop (quit, exit or q to leave).
    Chat {
        /// Number of results to retrieve.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Summarize the audit log and list failed ingestions.
    Audit {
        /// Restrict to one ingest run.
        #[arg(long)]
        run: Option<String>,
    },

    /// Corpus size, pending documents, and recent runs.
    Status,

    /// Write the local corpus to a JSON file.
    Export {
        /// Output path (defaults to <data_dir>/corpus_export.json).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitecorpus=info,sitecorpus_core=info,sitecorpus_crawler=warn,sitecorpus_storage=warn,sitecorpus_index=warn",
        1 => "sitecorpus=debug,sitecorpus_core=debug,sitecorpus_crawler=info,sitecorpus_filter=info,sitecorpus_storage=info,sitecorpus_index=info",
        _ => "sitecorpus=trace,sitecorpus_core=trace,sitecorpus_crawler=debug,sitecorpus_filter=debug,sitecorpus_storage=debug,sitecorpus_index=debug",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(config_path.as_deref()),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        };
    }

    let config = resolve_config(config_path.as_deref())?;
    match cli.command {
        Command::Crawl {
            seeds,
            max_pages,
            depth,
            concurrency,
        } => cmd_crawl(&config, seeds, max_pages, depth, concurrency).await,
        Command::Ingest {
            batch_size,
            delay_ms,
            bucket,
        } => cmd_ingest(&config, batch_size, delay_ms, bucket).await,
        Command::RemoteCrawl {
            url,
            depth,
            cap,
            bucket,
            timeout_secs,
            no_wait,
        } => cmd_remote_crawl(&config, url, depth, cap, bucket, timeout_secs, no_wait).await,
        Command::Ask { question, top_k } => cmd_ask(&config, &question, top_k).await,
        Command::Chat { top_k } => cmd_chat(&config, top_k).await,
        Command::Audit { run } => cmd_audit(&config, run.as_deref()).await,
        Command::Status => cmd_status(&config).await,
        Command::Export { out } => cmd_export(&config, out).await,
        Command::Config { .. } => Ok(()),
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(p) => Ok(load_config_from(p)?),
        None => Ok(load_config()?),
    }
}

fn data_path(config: &AppConfig, file: &str) -> PathBuf {
    PathBuf::from(&config.defaults.data_dir).join(file)
}

// ---------------------------------------------------------------------------
// crawl / ingest
// ---------------------------------------------------------------------------

async fn cmd_crawl(
    config: &AppConfig,
    seeds: Vec<String>,
    max_pages: Option<usize>,
    depth: Option<u32>,
    concurrency: Option<u32>,
) -> Result<()> {
    let mut crawl_config = CrawlConfig::from(config);
    if !seeds.is_empty() {
        crawl_config.seed_urls = seeds;
    }
    if let Some(n) = max_pages {
        crawl_config.max_pages = n;
    }
    if let Some(d) = depth {
        crawl_config.depth = d;
    }
    if let Some(c) = concurrency {
        crawl_config.concurrency = c.max(1);
    }

    let filter = ContentFilter::new(&FilterConfig::from(config))?;
    let frontier = Frontier::new(&crawl_config)?;
    let crawler = Crawler::with_http(crawl_config.clone())?;
    let storage = Storage::open(&data_path(config, CORPUS_DB)).await?;

    info!(
        seeds = crawl_config.seed_urls.len(),
        max_pages = crawl_config.max_pages,
        depth = crawl_config.depth,
        "starting crawl"
    );

    let reporter = CliProgress::new();
    let report = tokio::select! {
        report = crawl_site(&crawler, frontier, &filter, &storage, &reporter) => report?,
        _ = tokio::signal::ctrl_c() => {
            reporter.spinner.finish_and_clear();
            warn!("crawl interrupted");
            println!("Interrupted. Pages accepted so far are stored; re-run to continue.");
            return Ok(());
        }
    };

    println!();
    println!("  Crawl complete");
    println!("  Run:       {}", report.run_id);
    println!("  Fetched:   {}", report.crawl.pages_fetched);
    println!("  Kept:      {}", report.crawl.pages_kept);
    for reason in [RejectReason::NonEnglish, RejectReason::StaticAsset, RejectReason::EmptyBody] {
        println!("  {:<10} {}", format!("{reason}:"), report.rejected(reason));
    }
    println!("  Failed:    {}", report.crawl.errors.len());
    println!("  URLs seen: {}", report.crawl.urls_discovered);
    println!("  Time:      {:.1}s", report.crawl.duration.as_secs_f64());
    println!("  Corpus:    {} documents", storage.count_documents().await?);
    println!();

    Ok(())
}

async fn cmd_ingest(
    config: &AppConfig,
    batch_size: Option<usize>,
    delay_ms: Option<u64>,
    bucket: Option<String>,
) -> Result<()> {
    let api_key = read_api_key(&config.remote.api_key_env)?;

    let mut ingest_config = IngestConfig::from(config);
    if let Some(n) = batch_size {
        ingest_config.batch_size = n.max(1);
    }
    if let Some(ms) = delay_ms {
        ingest_config.batch_delay_ms = ms;
    }
    if let Some(name) = bucket {
        ingest_config.bucket_name = name;
    }

    let index = HttpIndex::new(&config.remote, api_key)?
        .with_retry(ingest_config.upload_attempts, UPLOAD_RETRY_BASE);
    let storage = Storage::open(&data_path(config, CORPUS_DB)).await?;
    let mut audit = AuditLog::open(&data_path(config, AUDIT_LOG)).await?;

    info!(
        bucket = %ingest_config.bucket_name,
        batch_size = ingest_config.batch_size,
        documents = storage.count_documents().await?,
        "starting ingest"
    );

    let reporter = CliProgress::new();
    let report = tokio::select! {
        report = ingest_store(&ingest_config, &index, &storage, &mut audit, &reporter) => report,
        _ = tokio::signal::ctrl_c() => {
            reporter.spinner.finish_and_clear();
            warn!("ingest interrupted");
            println!("Interrupted. Recorded batches are in the audit log; re-run to resume.");
            return Ok(());
        }
    };
    reporter.spinner.finish_and_clear();
    let report = report?;

    println!();
    println!("  Ingest complete");
    println!("  Run:       {}", report.run_id);
    println!("  Batches:   {}", report.batches);
    println!("  Success:   {}", report.count(IngestStatus::Success));
    println!("  Skipped:   {}", report.count(IngestStatus::SkippedDuplicate));
    println!("  Failed:    {}", report.count(IngestStatus::Failed));
    if report.count(IngestStatus::Failed) > 0 {
        println!("  Re-run `sitecorpus ingest` to retry failed documents.");
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// remote-crawl
// ---------------------------------------------------------------------------

async fn cmd_remote_crawl(
    config: &AppConfig,
    url: Option<String>,
    depth: Option<u32>,
    cap: Option<usize>,
    bucket: Option<String>,
    timeout_secs: u64,
    no_wait: bool,
) -> Result<()> {
    let api_key = read_api_key(&config.remote.api_key_env)?;
    let url = url
        .or_else(|| config.crawl.seed_urls.first().cloned())
        .ok_or_else(|| eyre!("no URL given and no seed URL configured"))?;
    let depth = depth.unwrap_or(config.crawl.depth);
    let cap = cap.unwrap_or(config.crawl.max_pages);
    let bucket_name = bucket.unwrap_or_else(|| config.ingest.bucket_name.clone());

    let index = HttpIndex::new(&config.remote, api_key)?
        .with_retry(config.ingest.upload_attempts, UPLOAD_RETRY_BASE);
    let bucket = ensure_bucket(&index, &bucket_name).await?;
    let process_id = index.start_site_crawl(&bucket, &url, depth, cap).await?;

    info!(%url, depth, cap, %process_id, "remote crawl started");
    println!("Remote crawl started: process {process_id}");
    if no_wait {
        return Ok(());
    }

    let spinner = CliProgress::new();
    let outcome = wait_for_process(
        &index,
        &process_id,
        PROCESS_POLL_INTERVAL,
        Duration::from_secs(timeout_secs),
        |state| spinner.spinner.set_message(format!("Remote crawl: {state}")),
    )
    .await;
    spinner.spinner.finish_and_clear();

    match outcome {
        WaitOutcome::Finished(state) => println!("Remote crawl finished: {state}"),
        WaitOutcome::TimedOut(last) => {
            let last = last.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into());
            println!("Stopped waiting after {timeout_secs}s (last status: {last}); the service keeps working.");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ask / chat
// ---------------------------------------------------------------------------

fn chat_model(config: &AppConfig) -> Result<Option<ChatModel>> {
    match read_api_key(&config.llm.api_key_env) {
        Ok(key) => {
            let model = ChatModel::new(&config.llm, key)?;
            info!(model = model.model(), "completion model configured");
            Ok(Some(model))
        }
        Err(_) => {
            info!(env = %config.llm.api_key_env, "no completion key, answering with top match");
            Ok(None)
        }
    }
}

fn print_reply(reply: &Reply) {
    match &reply.answer {
        Answer::Generated(_) => println!(),
        Answer::TopMatch(text) => {
            println!("Top match:");
            println!("{text}");
        }
        Answer::NoResults => {
            println!("No relevant information found.");
            return;
        }
    }

    println!();
    println!("Sources:");
    for (i, source) in reply.sources.iter().enumerate() {
        println!("  [{}] {}", i + 1, source.title);
        println!("      {}", source.url);
    }
}

fn print_token(token: &str) {
    print!("{token}");
    let _ = std::io::stdout().flush();
}

async fn cmd_ask(config: &AppConfig, question: &str, top_k: Option<usize>) -> Result<()> {
    let api_key = read_api_key(&config.remote.api_key_env)?;
    let index = HttpIndex::new(&config.remote, api_key)?;
    let answerer = Answerer::connect(
        &index,
        &config.ingest.bucket_name,
        top_k.unwrap_or(config.remote.top_k),
        chat_model(config)?,
    )
    .await?;

    let reply = answerer.ask(question, &mut |t: &str| print_token(t)).await?;
    print_reply(&reply);
    Ok(())
}

async fn cmd_chat(config: &AppConfig, top_k: Option<usize>) -> Result<()> {
    let api_key = read_api_key(&config.remote.api_key_env)?;
    let index = HttpIndex::new(&config.remote, api_key)?;
    let answerer = Answerer::connect(
        &index,
        &config.ingest.bucket_name,
        top_k.unwrap_or(config.remote.top_k),
        chat_model(config)?,
    )
    .await?;

    let mode = if answerer.has_model() { "retrieval + completion" } else { "search only" };
    println!("Knowledge base: {} ({mode})", answerer.bucket().name);
    println!("Type quit to exit.");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nYou: ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }

        println!();
        match answerer.ask(question, &mut |t: &str| print_token(t)).await {
            Ok(reply) => print_reply(&reply),
            Err(e) => {
                warn!(error = %e, "question failed");
                println!("Error: {e}");
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

// ---------------------------------------------------------------------------
// audit / status / export
// ---------------------------------------------------------------------------

async fn cmd_audit(config: &AppConfig, run: Option<&str>) -> Result<()> {
    let run_id = run
        .map(|r| r.parse::<RunId>().map_err(|e| eyre!("invalid run id '{r}': {e}")))
        .transpose()?;

    let records = read_records(&data_path(config, AUDIT_LOG)).await?;
    let summary = AuditSummary::from_records(&records, run_id.as_ref());

    println!();
    match &run_id {
        Some(id) => println!("  Audit log (run {id})"),
        None => println!("  Audit log ({} runs)", summary.runs.len()),
    }
    println!("  Entries:   {}", summary.total);
    println!("  Success:   {}", summary.success);
    println!("  Skipped:   {}", summary.skipped_duplicate);
    println!("  Failed:    {}", summary.failed);

    if !summary.failures.is_empty() {
        println!();
        println!("  Failures:");
        for record in &summary.failures {
            println!(
                "  {} {} [{}] {}",
                record.attempted_at.format("%Y-%m-%d %H:%M:%S"),
                record.source_url,
                record.document_id.short(),
                record.error_detail.as_deref().unwrap_or("no detail")
            );
        }
    }
    println!();
    Ok(())
}

async fn cmd_status(config: &AppConfig) -> Result<()> {
    let storage = Storage::open_readonly(&data_path(config, CORPUS_DB)).await?;
    let records = read_records(&data_path(config, AUDIT_LOG)).await?;

    let ingested: HashSet<_> = records
        .iter()
        .filter(|r| r.status == IngestStatus::Success)
        .map(|r| &r.document_id)
        .collect();
    let documents = storage.list_all().await?;
    let pending = documents.iter().filter(|d| !ingested.contains(&d.id)).count();
    let summary = AuditSummary::from_records(&records, None);

    println!();
    println!("  Corpus:    {} documents", documents.len());
    println!("  Pending:   {pending}");
    println!(
        "  Audit:     {} entries ({} success, {} skipped, {} failed)",
        summary.total, summary.success, summary.skipped_duplicate, summary.failed
    );

    let runs = storage.list_crawl_runs(5).await?;
    if !runs.is_empty() {
        println!();
        println!("  Recent crawls:");
        for run in runs {
            let finished = run
                .finished_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "unfinished".into());
            println!("  {} {} ({finished})", run.started_at.format("%Y-%m-%d %H:%M"), run.seed_url);
        }
    }
    println!();
    Ok(())
}

async fn cmd_export(config: &AppConfig, out: Option<PathBuf>) -> Result<()> {
    let storage = Storage::open_readonly(&data_path(config, CORPUS_DB)).await?;
    let out = out.unwrap_or_else(|| data_path(config, DEFAULT_EXPORT));
    let count = export_corpus(&storage, &out).await?;
    println!("Exported {count} documents to {}", out.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => init_config_at(p)?,
        None => sitecorpus_shared::init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_classified(&self, url: &str, kept: bool, kept_total: usize, max_pages: usize) {
        let mark = if kept { "kept" } else { "skipped" };
        self.spinner
            .set_message(format!("Crawling [{kept_total}/{max_pages}] {mark} {url}"));
    }

    fn batch_recorded(&self, batch: usize, documents: usize, failed: usize) {
        self.spinner
            .set_message(format!("Batch {batch}: {documents} documents, {failed} failed"));
    }

    fn done(&self) {
        self.spinner.finish_and_clear();
    }
}
