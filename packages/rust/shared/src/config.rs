//! Application configuration for sitecorpus.
//!
//! User config lives at `~/.sitecorpus/sitecorpus.toml`.
//! CLI flags override config file values, which override defaults.
//! Credentials are never stored in the file; the file names the
//! environment variables that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteCorpusError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitecorpus.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitecorpus";

// ---------------------------------------------------------------------------
// Config structs (matching sitecorpus.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub crawl: CrawlSection,

    #[serde(default)]
    pub filter: FilterSection,

    #[serde(default)]
    pub ingest: IngestSection,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub llm: LlmConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding the corpus database, audit log, and exports.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "data".into()
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Seed URLs, visited first and in order. The first seed defines the crawl domain.
    #[serde(default = "default_seed_urls")]
    pub seed_urls: Vec<String>,

    /// Stop once this many documents have been accepted.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum link depth from a seed.
    #[serde(default = "default_depth")]
    pub depth: u32,

    /// Maximum in-flight page fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Attempt ceiling for retryable fetch failures.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Wait before each fetch, in ms.
    #[serde(default)]
    pub rate_limit_ms: u64,

    /// URL path include globs.
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// URL path exclude globs.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            seed_urls: default_seed_urls(),
            max_pages: default_max_pages(),
            depth: default_depth(),
            concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            request_timeout_secs: default_request_timeout(),
            rate_limit_ms: 0,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

fn default_seed_urls() -> Vec<String> {
    vec!["https://www.itnb.ch/en".into()]
}
fn default_max_pages() -> usize {
    50
}
fn default_depth() -> u32 {
    3
}
fn default_concurrency() -> u32 {
    4
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_request_timeout() -> u64 {
    30
}

/// `[filter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSection {
    /// Primary language subtag pages must be in.
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// MIME types that are never kept. `type/*` matches a whole top-level type.
    #[serde(default = "default_asset_denylist")]
    pub asset_denylist: Vec<String>,

    /// Minimum word count after cleanup.
    #[serde(default = "default_min_words")]
    pub min_words: usize,

    /// Regexes stripped from body text before filtering.
    #[serde(default = "default_strip_patterns")]
    pub strip_patterns: Vec<String>,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            target_language: default_target_language(),
            asset_denylist: default_asset_denylist(),
            min_words: default_min_words(),
            strip_patterns: default_strip_patterns(),
        }
    }
}

fn default_target_language() -> String {
    "en".into()
}
fn default_asset_denylist() -> Vec<String> {
    [
        "application/pdf",
        "image/*",
        "video/*",
        "audio/*",
        "application/zip",
        "application/gzip",
        "application/x-tar",
        "application/x-7z-compressed",
        "application/x-rar-compressed",
        "application/msword",
        "application/vnd.ms-excel",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "application/octet-stream",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_min_words() -> usize {
    20
}
fn default_strip_patterns() -> Vec<String> {
    vec![
        r"(?is)How you want to deal with cookies.*?Allow All\n?".into(),
        r"(?i)Manage CookiesAllow All\n?".into(),
    ]
}

/// `[ingest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSection {
    /// Documents per upload call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Fixed wait between batch submissions, in ms (0 disables).
    #[serde(default = "default_batch_delay")]
    pub batch_delay_ms: u64,

    /// Attempt ceiling for one upload call on transport failures.
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,

    /// Consecutive unreachable batches after which the run halts.
    #[serde(default = "default_halt_after")]
    pub halt_after_unreachable_batches: u32,

    /// Remote bucket documents are uploaded into (created if missing).
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay(),
            upload_attempts: default_upload_attempts(),
            halt_after_unreachable_batches: default_halt_after(),
            bucket_name: default_bucket_name(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}
fn default_batch_delay() -> u64 {
    2000
}
fn default_upload_attempts() -> u32 {
    3
}
fn default_halt_after() -> u32 {
    3
}
fn default_bucket_name() -> String {
    "itnb-website-content".into()
}

/// `[remote]` section: the managed retrieval index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API base URL.
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_remote_key_env")]
    pub api_key_env: String,

    /// Per-request timeout.
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,

    /// Results per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            api_key_env: default_remote_key_env(),
            timeout_secs: default_remote_timeout(),
            top_k: default_top_k(),
        }
    }
}

fn default_remote_base_url() -> String {
    "https://api.groundx.ai/api/v1".into()
}
fn default_remote_key_env() -> String {
    "GROUNDX_API_KEY".into()
}
fn default_remote_timeout() -> u64 {
    60
}
fn default_top_k() -> usize {
    5
}

/// `[llm]` section: OpenAI-compatible completion endpoint used by chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_llm_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant for ITNB AG. Answer based on the context provided. Cite sources."
        .into()
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub seed_urls: Vec<String>,
    pub max_pages: usize,
    pub depth: u32,
    pub concurrency: u32,
    pub retry_attempts: u32,
    pub request_timeout_secs: u64,
    pub rate_limit_ms: u64,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let c = &config.crawl;
        Self {
            seed_urls: c.seed_urls.clone(),
            max_pages: c.max_pages,
            depth: c.depth,
            concurrency: c.concurrency.max(1),
            retry_attempts: c.retry_attempts.max(1),
            request_timeout_secs: c.request_timeout_secs,
            rate_limit_ms: c.rate_limit_ms,
            include_patterns: c.include_patterns.clone(),
            exclude_patterns: c.exclude_patterns.clone(),
        }
    }
}

/// Runtime Content Filter configuration.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub target_language: String,
    pub asset_denylist: Vec<String>,
    pub min_words: usize,
    pub strip_patterns: Vec<String>,
}

impl From<&AppConfig> for FilterConfig {
    fn from(config: &AppConfig) -> Self {
        let f = &config.filter;
        Self {
            target_language: f.target_language.clone(),
            asset_denylist: f.asset_denylist.clone(),
            min_words: f.min_words,
            strip_patterns: f.strip_patterns.clone(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime Ingestor configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub upload_attempts: u32,
    pub halt_after_unreachable_batches: u32,
    pub bucket_name: String,
}

impl From<&AppConfig> for IngestConfig {
    fn from(config: &AppConfig) -> Self {
        let i = &config.ingest;
        Self {
            batch_size: i.batch_size.max(1),
            batch_delay_ms: i.batch_delay_ms,
            upload_attempts: i.upload_attempts.max(1),
            halt_after_unreachable_batches: i.halt_after_unreachable_batches.max(1),
            bucket_name: i.bucket_name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sitecorpus/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SiteCorpusError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitecorpus/sitecorpus.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SiteCorpusError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        SiteCorpusError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    init_config_at(&config_file_path()?)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| SiteCorpusError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SiteCorpusError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| SiteCorpusError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}

/// Read a non-empty API key from the environment variable named `var_name`.
pub fn read_api_key(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(SiteCorpusError::Credentials(format!(
            "{var_name} is not set. Export it or add it to your environment before running."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("GROUNDX_API_KEY"));
        assert!(toml_str.contains("application/pdf"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crawl.max_pages, 50);
        assert_eq!(parsed.ingest.batch_size, 10);
        assert_eq!(parsed.filter.target_language, "en");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[crawl]
seed_urls = ["https://docs.example.com/en"]
concurrency = 8

[ingest]
batch_size = 2
batch_delay_ms = 0
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.crawl.seed_urls, vec!["https://docs.example.com/en"]);
        assert_eq!(config.crawl.concurrency, 8);
        assert_eq!(config.crawl.depth, 3);
        assert_eq!(config.ingest.batch_size, 2);
        assert_eq!(config.ingest.upload_attempts, 3);
        assert_eq!(config.remote.top_k, 5);
    }

    #[test]
    fn runtime_configs_clamp_zero_values() {
        let mut app = AppConfig::default();
        app.crawl.concurrency = 0;
        app.ingest.batch_size = 0;
        let crawl = CrawlConfig::from(&app);
        let ingest = IngestConfig::from(&app);
        assert_eq!(crawl.concurrency, 1);
        assert_eq!(ingest.batch_size, 1);
    }

    #[test]
    fn init_config_at_writes_defaults() {
        let path = std::env::temp_dir()
            .join(format!("sc-config-{}", uuid::Uuid::now_v7()))
            .join("sitecorpus.toml");
        let written = init_config_at(&path).expect("init");
        let loaded = load_config_from(&written).expect("load");
        assert_eq!(loaded.ingest.bucket_name, "itnb-website-content");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_api_key_is_credentials_error() {
        // Unique name so other tests cannot interfere.
        let result = read_api_key("SC_TEST_NONEXISTENT_KEY_12345");
        assert!(matches!(result, Err(SiteCorpusError::Credentials(_))));
    }
}
