//! Shared types, error model, and configuration for sitecorpus.
//!
//! This crate is the foundation depended on by all other sitecorpus crates.
//! It provides:
//! - [`SiteCorpusError`], the unified error type
//! - Domain types ([`UrlRecord`], [`RawDocument`], [`IngestionRecord`], [`Batch`])
//! - Configuration ([`AppConfig`], runtime [`CrawlConfig`] / [`FilterConfig`] /
//!   [`IngestConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlSection, DefaultsConfig, FilterConfig, FilterSection,
    IngestConfig, IngestSection, LlmConfig, RemoteConfig, config_dir, config_file_path,
    init_config, init_config_at, load_config, load_config_from, read_api_key,
};
pub use error::{Result, SiteCorpusError};
pub use types::{Batch, DocumentId, IngestStatus, IngestionRecord, RawDocument, RunId, UrlRecord};
