//! Core orchestration for sitecorpus.
//!
//! This crate ties the crawler, the Content Filter, the Local Content Store,
//! the Audit Log and the remote index together into end-to-end workflows:
//! [`pipeline::crawl_site`], the [`ingest::Ingestor`], the retrieval-backed
//! [`chat::Answerer`] and the corpus [`export`].

pub mod chat;
pub mod export;
pub mod ingest;
pub mod pipeline;

pub use chat::{Answer, Answerer, ChatModel, Reply, Source};
pub use export::export_corpus;
pub use ingest::{IngestReport, Ingestor, ingest_store};
pub use pipeline::{CrawlReport, ProgressReporter, SilentProgress, crawl_site};
