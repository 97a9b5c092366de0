//! Frontier, page fetching, and the crawl loop.
//!
//! This crate provides:
//! - [`frontier`]: discovered URL records, scope rules, and the fetch queue
//! - [`fetcher`]: the [`PageFetcher`] boundary and its HTTP implementation
//! - [`render`]: HTML to text rendering
//! - [`engine`]: the concurrent crawl loop feeding a [`PageSink`]

pub mod engine;
pub mod fetcher;
pub mod frontier;
pub mod render;

pub use engine::{CrawlResult, Crawler, PageSink};
pub use fetcher::{FetchError, FetchedPage, HttpFetcher, PageFetcher, mime_essence};
pub use frontier::{Frontier, QueuedUrl, normalize_url, registrable_domain};
pub use render::{RenderedPage, render_html};
