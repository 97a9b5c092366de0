//! Dump the Local Content Store to a single JSON file.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use sitecorpus_shared::{RawDocument, Result, SiteCorpusError};
use sitecorpus_storage::Storage;

#[derive(Serialize)]
struct CorpusExport<'a> {
    exported_at: DateTime<Utc>,
    total_documents: usize,
    total_words: usize,
    documents: Vec<ExportedDocument<'a>>,
}

#[derive(Serialize)]
struct ExportedDocument<'a> {
    fingerprint: &'a str,
    url: &'a str,
    title: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    content_type: &'a str,
    fetched_at: DateTime<Utc>,
    word_count: usize,
}

impl<'a> From<&'a RawDocument> for ExportedDocument<'a> {
    fn from(doc: &'a RawDocument) -> Self {
        Self {
            fingerprint: doc.id.as_str(),
            url: &doc.source_url,
            title: &doc.title,
            content: &doc.body_text,
            language: doc.language_tag.as_deref(),
            content_type: &doc.content_type,
            fetched_at: doc.fetched_at,
            word_count: doc.word_count(),
        }
    }
}

/// Write every stored document, in fetch order, to `output` as pretty JSON.
///
/// Returns the number of documents written.
#[instrument(skip(storage))]
pub async fn export_corpus(storage: &Storage, output: &Path) -> Result<usize> {
    let documents = storage.list_all().await?;
    let exported: Vec<ExportedDocument<'_>> = documents.iter().map(ExportedDocument::from).collect();

    let export = CorpusExport {
        exported_at: Utc::now(),
        total_documents: exported.len(),
        total_words: exported.iter().map(|d| d.word_count).sum(),
        documents: exported,
    };
    let json = serde_json::to_vec_pretty(&export)
        .map_err(|e| SiteCorpusError::Storage(format!("failed to encode export: {e}")))?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SiteCorpusError::io(parent, e))?;
    }
    tokio::fs::write(output, json)
        .await
        .map_err(|e| SiteCorpusError::io(output, e))?;

    info!(documents = export.total_documents, path = %output.display(), "corpus exported");
    Ok(export.total_documents)
}
