//! Ingestor: batched, idempotent upload of stored documents to the remote index.
//!
//! Documents whose fingerprint already has a `success` entry in the Audit Log
//! are recorded `skipped_duplicate` without a network call. The rest are
//! grouped into fixed-size batches and uploaded strictly one batch at a time;
//! every record of a batch is appended to the Audit Log before the next batch
//! is considered. Re-running an ingest is the retry mechanism for `failed`
//! documents.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use sitecorpus_index::{Bucket, RemoteError, RemoteIndex, UploadDocument, UploadOutcome, ensure_bucket};
use sitecorpus_shared::{
    Batch, DocumentId, IngestConfig, IngestStatus, IngestionRecord, RawDocument, Result, RunId,
    SiteCorpusError,
};
use sitecorpus_storage::{AuditLog, PendingDocuments, Storage};

use crate::pipeline::ProgressReporter;

/// Detail recorded when a per-document response omits a submitted document.
const MISSING_RESULT: &str = "no result reported for document";

// ---------------------------------------------------------------------------
// IngestReport
// ---------------------------------------------------------------------------

/// Everything one ingest run recorded.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub run_id: RunId,
    /// Records in the order they were appended to the Audit Log.
    pub records: Vec<IngestionRecord>,
    /// Upload calls made.
    pub batches: usize,
}

impl IngestReport {
    pub fn count(&self, status: IngestStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

/// Uploads documents to one bucket and records each outcome.
pub struct Ingestor<'a> {
    config: IngestConfig,
    index: &'a dyn RemoteIndex,
    audit: &'a mut AuditLog,
    bucket: Bucket,
}

/// Mutable state of a single run.
struct RunState {
    report: IngestReport,
    seen: HashSet<DocumentId>,
    pending: Vec<RawDocument>,
    consecutive_transport_failures: u32,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        config: IngestConfig,
        index: &'a dyn RemoteIndex,
        audit: &'a mut AuditLog,
        bucket: Bucket,
    ) -> Self {
        Self {
            config,
            index,
            audit,
            bucket,
        }
    }

    /// Ingest an in-memory document set.
    #[instrument(skip_all, fields(bucket = %self.bucket.name, documents = documents.len()))]
    pub async fn ingest(
        &mut self,
        documents: Vec<RawDocument>,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestReport> {
        let mut run = self.start_run();
        for doc in documents {
            self.offer(&mut run, doc, progress).await?;
        }
        self.finish(run, progress).await
    }

    /// Ingest everything the Local Content Store lists as pending, lazily.
    #[instrument(skip_all, fields(bucket = %self.bucket.name))]
    pub async fn ingest_pending(
        &mut self,
        mut pending: PendingDocuments<'_>,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestReport> {
        let mut run = self.start_run();
        while let Some(doc) = pending.next().await? {
            self.offer(&mut run, doc, progress).await?;
        }
        self.finish(run, progress).await
    }

    fn start_run(&self) -> RunState {
        let run_id = RunId::new();
        info!(%run_id, batch_size = self.config.batch_size, "ingest run started");
        RunState {
            report: IngestReport {
                run_id,
                records: Vec::new(),
                batches: 0,
            },
            seen: HashSet::new(),
            pending: Vec::with_capacity(self.config.batch_size),
            consecutive_transport_failures: 0,
        }
    }

    /// Dedup one document, then queue it for the next batch.
    async fn offer(
        &mut self,
        run: &mut RunState,
        doc: RawDocument,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        if !run.seen.insert(doc.id.clone()) {
            debug!(fingerprint = doc.id.short(), url = %doc.source_url, "duplicate within run, ignored");
            return Ok(());
        }

        if self.audit.latest_success(&doc.id) {
            debug!(fingerprint = doc.id.short(), "already ingested, skipping");
            let record = IngestionRecord {
                run_id: run.report.run_id.clone(),
                document_id: doc.id,
                source_url: doc.source_url,
                status: IngestStatus::SkippedDuplicate,
                error_detail: None,
                attempted_at: Utc::now(),
                batch_id: None,
            };
            self.audit.append(&record).await?;
            run.report.records.push(record);
            return Ok(());
        }

        run.pending.push(doc);
        if run.pending.len() >= self.config.batch_size {
            self.submit(run, progress).await?;
        }
        Ok(())
    }

    async fn finish(&mut self, mut run: RunState, progress: &dyn ProgressReporter) -> Result<IngestReport> {
        if !run.pending.is_empty() {
            self.submit(&mut run, progress).await?;
        }

        let report = run.report;
        info!(
            run_id = %report.run_id,
            batches = report.batches,
            success = report.count(IngestStatus::Success),
            skipped = report.count(IngestStatus::SkippedDuplicate),
            failed = report.count(IngestStatus::Failed),
            "ingest run finished"
        );
        progress.done();
        Ok(report)
    }

    /// Upload the queued documents as one batch and record every outcome.
    async fn submit(&mut self, run: &mut RunState, progress: &dyn ProgressReporter) -> Result<()> {
        if run.report.batches > 0 && self.config.batch_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
        }

        let documents = std::mem::take(&mut run.pending);
        let batch = Batch::new(documents.iter().map(|d| d.id.clone()).collect());
        let uploads: Vec<UploadDocument> = documents.iter().map(UploadDocument::from).collect();

        debug!(batch_id = %batch.batch_id, documents = uploads.len(), "uploading batch");
        let response = self.index.upload(&self.bucket, &uploads).await;
        run.report.batches += 1;

        let transport_error = match &response {
            Err(e) if e.is_transport() => Some(e.to_string()),
            _ => None,
        };
        let outcomes = resolve_outcomes(&batch, response);

        let mut failed = 0;
        for (doc, outcome) in documents.into_iter().zip(outcomes) {
            let (status, error_detail) = match outcome {
                Ok(()) => (IngestStatus::Success, None),
                Err(detail) => {
                    failed += 1;
                    (IngestStatus::Failed, Some(detail))
                }
            };
            let record = IngestionRecord {
                run_id: run.report.run_id.clone(),
                document_id: doc.id,
                source_url: doc.source_url,
                status,
                error_detail,
                attempted_at: batch.submitted_at,
                batch_id: Some(batch.batch_id.clone()),
            };
            self.audit.append(&record).await?;
            run.report.records.push(record);
        }

        if failed > 0 {
            warn!(batch_id = %batch.batch_id, failed, total = batch.document_ids.len(), "batch had failures");
        } else {
            info!(batch_id = %batch.batch_id, documents = batch.document_ids.len(), "batch ingested");
        }
        progress.batch_recorded(run.report.batches, batch.document_ids.len(), failed);

        match transport_error {
            Some(error) => {
                run.consecutive_transport_failures += 1;
                if run.consecutive_transport_failures >= self.config.halt_after_unreachable_batches {
                    return Err(SiteCorpusError::Remote(format!(
                        "remote index unreachable for {} consecutive batches, halting: {error}",
                        run.consecutive_transport_failures
                    )));
                }
            }
            None => run.consecutive_transport_failures = 0,
        }
        Ok(())
    }
}

/// Resolve either response shape into one outcome per batch member, in order.
///
/// A failed call fails every document; a per-document response that omits a
/// document fails that document.
fn resolve_outcomes(
    batch: &Batch,
    response: std::result::Result<UploadOutcome, RemoteError>,
) -> Vec<std::result::Result<(), String>> {
    match response {
        Ok(UploadOutcome::Batch) => batch.document_ids.iter().map(|_| Ok(())).collect(),
        Ok(UploadOutcome::PerDocument(results)) => {
            let mut by_id: HashMap<DocumentId, std::result::Result<(), String>> = results
                .into_iter()
                .map(|r| (r.document_id, r.outcome))
                .collect();
            batch
                .document_ids
                .iter()
                .map(|id| by_id.remove(id).unwrap_or_else(|| Err(MISSING_RESULT.to_string())))
                .collect()
        }
        Err(e) => {
            let detail = e.to_string();
            batch.document_ids.iter().map(|_| Err(detail.clone())).collect()
        }
    }
}

// ---------------------------------------------------------------------------
// ingest_store
// ---------------------------------------------------------------------------

/// Ingest every pending document in `storage` into the configured bucket.
///
/// The bucket is created if missing. A transport failure while resolving
/// the bucket is fatal before any record is written.
#[instrument(skip_all, fields(bucket = %config.bucket_name))]
pub async fn ingest_store(
    config: &IngestConfig,
    index: &dyn RemoteIndex,
    storage: &Storage,
    audit: &mut AuditLog,
    progress: &dyn ProgressReporter,
) -> Result<IngestReport> {
    progress.phase("Resolving bucket");
    let bucket = ensure_bucket(index, &config.bucket_name)
        .await
        .map_err(|e| SiteCorpusError::Remote(format!("cannot resolve bucket '{}': {e}", config.bucket_name)))?;

    progress.phase("Uploading");
    let mut ingestor = Ingestor::new(config.clone(), index, audit, bucket);
    ingestor.ingest_pending(storage.list_pending(), progress).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitecorpus_index::DocumentResult;

    fn batch(ids: &[&str]) -> Batch {
        Batch::new(ids.iter().map(|id| DocumentId::from(*id)).collect())
    }

    #[test]
    fn whole_batch_success() {
        let outcomes = resolve_outcomes(&batch(&["a", "b"]), Ok(UploadOutcome::Batch));
        assert_eq!(outcomes, vec![Ok(()), Ok(())]);
    }

    #[test]
    fn failed_call_fails_every_document() {
        let outcomes = resolve_outcomes(&batch(&["a", "b"]), Err(RemoteError::Timeout));
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.as_ref().unwrap_err().contains("timed out")));
    }

    #[test]
    fn per_document_results_mapped_by_id() {
        let response = UploadOutcome::PerDocument(vec![
            DocumentResult {
                document_id: DocumentId::from("b"),
                outcome: Err("too large".into()),
            },
            DocumentResult {
                document_id: DocumentId::from("a"),
                outcome: Ok(()),
            },
        ]);
        let outcomes = resolve_outcomes(&batch(&["a", "b", "c"]), Ok(response));
        assert_eq!(
            outcomes,
            vec![Ok(()), Err("too large".to_string()), Err(MISSING_RESULT.to_string())]
        );
    }
}
