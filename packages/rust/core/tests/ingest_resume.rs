mod common;

use std::io::Write;
use std::time::Duration;

use sitecorpus_core::{SilentProgress, ingest_store};
use sitecorpus_shared::{IngestConfig, IngestStatus, SiteCorpusError};
use sitecorpus_storage::{AuditLog, Storage};

use common::{FakeIndex, document, temp_dir};

fn ingest_config(batch_size: usize) -> IngestConfig {
    IngestConfig {
        batch_size,
        batch_delay_ms: 0,
        upload_attempts: 1,
        halt_after_unreachable_batches: 3,
        bucket_name: "itnb-website-content".into(),
    }
}

async fn store_with(dir: &std::path::Path, n: i64) -> Storage {
    let storage = Storage::open(&dir.join("corpus.db")).await.unwrap();
    for i in 1..=n {
        storage.persist(&document(i)).await.unwrap();
    }
    storage
}

#[tokio::test]
async fn failed_batch_is_retried_by_the_next_run() {
    let dir = temp_dir("sc_ingest");
    let storage = store_with(&dir, 3).await;
    let audit_path = dir.join("audit.jsonl");
    let index = FakeIndex::failing_on(&[2]);
    let config = ingest_config(2);

    let mut audit = AuditLog::open(&audit_path).await.unwrap();
    let first = ingest_store(&config, &index, &storage, &mut audit, &SilentProgress)
        .await
        .unwrap();

    assert_eq!(first.batches, 2);
    assert_eq!(first.count(IngestStatus::Success), 2);
    assert_eq!(first.count(IngestStatus::Failed), 1);
    let failed = first
        .records
        .iter()
        .find(|r| r.status == IngestStatus::Failed)
        .unwrap();
    assert_eq!(failed.document_id, document(3).id);
    assert!(failed.error_detail.as_deref().unwrap().contains("connection refused"));

    let logged = audit.read_all().await.unwrap();
    assert_eq!(logged.len(), 3);
    assert_eq!(logged.iter().filter(|r| r.status == IngestStatus::Success).count(), 2);
    assert_eq!(logged.iter().filter(|r| r.status == IngestStatus::Failed).count(), 1);

    index.heal();
    let calls_before = index.call_count();
    let second = ingest_store(&config, &index, &storage, &mut audit, &SilentProgress)
        .await
        .unwrap();

    assert_eq!(second.count(IngestStatus::SkippedDuplicate), 2);
    assert_eq!(second.count(IngestStatus::Success), 1);
    assert_eq!(index.uploaded_since(calls_before), vec![document(3).id]);
    assert!(
        second
            .records
            .iter()
            .filter(|r| r.status == IngestStatus::SkippedDuplicate)
            .all(|r| r.batch_id.is_none())
    );
}

#[tokio::test]
async fn ingesting_twice_never_uploads_twice() {
    let dir = temp_dir("sc_idem");
    let storage = store_with(&dir, 5).await;
    let index = FakeIndex::default();
    let config = ingest_config(2);
    let mut audit = AuditLog::open(&dir.join("audit.jsonl")).await.unwrap();

    ingest_store(&config, &index, &storage, &mut audit, &SilentProgress)
        .await
        .unwrap();
    let calls = index.call_count();
    assert_eq!(calls, 3);

    let again = ingest_store(&config, &index, &storage, &mut audit, &SilentProgress)
        .await
        .unwrap();

    assert_eq!(index.call_count(), calls);
    assert_eq!(again.count(IngestStatus::SkippedDuplicate), 5);
    assert_eq!(index.stored.lock().unwrap().len(), 5);
    assert_eq!(index.duplicate_uploads(), 0);
    assert_eq!(index.buckets.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn torn_audit_tail_is_dropped_and_ingest_resumes() {
    let dir = temp_dir("sc_crash");
    let storage = store_with(&dir, 3).await;
    let audit_path = dir.join("audit.jsonl");
    let index = FakeIndex::default();
    let config = ingest_config(2);

    {
        let mut audit = AuditLog::open(&audit_path).await.unwrap();
        ingest_store(&config, &index, &storage, &mut audit, &SilentProgress)
            .await
            .unwrap();
    }

    // Process killed mid-append.
    let mut file = std::fs::OpenOptions::new().append(true).open(&audit_path).unwrap();
    file.write_all(br#"{"run_id":"0190a1b2-c3d4-7e5f-8a9b-0c1d2e3f4a5b","document_id":"fp00"#)
        .unwrap();
    drop(file);

    let mut audit = AuditLog::open(&audit_path).await.unwrap();
    assert_eq!(audit.len(), 3);

    let calls = index.call_count();
    let rerun = ingest_store(&config, &index, &storage, &mut audit, &SilentProgress)
        .await
        .unwrap();

    assert_eq!(index.call_count(), calls);
    assert_eq!(rerun.count(IngestStatus::SkippedDuplicate), 3);
    assert_eq!(audit.read_all().await.unwrap().len(), 6);
}

#[tokio::test]
async fn unreachable_index_halts_after_consecutive_batches() {
    let dir = temp_dir("sc_halt");
    let storage = store_with(&dir, 5).await;
    let index = FakeIndex::default();
    *index.always_down.lock().unwrap() = true;
    let config = IngestConfig {
        halt_after_unreachable_batches: 2,
        ..ingest_config(1)
    };
    let mut audit = AuditLog::open(&dir.join("audit.jsonl")).await.unwrap();

    let err = ingest_store(&config, &index, &storage, &mut audit, &SilentProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, SiteCorpusError::Remote(_)));
    assert_eq!(index.call_count(), 2);
    let logged = audit.read_all().await.unwrap();
    assert_eq!(logged.len(), 2);
    assert!(logged.iter().all(|r| r.status == IngestStatus::Failed));
}

#[tokio::test(start_paused = true)]
async fn delay_applies_between_batches_only() {
    let dir = temp_dir("sc_ingest");
    let storage = store_with(&dir, 3).await;
    let index = FakeIndex::default();
    let mut config = ingest_config(1);
    config.batch_delay_ms = 1_000;
    let mut audit = AuditLog::open(&dir.join("audit.jsonl")).await.unwrap();

    let started = tokio::time::Instant::now();
    let report = ingest_store(&config, &index, &storage, &mut audit, &SilentProgress)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.batches, 3);
    assert_eq!(report.count(IngestStatus::Success), 3);
    // Two gaps for three batches; none before the first.
    assert!(
        elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3),
        "elapsed {elapsed:?}"
    );
}
