//! Append-only Audit Log of ingestion outcomes, stored as JSON Lines.
//!
//! Each [`IngestionRecord`] is one line, written and synced before
//! [`AuditLog::append`] returns. On open, a torn final line (process killed
//! mid-write) is truncated away; a malformed line followed by well-formed
//! ones means the file was tampered with and is a storage error.

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use sitecorpus_shared::{DocumentId, IngestStatus, IngestionRecord, Result, RunId, SiteCorpusError};

/// Writer handle for the Audit Log. There is one writer per log at a time.
pub struct AuditLog {
    path: PathBuf,
    file: fs::File,
    succeeded: HashSet<DocumentId>,
    recorded: HashSet<(RunId, DocumentId)>,
    len: usize,
}

impl AuditLog {
    /// Open or create the log at `path`, repairing a torn final line.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SiteCorpusError::io(parent, e))?;
        }

        let data = read_bytes(path).await?;
        let parsed = parse_log(&data)?;

        if parsed.good_len < data.len() {
            if parsed.torn_tail {
                warn!(
                    path = %path.display(),
                    dropped_bytes = data.len() - parsed.good_len,
                    "truncating malformed trailing audit entry"
                );
            }
            let f = OpenOptions::new()
                .write(true)
                .open(path)
                .await
                .map_err(|e| SiteCorpusError::io(path, e))?;
            f.set_len(parsed.good_len as u64)
                .await
                .map_err(|e| SiteCorpusError::io(path, e))?;
            f.sync_data().await.map_err(|e| SiteCorpusError::io(path, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| SiteCorpusError::io(path, e))?;

        // Last complete record may lack its newline.
        if parsed.good_len > 0 && data[parsed.good_len - 1] != b'\n' {
            file.write_all(b"\n")
                .await
                .map_err(|e| SiteCorpusError::io(path, e))?;
            file.sync_data().await.map_err(|e| SiteCorpusError::io(path, e))?;
        }

        let mut log = Self {
            path: path.to_path_buf(),
            file,
            succeeded: HashSet::new(),
            recorded: HashSet::new(),
            len: 0,
        };
        for record in &parsed.records {
            log.index(record);
        }

        debug!(path = %path.display(), entries = log.len, "audit log opened");
        Ok(log)
    }

    /// Append one record and sync it to disk.
    ///
    /// A second record for the same document in the same run is rejected.
    pub async fn append(&mut self, record: &IngestionRecord) -> Result<()> {
        let key = (record.run_id.clone(), record.document_id.clone());
        if self.recorded.contains(&key) {
            return Err(SiteCorpusError::validation(format!(
                "document {} already has an audit entry in run {}",
                record.document_id.short(),
                record.run_id
            )));
        }

        let mut line = serde_json::to_vec(record)
            .map_err(|e| SiteCorpusError::Storage(format!("failed to encode audit entry: {e}")))?;
        line.push(b'\n');

        self.file
            .write_all(&line)
            .await
            .map_err(|e| SiteCorpusError::io(&self.path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| SiteCorpusError::io(&self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| SiteCorpusError::io(&self.path, e))?;

        self.index(record);
        Ok(())
    }

    /// All records in append order.
    pub async fn read_all(&self) -> Result<Vec<IngestionRecord>> {
        read_records(&self.path).await
    }

    /// Whether the document has a `success` entry in any run.
    pub fn latest_success(&self, document_id: &DocumentId) -> bool {
        self.succeeded.contains(document_id)
    }

    /// Number of records in the log.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn index(&mut self, record: &IngestionRecord) {
        if record.status == IngestStatus::Success {
            self.succeeded.insert(record.document_id.clone());
        }
        self.recorded
            .insert((record.run_id.clone(), record.document_id.clone()));
        self.len += 1;
    }
}

/// Read all records from a log without opening it for writing.
///
/// A malformed final line is skipped; a missing file reads as empty.
pub async fn read_records(path: &Path) -> Result<Vec<IngestionRecord>> {
    let data = read_bytes(path).await?;
    Ok(parse_log(&data)?.records)
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path).await {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(SiteCorpusError::io(path, e)),
    }
}

struct ParsedLog {
    records: Vec<IngestionRecord>,
    /// Byte length of the well-formed prefix.
    good_len: usize,
    /// Whether a malformed final line was dropped.
    torn_tail: bool,
}

fn parse_log(data: &[u8]) -> Result<ParsedLog> {
    let mut records = Vec::new();
    let mut good_len = 0;
    let mut pos = 0;
    let mut line_no = 0;

    while pos < data.len() {
        let (line, next) = match data[pos..].iter().position(|&b| b == b'\n') {
            Some(i) => (&data[pos..pos + i], pos + i + 1),
            None => (&data[pos..], data.len()),
        };
        line_no += 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            pos = next;
            continue;
        }

        match serde_json::from_slice::<IngestionRecord>(line) {
            Ok(record) => {
                records.push(record);
                good_len = next;
            }
            Err(e) => {
                if data[next..].iter().all(u8::is_ascii_whitespace) {
                    return Ok(ParsedLog {
                        records,
                        good_len,
                        torn_tail: true,
                    });
                }
                return Err(SiteCorpusError::Storage(format!(
                    "malformed audit entry at line {line_no}: {e}"
                )));
            }
        }
        pos = next;
    }

    Ok(ParsedLog {
        records,
        good_len,
        torn_tail: false,
    })
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Per-status totals and failed entries, for operator triage.
#[derive(Debug, Clone, Default)]
pub struct AuditSummary {
    pub total: usize,
    pub success: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    /// Failed entries, in append order.
    pub failures: Vec<IngestionRecord>,
    /// Entry count per run, ordered by run id (time-sortable).
    pub runs: BTreeMap<String, usize>,
}

impl AuditSummary {
    /// Summarize `records`, optionally restricted to one run.
    pub fn from_records(records: &[IngestionRecord], run: Option<&RunId>) -> Self {
        let mut summary = Self::default();
        for record in records {
            if run.is_some_and(|r| *r != record.run_id) {
                continue;
            }
            summary.total += 1;
            *summary.runs.entry(record.run_id.to_string()).or_default() += 1;
            match record.status {
                IngestStatus::Success => summary.success += 1,
                IngestStatus::SkippedDuplicate => summary.skipped_duplicate += 1,
                IngestStatus::Failed => {
                    summary.failed += 1;
                    summary.failures.push(record.clone());
                }
            }
        }
        summary
    }
}
