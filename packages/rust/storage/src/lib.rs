//! Local Content Store (libSQL) and Audit Log (JSON Lines).
//!
//! The [`Storage`] struct wraps a libSQL database holding accepted
//! documents keyed by content fingerprint, crawl run history, and the URL
//! records discovered by each run. The [`AuditLog`] is a separate
//! append-only file of ingestion outcomes.
//!
//! **Access rules:**
//! - crawl and ingest: read-write (sole writer) via [`Storage::open`]
//! - status, export, chat: read-only via [`Storage::open_readonly`]

pub mod audit;
mod migrations;

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use uuid::Uuid;

use sitecorpus_shared::{DocumentId, RawDocument, Result, SiteCorpusError, UrlRecord};

pub use audit::{AuditLog, AuditSummary, read_records};

/// Documents fetched per page by [`PendingDocuments`].
const PENDING_PAGE_SIZE: u32 = 64;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SiteCorpusError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SiteCorpusError::Storage(format!(
                "no corpus database at {}; run `sitecorpus crawl` first",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        SiteCorpusError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SiteCorpusError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Document operations
    // -----------------------------------------------------------------------

    /// Persist an accepted document. Re-persisting a fingerprint overwrites it.
    pub async fn persist(&self, doc: &RawDocument) -> Result<()> {
        self.check_writable()?;
        let now = format_ts(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO documents (id, source_url, title, body_text, language_tag, content_type, fetched_at, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   source_url = excluded.source_url,
                   title = excluded.title,
                   body_text = excluded.body_text,
                   language_tag = excluded.language_tag,
                   content_type = excluded.content_type,
                   fetched_at = excluded.fetched_at,
                   stored_at = excluded.stored_at",
                params![
                    doc.id.as_str(),
                    doc.source_url.as_str(),
                    doc.title.as_str(),
                    doc.body_text.as_str(),
                    doc.language_tag.as_deref(),
                    doc.content_type.as_str(),
                    format_ts(&doc.fetched_at),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        tracing::debug!(fingerprint = doc.id.short(), url = %doc.source_url, "document persisted");
        Ok(())
    }

    /// Get a document by fingerprint.
    pub async fn get_document(&self, id: &DocumentId) -> Result<Option<RawDocument>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source_url, title, body_text, language_tag, content_type, fetched_at
                 FROM documents WHERE id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(SiteCorpusError::Storage(e.to_string())),
        }
    }

    /// Number of documents in the store.
    pub async fn count_documents(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM documents", params![])
            .await
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as usize),
            Ok(None) => Ok(0),
            Err(e) => Err(SiteCorpusError::Storage(e.to_string())),
        }
    }

    /// All documents ordered by fetch time.
    pub async fn list_all(&self) -> Result<Vec<RawDocument>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source_url, title, body_text, language_tag, content_type, fetched_at
                 FROM documents ORDER BY fetched_at, id",
                params![],
            )
            .await
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_document(&row)?);
        }
        Ok(results)
    }

    /// Lazy sequence of all documents ordered by fetch time.
    ///
    /// Documents are read a page at a time. The sequence can be resumed from
    /// [`PendingDocuments::cursor`] with [`Storage::list_pending_after`].
    pub fn list_pending(&self) -> PendingDocuments<'_> {
        PendingDocuments::new(self, None)
    }

    /// Resume a [`list_pending`](Self::list_pending) sequence after `cursor`.
    pub fn list_pending_after(&self, cursor: DocumentCursor) -> PendingDocuments<'_> {
        PendingDocuments::new(self, Some(cursor))
    }

    async fn fetch_page(&self, after: Option<&DocumentCursor>, limit: u32) -> Result<Vec<RawDocument>> {
        let mut rows = match after {
            Some(c) => {
                self.conn
                    .query(
                        "SELECT id, source_url, title, body_text, language_tag, content_type, fetched_at
                         FROM documents
                         WHERE fetched_at > ?1 OR (fetched_at = ?1 AND id > ?2)
                         ORDER BY fetched_at, id
                         LIMIT ?3",
                        params![c.fetched_at.as_str(), c.id.as_str(), limit],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        "SELECT id, source_url, title, body_text, language_tag, content_type, fetched_at
                         FROM documents
                         ORDER BY fetched_at, id
                         LIMIT ?1",
                        params![limit],
                    )
                    .await
            }
        }
        .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_document(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Crawl run operations
    // -----------------------------------------------------------------------

    /// Insert a new crawl run. Returns the generated run ID.
    pub async fn insert_crawl_run(&self, seed_url: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = format_ts(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO crawl_runs (id, seed_url, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), seed_url, now.as_str()],
            )
            .await
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Mark a crawl run finished with its stats.
    pub async fn finish_crawl_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = format_ts(&Utc::now());
        self.conn
            .execute(
                "UPDATE crawl_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent crawl runs, newest first.
    pub async fn list_crawl_runs(&self, limit: u32) -> Result<Vec<CrawlRunRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, seed_url, started_at, finished_at, stats_json
                 FROM crawl_runs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(CrawlRunRow {
                id: row
                    .get::<String>(0)
                    .map_err(|e| SiteCorpusError::Storage(e.to_string()))?,
                seed_url: row
                    .get::<String>(1)
                    .map_err(|e| SiteCorpusError::Storage(e.to_string()))?,
                started_at: parse_ts(
                    &row.get::<String>(2)
                        .map_err(|e| SiteCorpusError::Storage(e.to_string()))?,
                )?,
                finished_at: row.get::<String>(3).ok().map(|s| parse_ts(&s)).transpose()?,
                stats_json: row.get::<String>(4).ok(),
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // URL record operations
    // -----------------------------------------------------------------------

    /// Store the URL records of a crawl run.
    pub async fn record_urls(&self, run_id: &str, records: &[UrlRecord]) -> Result<()> {
        self.check_writable()?;
        for record in records {
            self.conn
                .execute(
                    "INSERT INTO url_records (run_id, url, discovered_from, visited)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(run_id, url) DO UPDATE SET visited = excluded.visited",
                    params![
                        run_id,
                        record.url.as_str(),
                        record.discovered_from.as_deref(),
                        i64::from(record.visited),
                    ],
                )
                .await
                .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// URL records of a crawl run, in discovery order.
    pub async fn list_url_records(&self, run_id: &str) -> Result<Vec<UrlRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, discovered_from, visited FROM url_records
                 WHERE run_id = ?1 ORDER BY rowid",
                params![run_id],
            )
            .await
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(UrlRecord {
                url: row
                    .get::<String>(0)
                    .map_err(|e| SiteCorpusError::Storage(e.to_string()))?,
                discovered_from: row.get::<String>(1).ok(),
                visited: row.get::<i64>(2).unwrap_or(0) != 0,
            });
        }
        Ok(results)
    }
}

/// A row of the `crawl_runs` table.
#[derive(Debug, Clone)]
pub struct CrawlRunRow {
    pub id: String,
    pub seed_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats_json: Option<String>,
}

// ---------------------------------------------------------------------------
// Pending document cursor
// ---------------------------------------------------------------------------

/// Position in the fetch-time ordering of documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentCursor {
    pub fetched_at: String,
    pub id: DocumentId,
}

impl DocumentCursor {
    fn of(doc: &RawDocument) -> Self {
        Self {
            fetched_at: format_ts(&doc.fetched_at),
            id: doc.id.clone(),
        }
    }
}

/// Lazy, restartable sequence of stored documents ordered by fetch time.
pub struct PendingDocuments<'a> {
    storage: &'a Storage,
    after: Option<DocumentCursor>,
    buffer: VecDeque<RawDocument>,
    exhausted: bool,
}

impl<'a> PendingDocuments<'a> {
    fn new(storage: &'a Storage, after: Option<DocumentCursor>) -> Self {
        Self {
            storage,
            after,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next document, or `None` when the store is exhausted.
    pub async fn next(&mut self) -> Result<Option<RawDocument>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .storage
                .fetch_page(self.after.as_ref(), PENDING_PAGE_SIZE)
                .await?;
            if (page.len() as u32) < PENDING_PAGE_SIZE {
                self.exhausted = true;
            }
            self.buffer.extend(page);
        }

        let Some(doc) = self.buffer.pop_front() else {
            return Ok(None);
        };
        self.after = Some(DocumentCursor::of(&doc));
        Ok(Some(doc))
    }

    /// Position after the last document returned by [`next`](Self::next).
    pub fn cursor(&self) -> Option<&DocumentCursor> {
        self.after.as_ref()
    }

    /// Drain the remaining sequence into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<RawDocument>> {
        let mut docs = Vec::new();
        while let Some(doc) = self.next().await? {
            docs.push(doc);
        }
        Ok(docs)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Fixed-width UTC timestamp so lexical order matches time order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SiteCorpusError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`RawDocument`].
fn row_to_document(row: &libsql::Row) -> Result<RawDocument> {
    Ok(RawDocument {
        id: DocumentId(
            row.get::<String>(0)
                .map_err(|e| SiteCorpusError::Storage(e.to_string()))?,
        ),
        source_url: row
            .get::<String>(1)
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?,
        title: row
            .get::<String>(2)
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?,
        body_text: row
            .get::<String>(3)
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?,
        language_tag: row.get::<String>(4).ok(),
        content_type: row
            .get::<String>(5)
            .map_err(|e| SiteCorpusError::Storage(e.to_string()))?,
        fetched_at: parse_ts(
            &row.get::<String>(6)
                .map_err(|e| SiteCorpusError::Storage(e.to_string()))?,
        )?,
    })
}
