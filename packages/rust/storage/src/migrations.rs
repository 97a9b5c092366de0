//! SQL migration definitions for the corpus database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: documents, crawl_runs, url_records",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Accepted documents, one row per content fingerprint
CREATE TABLE IF NOT EXISTS documents (
    id           TEXT PRIMARY KEY,
    source_url   TEXT NOT NULL,
    title        TEXT NOT NULL,
    body_text    TEXT NOT NULL,
    language_tag TEXT,
    content_type TEXT NOT NULL,
    fetched_at   TEXT NOT NULL,
    stored_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_fetched ON documents(fetched_at, id);
CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source_url);

-- Crawl run history
CREATE TABLE IF NOT EXISTS crawl_runs (
    id          TEXT PRIMARY KEY,
    seed_url    TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

-- Every URL discovered in a crawl run, including off-domain ones
CREATE TABLE IF NOT EXISTS url_records (
    run_id          TEXT NOT NULL REFERENCES crawl_runs(id) ON DELETE CASCADE,
    url             TEXT NOT NULL,
    discovered_from TEXT,
    visited         INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (run_id, url)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
