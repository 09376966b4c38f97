//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the observatory database.

use crate::store::resilient::ResilientConnection;
use crate::store::traits::StoreResult;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Discovered items, one row per (registry, slug)
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    registry_id TEXT NOT NULL,
    slug TEXT NOT NULL,
    name TEXT,
    url TEXT,
    content_hash TEXT,
    content_size INTEGER NOT NULL DEFAULT 0,
    metadata TEXT,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    UNIQUE(registry_id, slug)
);

CREATE INDEX IF NOT EXISTS idx_items_registry ON items(registry_id, deleted);

-- Incremental sync watermarks
CREATE TABLE IF NOT EXISTS crawl_state (
    registry_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (registry_id, key)
);

-- One row per crawl execution
CREATE TABLE IF NOT EXISTS crawl_runs (
    id TEXT PRIMARY KEY,
    registry_id TEXT NOT NULL,
    mode TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    duration_s REAL,
    discovered INTEGER NOT NULL DEFAULT 0,
    downloaded INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    changed INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error TEXT,
    kind TEXT NOT NULL DEFAULT 'crawl'
);

CREATE INDEX IF NOT EXISTS idx_crawl_runs_registry ON crawl_runs(registry_id, started_at);
"#;

/// Applies the schema statement by statement and commits
///
/// Every statement is `IF NOT EXISTS`, so this is safe to replay.
pub fn initialize_schema(conn: &mut ResilientConnection) -> StoreResult<()> {
    for statement in schema_statements() {
        conn.execute(statement, &[])?;
    }
    conn.commit()
}

fn schema_statements() -> impl Iterator<Item = &'static str> {
    SCHEMA_SQL
        .split(';')
        .map(strip_comments)
        .filter(|s| !s.is_empty())
}

fn strip_comments(statement: &str) -> &str {
    let trimmed = statement.trim();
    let mut rest = trimmed;
    while rest.starts_with("--") {
        rest = match rest.find('\n') {
            Some(pos) => rest[pos + 1..].trim_start(),
            None => "",
        };
    }
    rest
}
