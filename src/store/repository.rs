//! Store implementation over a resilient connection
//!
//! Every write here is either an upsert or an update guarded by a predicate,
//! so replaying a statement after a reconnect converges to the same rows.

use crate::config::StoreConfig;
use crate::store::connection::{ConnectionParams, Connector, QueryResult, Row};
use crate::store::resilient::{ResilientConnection, RetryPolicy};
use crate::store::schema::initialize_schema;
use crate::store::traits::{CrawlStore, StoreError, StoreResult};
use crate::store::{
    item_id, CrawlMode, CrawlRunRecord, ItemCounts, ItemRecord, ItemUpsert, RunKind, RunStats,
    RunStatus, RunSummary,
};
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

const ITEM_COLUMNS: &str = "id, registry_id, slug, name, url, content_hash, content_size, \
                            metadata, first_seen, last_seen, deleted";

const RUN_COLUMNS: &str = "id, registry_id, mode, started_at, finished_at, duration_s, \
                           discovered, downloaded, skipped, failed, changed, status, error, kind";

/// Crawl datastore
pub struct Store {
    conn: ResilientConnection,
}

impl Store {
    /// Opens the store at `params.url` and applies the schema
    pub fn open(params: ConnectionParams, policy: RetryPolicy) -> StoreResult<Self> {
        Self::with_connection(ResilientConnection::open_sqlite(params, policy)?)
    }

    /// Opens the store through a custom connector
    pub fn open_with(
        connector: impl Connector + 'static,
        params: ConnectionParams,
        policy: RetryPolicy,
    ) -> StoreResult<Self> {
        Self::with_connection(ResilientConnection::connect(connector, params, policy)?)
    }

    /// Opens the store described by the `[store]` configuration section
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        Self::open(
            ConnectionParams::new(config.url.as_str(), config.auth_token.as_str()),
            RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.base_delay_ms),
            ),
        )
    }

    /// Creates an in-memory store
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(ConnectionParams::new(":memory:", ""), RetryPolicy::default())
    }

    /// Wraps an existing connection and applies the schema
    pub fn with_connection(mut conn: ResilientConnection) -> StoreResult<Self> {
        initialize_schema(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &ResilientConnection {
        &self.conn
    }

    /// Closes the connection, discarding uncommitted writes
    pub fn close(&mut self) -> StoreResult<()> {
        self.conn.close()
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> StoreResult<QueryResult> {
        self.conn.execute(sql, params)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn opt_text(s: Option<&str>) -> Value {
    s.map(text).unwrap_or(Value::Null)
}

fn int(n: u64) -> Value {
    Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

fn count(row: &Row, idx: usize) -> StoreResult<u64> {
    let value = row.integer(idx)?.unwrap_or(0);
    u64::try_from(value)
        .map_err(|_| StoreError::Decode(format!("column {} is negative: {}", idx, value)))
}

fn metadata_json(metadata: Option<&Map<String, JsonValue>>) -> StoreResult<Value> {
    match metadata {
        Some(map) => Ok(Value::Text(serde_json::to_string(map)?)),
        None => Ok(Value::Null),
    }
}

fn item_from_row(row: &Row) -> StoreResult<ItemRecord> {
    let metadata = match row.text(7)? {
        Some(raw) => Some(serde_json::from_str::<Map<String, JsonValue>>(&raw)?),
        None => None,
    };

    Ok(ItemRecord {
        id: row.required_text(0)?,
        registry_id: row.required_text(1)?,
        slug: row.required_text(2)?,
        name: row.text(3)?,
        url: row.text(4)?,
        content_hash: row.text(5)?,
        content_size: count(row, 6)?,
        metadata,
        first_seen: row.required_text(8)?,
        last_seen: row.required_text(9)?,
        deleted: row.integer(10)?.unwrap_or(0) != 0,
    })
}

fn run_from_row(row: &Row) -> StoreResult<CrawlRunRecord> {
    let raw_id = row.required_text(0)?;
    let id = Uuid::parse_str(&raw_id)
        .map_err(|e| StoreError::Decode(format!("invalid run id '{}': {}", raw_id, e)))?;

    let raw_mode = row.required_text(2)?;
    let mode = CrawlMode::from_db_string(&raw_mode)
        .ok_or_else(|| StoreError::Decode(format!("invalid run mode '{}'", raw_mode)))?;

    let raw_kind = row.required_text(13)?;
    let kind = RunKind::from_db_string(&raw_kind)
        .ok_or_else(|| StoreError::Decode(format!("invalid run kind '{}'", raw_kind)))?;

    let raw_status = row.required_text(11)?;
    let status = RunStatus::from_db_string(&raw_status)
        .ok_or_else(|| StoreError::Decode(format!("invalid run status '{}'", raw_status)))?;

    Ok(CrawlRunRecord {
        id,
        registry_id: row.required_text(1)?,
        mode,
        kind,
        started_at: row.required_text(3)?,
        finished_at: row.text(4)?,
        duration_s: row.real(5)?,
        stats: RunStats {
            discovered: count(row, 6)?,
            downloaded: count(row, 7)?,
            skipped: count(row, 8)?,
            failed: count(row, 9)?,
            changed: count(row, 10)?,
        },
        status,
        error: row.text(12)?,
    })
}

impl CrawlStore for Store {
    // ===== Items =====

    fn upsert_item(&mut self, item: &ItemUpsert) -> StoreResult<String> {
        let id = item_id(&item.registry_id, &item.slug);
        let seen = now();

        // Metadata objects are merged key by key; every other column keeps
        // its stored value when the new one is NULL.
        self.query(
            "INSERT INTO items (id, registry_id, slug, name, url, content_hash, content_size,
                                metadata, first_seen, last_seen, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, 0), ?8, ?9, ?9, 0)
             ON CONFLICT(id) DO UPDATE SET
                name = COALESCE(excluded.name, items.name),
                url = COALESCE(excluded.url, items.url),
                content_hash = COALESCE(excluded.content_hash, items.content_hash),
                content_size = COALESCE(?7, items.content_size),
                metadata = CASE
                    WHEN excluded.metadata IS NULL THEN items.metadata
                    WHEN items.metadata IS NULL THEN excluded.metadata
                    ELSE json_patch(items.metadata, excluded.metadata)
                END,
                last_seen = excluded.last_seen,
                deleted = 0",
            &[
                text(&id),
                text(&item.registry_id),
                text(&item.slug),
                opt_text(item.name.as_deref()),
                opt_text(item.url.as_deref()),
                opt_text(item.content_hash.as_deref()),
                item.content_size.map(int).unwrap_or(Value::Null),
                metadata_json(item.metadata.as_ref())?,
                text(&seen),
            ],
        )?;

        Ok(id)
    }

    fn get_item(&mut self, registry_id: &str, slug: &str) -> StoreResult<Option<ItemRecord>> {
        let sql = format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS);
        let result = self.query(&sql, &[text(&item_id(registry_id, slug))])?;
        result.first().map(item_from_row).transpose()
    }

    fn get_fingerprint(&mut self, registry_id: &str, slug: &str) -> StoreResult<Option<String>> {
        let result = self.query(
            "SELECT content_hash FROM items WHERE id = ?1",
            &[text(&item_id(registry_id, slug))],
        )?;
        match result.first() {
            Some(row) => row.text(0),
            None => Ok(None),
        }
    }

    fn mark_item_deleted(&mut self, registry_id: &str, slug: &str) -> StoreResult<()> {
        self.query(
            "UPDATE items SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            &[text(&item_id(registry_id, slug))],
        )?;
        Ok(())
    }

    fn mark_missing_deleted(
        &mut self,
        registry_id: &str,
        seen: &HashSet<String>,
    ) -> StoreResult<usize> {
        let active = self.query(
            "SELECT slug FROM items WHERE registry_id = ?1 AND deleted = 0",
            &[text(registry_id)],
        )?;

        let mut missing = Vec::new();
        for row in &active.rows {
            let slug = row.required_text(0)?;
            if !seen.contains(&slug) {
                missing.push(slug);
            }
        }

        let mut flagged = 0;
        for slug in &missing {
            let result = self.query(
                "UPDATE items SET deleted = 1 WHERE id = ?1 AND deleted = 0",
                &[text(&item_id(registry_id, slug))],
            )?;
            flagged += result.rows_affected;
        }

        Ok(flagged)
    }

    fn items_by_registry(
        &mut self,
        registry_id: &str,
        include_deleted: bool,
    ) -> StoreResult<Vec<ItemRecord>> {
        let filter = if include_deleted {
            ""
        } else {
            " AND deleted = 0"
        };
        let sql = format!(
            "SELECT {} FROM items WHERE registry_id = ?1{} ORDER BY slug",
            ITEM_COLUMNS, filter
        );

        let result = self.query(&sql, &[text(registry_id)])?;
        result.rows.iter().map(item_from_row).collect()
    }

    fn pending_items(&mut self, registry_id: &str) -> StoreResult<Vec<ItemRecord>> {
        let sql = format!(
            "SELECT {} FROM items
             WHERE registry_id = ?1 AND deleted = 0 AND content_hash IS NULL
             ORDER BY slug",
            ITEM_COLUMNS
        );

        let result = self.query(&sql, &[text(registry_id)])?;
        result.rows.iter().map(item_from_row).collect()
    }

    fn count_items(&mut self, registry_id: &str) -> StoreResult<ItemCounts> {
        let result = self.query(
            "SELECT
                COALESCE(SUM(CASE WHEN deleted = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN deleted = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN deleted = 0 AND content_hash IS NULL THEN 1 ELSE 0 END), 0)
             FROM items WHERE registry_id = ?1",
            &[text(registry_id)],
        )?;

        match result.first() {
            Some(row) => Ok(ItemCounts {
                active: count(row, 0)?,
                deleted: count(row, 1)?,
                pending: count(row, 2)?,
            }),
            None => Ok(ItemCounts::default()),
        }
    }

    // ===== Crawl State =====

    fn get_state(&mut self, registry_id: &str, key: &str) -> StoreResult<Option<String>> {
        let result = self.query(
            "SELECT value FROM crawl_state WHERE registry_id = ?1 AND key = ?2",
            &[text(registry_id), text(key)],
        )?;
        match result.first() {
            Some(row) => row.text(0),
            None => Ok(None),
        }
    }

    fn set_state(&mut self, registry_id: &str, key: &str, value: &str) -> StoreResult<()> {
        self.query(
            "INSERT INTO crawl_state (registry_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(registry_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            &[text(registry_id), text(key), text(value), text(&now())],
        )?;
        Ok(())
    }

    // ===== Crawl Runs =====

    fn begin_run(
        &mut self,
        registry_id: &str,
        mode: CrawlMode,
        kind: RunKind,
    ) -> StoreResult<Uuid> {
        let run_id = Uuid::new_v4();
        self.query(
            "INSERT INTO crawl_runs (id, registry_id, mode, kind, started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            &[
                text(&run_id.to_string()),
                text(registry_id),
                text(mode.to_db_string()),
                text(kind.to_db_string()),
                text(&now()),
                text(RunStatus::Running.to_db_string()),
            ],
        )?;
        Ok(run_id)
    }

    fn finish_run(&mut self, run_id: Uuid, summary: &RunSummary) -> StoreResult<()> {
        let stats = &summary.stats;
        let result = self.query(
            "UPDATE crawl_runs SET
                finished_at = ?1,
                duration_s = ?2,
                discovered = ?3,
                downloaded = ?4,
                skipped = ?5,
                failed = ?6,
                changed = ?7,
                status = ?8,
                error = ?9
             WHERE id = ?10 AND status = 'running'",
            &[
                text(&now()),
                Value::Real(summary.duration.as_secs_f64()),
                int(stats.discovered),
                int(stats.downloaded),
                int(stats.skipped),
                int(stats.failed),
                int(stats.changed),
                text(summary.status.to_db_string()),
                opt_text(summary.error.as_deref()),
                text(&run_id.to_string()),
            ],
        )?;

        if result.rows_affected == 0 {
            // Either unknown, or already finished by an earlier attempt
            let existing = self.query(
                "SELECT status FROM crawl_runs WHERE id = ?1",
                &[text(&run_id.to_string())],
            )?;
            if existing.rows.is_empty() {
                return Err(StoreError::RunNotFound(run_id));
            }
        }

        Ok(())
    }

    fn get_run(&mut self, run_id: Uuid) -> StoreResult<CrawlRunRecord> {
        let sql = format!("SELECT {} FROM crawl_runs WHERE id = ?1", RUN_COLUMNS);
        let result = self.query(&sql, &[text(&run_id.to_string())])?;
        match result.first() {
            Some(row) => run_from_row(row),
            None => Err(StoreError::RunNotFound(run_id)),
        }
    }

    fn recent_runs(
        &mut self,
        registry_id: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<CrawlRunRecord>> {
        let limit = int(limit as u64);
        let result = match registry_id {
            Some(registry_id) => {
                let sql = format!(
                    "SELECT {} FROM crawl_runs WHERE registry_id = ?1
                     ORDER BY started_at DESC, rowid DESC LIMIT ?2",
                    RUN_COLUMNS
                );
                self.query(&sql, &[text(registry_id), limit])?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM crawl_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
                    RUN_COLUMNS
                );
                self.query(&sql, &[limit])?
            }
        };

        result.rows.iter().map(run_from_row).collect()
    }

    // ===== Transactions =====

    fn commit(&mut self) -> StoreResult<()> {
        self.conn.commit()
    }
}
