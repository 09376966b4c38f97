//! Raw datastore handles
//!
//! A [`StoreHandle`] is a plain transactional handle: it runs one statement,
//! commits, closes. A [`Connector`] opens fresh handles from fixed
//! [`ConnectionParams`], which is what lets the resilient layer replace a
//! broken handle without the caller noticing.

use crate::store::traits::{StoreError, StoreResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::time::Duration;

/// Parameters a connector opens every handle with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub url: String,
    pub auth_token: String,
}

impl ConnectionParams {
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: auth_token.into(),
        }
    }
}

/// One result row, as raw SQL values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Gets a column value by index
    pub fn value(&self, idx: usize) -> StoreResult<&Value> {
        self.0
            .get(idx)
            .ok_or_else(|| StoreError::Decode(format!("column {} out of range", idx)))
    }

    /// Gets a nullable TEXT column
    pub fn text(&self, idx: usize) -> StoreResult<Option<String>> {
        match self.value(idx)? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.clone())),
            other => Err(StoreError::Decode(format!(
                "column {} is not text: {:?}",
                idx, other
            ))),
        }
    }

    /// Gets a TEXT column that must not be NULL
    pub fn required_text(&self, idx: usize) -> StoreResult<String> {
        self.text(idx)?
            .ok_or_else(|| StoreError::Decode(format!("column {} is NULL", idx)))
    }

    /// Gets a nullable INTEGER column
    pub fn integer(&self, idx: usize) -> StoreResult<Option<i64>> {
        match self.value(idx)? {
            Value::Null => Ok(None),
            Value::Integer(i) => Ok(Some(*i)),
            other => Err(StoreError::Decode(format!(
                "column {} is not an integer: {:?}",
                idx, other
            ))),
        }
    }

    /// Gets a nullable REAL column (integers are widened)
    pub fn real(&self, idx: usize) -> StoreResult<Option<f64>> {
        match self.value(idx)? {
            Value::Null => Ok(None),
            Value::Real(f) => Ok(Some(*f)),
            Value::Integer(i) => Ok(Some(*i as f64)),
            other => Err(StoreError::Decode(format!(
                "column {} is not a number: {:?}",
                idx, other
            ))),
        }
    }
}

/// Outcome of executing one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub rows_affected: usize,
    pub last_insert_id: Option<i64>,
}

impl QueryResult {
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

/// A transactional datastore handle
pub trait StoreHandle: Send {
    /// Runs one statement with positional parameters
    fn execute(&mut self, sql: &str, params: &[Value]) -> StoreResult<QueryResult>;

    /// Commits the open transaction, if any
    fn commit(&mut self) -> StoreResult<()>;

    /// Closes the handle, discarding uncommitted work
    fn close(&mut self) -> StoreResult<()>;
}

/// Opens store handles
pub trait Connector: Send + Sync {
    fn connect(&self, params: &ConnectionParams) -> StoreResult<Box<dyn StoreHandle>>;
}

/// Connector for local SQLite databases
///
/// Accepts plain paths, `file:` URIs and `:memory:`. Note that an in-memory
/// database does not survive a reconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

const REMOTE_SCHEMES: &[&str] = &["libsql://", "http://", "https://", "ws://", "wss://"];

impl Connector for SqliteConnector {
    fn connect(&self, params: &ConnectionParams) -> StoreResult<Box<dyn StoreHandle>> {
        if REMOTE_SCHEMES.iter().any(|s| params.url.starts_with(s)) {
            return Err(StoreError::UnsupportedUrl(params.url.clone()));
        }

        let conn = if params.url == ":memory:" {
            Connection::open_in_memory()?
        } else {
            let conn = Connection::open(&params.url)?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
            ",
            )?;
            conn
        };
        conn.busy_timeout(Duration::from_secs(5))?;

        Ok(Box::new(SqliteHandle { conn: Some(conn) }))
    }
}

/// SQLite handle with implicit transactions
///
/// The first writing statement after a commit opens a transaction; reads run
/// in autocommit mode.
pub struct SqliteHandle {
    conn: Option<Connection>,
}

impl SqliteHandle {
    fn conn(&self) -> StoreResult<&Connection> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }
}

impl StoreHandle for SqliteHandle {
    fn execute(&mut self, sql: &str, params: &[Value]) -> StoreResult<QueryResult> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;

        if !stmt.readonly() && conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }

        let width = stmt.column_count();
        if width == 0 {
            let rows_affected = stmt.execute(params_from_iter(params.iter()))?;
            return Ok(QueryResult {
                rows: Vec::new(),
                rows_affected,
                last_insert_id: Some(conn.last_insert_rowid()),
            });
        }

        let mut out = Vec::new();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(row.get::<_, Value>(idx)?);
            }
            out.push(Row::new(values));
        }

        Ok(QueryResult {
            rows: out,
            rows_affected: 0,
            last_insert_id: None,
        })
    }

    fn commit(&mut self) -> StoreResult<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn close(&mut self) -> StoreResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}
