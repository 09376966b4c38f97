//! Reconnecting store connection
//!
//! [`ResilientConnection`] behaves like a plain [`StoreHandle`] but survives
//! transient transport failures: the broken handle is dropped, a fresh one is
//! opened with the original parameters and the operation is replayed, with
//! exponential backoff between attempts. Anything sent through it must be
//! idempotent, because a statement may run again after a failure whose
//! effects were in fact applied.
//!
//! Dropping a handle rolls back its open transaction, so every write since
//! the last commit is kept in a journal and replayed on the fresh handle
//! before the failed operation is retried.

use crate::store::connection::{
    ConnectionParams, Connector, QueryResult, SqliteConnector, StoreHandle,
};
use crate::store::traits::{StoreError, StoreResult};
use rusqlite::types::Value;
use std::time::Duration;

/// Retry bounds for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per operation, the first one included
    pub max_attempts: u32,

    /// Wait before the first retry; doubles for each further retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after the given failed attempt (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Store handle that reconnects and retries on transient errors
pub struct ResilientConnection {
    connector: Box<dyn Connector>,
    params: ConnectionParams,
    policy: RetryPolicy,
    handle: Option<Box<dyn StoreHandle>>,
    closed: bool,
    reconnects: u64,
    /// Writes since the last commit
    journal: Vec<(String, Vec<Value>)>,
    /// Set when a handle was discarded with writes in flight
    replay_pending: bool,
}

impl ResilientConnection {
    /// Opens the first handle
    ///
    /// The initial connect is not retried: a store that cannot be reached at
    /// startup is a configuration problem.
    pub fn connect(
        connector: impl Connector + 'static,
        params: ConnectionParams,
        policy: RetryPolicy,
    ) -> StoreResult<Self> {
        let handle = connector.connect(&params)?;
        Ok(Self {
            connector: Box::new(connector),
            params,
            policy,
            handle: Some(handle),
            closed: false,
            reconnects: 0,
            journal: Vec::new(),
            replay_pending: false,
        })
    }

    /// Opens a local SQLite database
    pub fn open_sqlite(params: ConnectionParams, policy: RetryPolicy) -> StoreResult<Self> {
        Self::connect(SqliteConnector, params, policy)
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Number of times a broken handle was replaced
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of writes that the next commit will make durable
    pub fn uncommitted_writes(&self) -> usize {
        self.journal.len()
    }

    /// Runs one statement, retrying transient failures
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> StoreResult<QueryResult> {
        let result = self.with_retry("execute", |handle| handle.execute(sql, params))?;
        if !is_read_only(sql) {
            self.journal.push((sql.to_string(), params.to_vec()));
        }
        Ok(result)
    }

    /// Commits the open transaction, retrying transient failures
    pub fn commit(&mut self) -> StoreResult<()> {
        self.with_retry("commit", |handle| handle.commit())?;
        self.journal.clear();
        Ok(())
    }

    /// Closes the underlying handle; later calls fail with [`StoreError::Closed`]
    pub fn close(&mut self) -> StoreResult<()> {
        self.closed = true;
        self.journal.clear();
        self.replay_pending = false;
        match self.handle.take() {
            Some(mut handle) => handle.close(),
            None => Ok(()),
        }
    }

    fn with_retry<T, F>(&mut self, op: &str, mut f: F) -> StoreResult<T>
    where
        F: FnMut(&mut dyn StoreHandle) -> StoreResult<T>,
    {
        if self.closed {
            return Err(StoreError::Closed);
        }

        let mut attempt: u32 = 0;
        loop {
            let outcome = match self.ready_handle() {
                Ok(()) => match self.handle.as_deref_mut() {
                    Some(handle) => f(handle),
                    None => Err(StoreError::Closed),
                },
                Err(error) => Err(error),
            };
            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            attempt += 1;
            if !error.is_transient() || attempt >= self.policy.max_attempts {
                return Err(error);
            }

            let wait = self.policy.backoff(attempt - 1);
            tracing::warn!(
                "Store {} failed (attempt {}/{}): {}; reconnecting in {:?}",
                op,
                attempt,
                self.policy.max_attempts,
                error,
                wait
            );
            std::thread::sleep(wait);
            self.discard_handle();
        }
    }

    /// Makes sure a live handle holds every journaled write
    ///
    /// Opens a new handle after a discard and replays the journal on it.
    fn ready_handle(&mut self) -> StoreResult<()> {
        if self.handle.is_none() {
            tracing::info!("Reconnecting to store ({})", self.params.url);
            let handle = self.connector.connect(&self.params)?;
            self.handle = Some(handle);
            self.reconnects += 1;
        }

        if self.replay_pending {
            let handle = self.handle.as_deref_mut().ok_or(StoreError::Closed)?;
            for (sql, params) in &self.journal {
                handle.execute(sql, params)?;
            }
            tracing::info!(
                "Replayed {} uncommitted writes on the new store handle",
                self.journal.len()
            );
            self.replay_pending = false;
        }

        Ok(())
    }

    fn discard_handle(&mut self) {
        self.replay_pending = !self.journal.is_empty();
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.close() {
                tracing::debug!("Ignoring close error on broken handle: {}", e);
            }
        }
    }
}

/// Statements that cannot change rows and need no replay
fn is_read_only(sql: &str) -> bool {
    let head = sql.trim_start();
    head.get(..6)
        .map(|word| word.eq_ignore_ascii_case("select"))
        .unwrap_or(false)
}
