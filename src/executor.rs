//! Query execution through pooled connections.
//!
//! [`Executor`] mediates every statement through one borrowed connection:
//! acquire, run, release, with the release guaranteed by the pool guard on
//! every exit path. [`TransactionScope`] is the same surface bound to one
//! open transaction; commit and rollback happen exactly once per outermost
//! scope regardless of nesting.

use std::time::Instant;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::connection::Connect;
use crate::error::{PoolkitError, Result};
use crate::pool::{Pool, PooledConnection};
use crate::value::{Row, SqlValue, Statement};
use crate::values::{render_placeholders, split_values_marker, uniform_width, VALUES_PAGE_SIZE};

// ============================================================================
// Executor
// ============================================================================

/// Pooled, transaction-aware statement executor.
///
/// Holds a [`Pool`] handle injected at construction; cheap to clone, and
/// independently configured executors can coexist. No statement ever holds a
/// connection beyond its own call: results are materialized before release.
pub struct Executor<F: Connect> {
    pool: Pool<F>,
}

impl<F: Connect> Clone for Executor<F> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<F: Connect> Executor<F> {
    pub fn new(pool: Pool<F>) -> Self {
        Self { pool }
    }

    /// The pool this executor borrows from.
    pub fn pool(&self) -> &Pool<F> {
        &self.pool
    }

    /// Run a statement and return at most one row.
    pub async fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        let mut conn = self.pool.acquire().await?;
        let started = Instant::now();
        let result = conn.query(sql, params).await;
        log_statement("query_one", sql, params.len(), started, &result);
        Ok(result?.into_iter().next())
    }

    /// Run a statement and return all rows, fully materialized before the
    /// connection is released.
    pub async fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut conn = self.pool.acquire().await?;
        let started = Instant::now();
        let result = conn.query(sql, params).await;
        log_statement("query_all", sql, params.len(), started, &result);
        result
    }

    /// Run a mutating statement and return the affected row count.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let started = Instant::now();
        let result = conn.execute(sql, params).await;
        log_execute(sql, params.len(), started, &result);
        result
    }

    /// Run a prepared [`Statement`] value, returning all rows.
    pub async fn run(&self, statement: &Statement) -> Result<Vec<Row>> {
        self.query_all(&statement.sql, &statement.params).await
    }

    /// Expand the statement's single `$values` marker into placeholder
    /// tuples and run it in pages of at most
    /// [`VALUES_PAGE_SIZE`](crate::values::VALUES_PAGE_SIZE) rows, returning
    /// all fetched rows across pages.
    ///
    /// All pages run in one transaction: a failure on any page rolls back the
    /// pages already sent, never leaving a prefix applied.
    pub async fn execute_values(&self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<Vec<Row>> {
        let mut conn = begin_transaction(&self.pool).await?;
        let outcome = execute_values_on(&mut conn, sql, rows).await;
        finish_transaction(conn, outcome).await
    }

    /// Run `body` inside a transaction on one borrowed connection.
    ///
    /// `BEGIN` precedes the body; `Ok` commits, `Err` rolls back, and the
    /// connection is released in all cases. The body signals failure through
    /// its returned `Result`, never by unwinding. A failed commit or rollback
    /// leaves the session in an unknown state, so it is reported as
    /// [`PoolkitError::Transaction`] and the connection is discarded.
    pub async fn with_transaction<T, Body>(&self, body: Body) -> Result<T>
    where
        T: Send,
        Body: for<'t> FnOnce(&'t mut TransactionScope<F>) -> BoxFuture<'t, Result<T>> + Send,
    {
        let conn = begin_transaction(&self.pool).await?;
        let mut scope = TransactionScope { conn };
        let outcome = body(&mut scope).await;
        finish_transaction(scope.conn, outcome).await
    }
}

// ============================================================================
// Transaction Scope
// ============================================================================

/// Executor handle bound to one open transaction.
///
/// Owns its borrowed connection for the lifetime of the transaction; every
/// statement issued through it commits or rolls back together. Created only
/// by [`Executor::with_transaction`].
pub struct TransactionScope<F: Connect> {
    conn: PooledConnection<F>,
}

impl<F: Connect> TransactionScope<F> {
    /// Run a statement in this transaction and return at most one row.
    pub async fn query_one(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        let started = Instant::now();
        let result = self.conn.query(sql, params).await;
        log_statement("tx.query_one", sql, params.len(), started, &result);
        Ok(result?.into_iter().next())
    }

    /// Run a statement in this transaction and return all rows.
    pub async fn query_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let started = Instant::now();
        let result = self.conn.query(sql, params).await;
        log_statement("tx.query_all", sql, params.len(), started, &result);
        result
    }

    /// Run a mutating statement in this transaction.
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let started = Instant::now();
        let result = self.conn.execute(sql, params).await;
        log_execute(sql, params.len(), started, &result);
        result
    }

    /// Run a prepared [`Statement`] value in this transaction.
    pub async fn run(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        self.query_all(&statement.sql, &statement.params).await
    }

    /// Multi-row VALUES expansion inside this transaction; see
    /// [`Executor::execute_values`].
    pub async fn execute_values(&mut self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<Vec<Row>> {
        execute_values_on(&mut self.conn, sql, rows).await
    }

    /// Nested transaction call: reuses the already-open transaction.
    ///
    /// No second `BEGIN` is issued and no commit happens here; the outermost
    /// [`Executor::with_transaction`] commits or rolls back exactly once. An
    /// `Err` from the nested body propagates outward and rolls back the whole
    /// scope.
    pub async fn with_transaction<T, Body>(&mut self, body: Body) -> Result<T>
    where
        T: Send,
        Body: for<'t> FnOnce(&'t mut TransactionScope<F>) -> BoxFuture<'t, Result<T>> + Send,
    {
        body(self).await
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Acquire a connection and open a transaction on it.
///
/// The guard is flagged as in-transaction before `BEGIN` is sent, so a drop
/// at any point before [`finish_transaction`] clears it (including
/// cancellation of the caller) discards the connection instead of returning
/// it with the transaction still open.
async fn begin_transaction<F: Connect>(pool: &Pool<F>) -> Result<PooledConnection<F>> {
    let mut conn = pool.acquire().await?;
    conn.set_in_transaction(true);
    if let Err(err) = conn.batch_execute("BEGIN").await {
        conn.discard();
        return Err(PoolkitError::Transaction(format!("begin failed: {}", err)));
    }
    Ok(conn)
}

/// Close out a transaction: commit on `Ok`, roll back on `Err`.
///
/// Only a successful COMMIT or ROLLBACK clears the guard's transaction flag
/// and lets it return to the pool; a failed one leaves the session in
/// unknown state, so the connection is discarded and the failure is reported
/// as [`PoolkitError::Transaction`].
async fn finish_transaction<F: Connect, T>(
    mut conn: PooledConnection<F>,
    outcome: Result<T>,
) -> Result<T> {
    match outcome {
        Ok(value) => match conn.batch_execute("COMMIT").await {
            Ok(()) => {
                conn.set_in_transaction(false);
                debug!("transaction committed");
                Ok(value)
            }
            Err(err) => {
                conn.discard();
                Err(PoolkitError::Transaction(format!("commit failed: {}", err)))
            }
        },
        Err(body_err) => match conn.batch_execute("ROLLBACK").await {
            Ok(()) => {
                conn.set_in_transaction(false);
                debug!(error = %body_err, "transaction rolled back");
                Err(body_err)
            }
            Err(rollback_err) => {
                conn.discard();
                warn!(error = %rollback_err, "rollback failed; discarding connection");
                Err(PoolkitError::Transaction(format!(
                    "rollback failed: {} (while handling: {})",
                    rollback_err, body_err
                )))
            }
        },
    }
}

/// VALUES expansion against an already-borrowed connection, shared between
/// the top-level and transaction-scope paths.
async fn execute_values_on<F: Connect>(
    conn: &mut PooledConnection<F>,
    sql: &str,
    rows: &[Vec<SqlValue>],
) -> Result<Vec<Row>> {
    let (pre, post) = split_values_marker(sql)?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let width = uniform_width(rows)?;

    let mut fetched = Vec::new();
    for page in rows.chunks(VALUES_PAGE_SIZE) {
        let page_sql = format!("{}{}{}", pre, render_placeholders(width, page.len()), post);
        let params: Vec<SqlValue> = page.iter().flatten().cloned().collect();

        let started = Instant::now();
        let result = conn.query(&page_sql, &params).await;
        log_statement("execute_values", sql, params.len(), started, &result);
        fetched.extend(result?);
    }
    Ok(fetched)
}

fn log_statement(
    op: &str,
    sql: &str,
    params: usize,
    started: Instant,
    result: &Result<Vec<Row>>,
) {
    match result {
        Ok(rows) => debug!(
            op,
            statement = sql,
            params,
            rows = rows.len(),
            elapsed = ?started.elapsed(),
            "statement executed"
        ),
        Err(err) => warn!(
            op,
            statement = sql,
            params,
            elapsed = ?started.elapsed(),
            error = %err,
            "statement failed"
        ),
    }
}

fn log_execute(sql: &str, params: usize, started: Instant, result: &Result<u64>) {
    match result {
        Ok(affected) => debug!(
            op = "execute",
            statement = sql,
            params,
            affected,
            elapsed = ?started.elapsed(),
            "statement executed"
        ),
        Err(err) => warn!(
            op = "execute",
            statement = sql,
            params,
            elapsed = ?started.elapsed(),
            error = %err,
            "statement failed"
        ),
    }
}
