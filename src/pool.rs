//! Bounded connection pool with wait-and-timeout acquisition.
//!
//! A thin coordination layer: a semaphore bounds the number of live sessions,
//! an idle list holds sessions between borrows, and a guard type makes
//! release structural. The actual sessions come from an injected
//! [`Connect`] factory; the pool opens no sockets itself.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::DbConfig;
use crate::connection::{Connect, Connection};
use crate::error::{PoolkitError, Result};
use crate::value::{Row, SqlValue};

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection checked out from the pool.
///
/// Dropping the guard returns the connection to the pool on every exit path,
/// including cancellation of the borrowing task. Broken connections and
/// explicitly discarded ones are closed instead of returned, so stale
/// transactional state never leaks to the next borrower.
pub struct PooledConnection<F: Connect> {
    /// The actual connection (None once discarded or returned)
    conn: Option<F::Conn>,
    /// Set while a transaction is open on this connection; cleared only after
    /// a successful COMMIT or ROLLBACK. A guard dropped with this set holds
    /// an open transaction, so it is discarded instead of returned.
    in_transaction: bool,
    /// Reference back to the pool
    pool: Arc<PoolInner<F>>,
    /// Semaphore permit (controls pool size)
    _permit: OwnedSemaphorePermit,
}

impl<F: Connect> PooledConnection<F> {
    /// Run a parameterized statement, returning all rows.
    pub async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.conn_mut()?.query(sql, params).await
    }

    /// Run a mutating statement, returning the affected row count.
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.conn_mut()?.execute(sql, params).await
    }

    /// Run an unparameterized statement, discarding results.
    pub async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        self.conn_mut()?.batch_execute(sql).await
    }

    /// Whether the underlying session is still usable.
    pub fn is_healthy(&self) -> bool {
        self.conn.as_ref().map(|c| !c.is_broken()).unwrap_or(false)
    }

    /// Drop the underlying session instead of returning it to the pool.
    ///
    /// Use after an error that leaves the session in an unknown state. The
    /// permit is still released on drop, so pool capacity is unaffected.
    pub fn discard(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn);
        }
    }

    /// Record whether a transaction is open on this connection. While set,
    /// dropping the guard discards the connection rather than returning it.
    pub(crate) fn set_in_transaction(&mut self, open: bool) {
        self.in_transaction = open;
    }

    fn conn_mut(&mut self) -> Result<&mut F::Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| PoolkitError::Connection("connection already discarded".into()))
    }
}

impl<F: Connect> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("discarded", &self.conn.is_none())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl<F: Connect> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Only healthy connections outside a transaction go back; a guard
            // dropped mid-transaction (e.g. the borrowing task was cancelled)
            // would leak the open transaction to the next borrower. After
            // close() the pool no longer accepts returns.
            if !conn.is_broken()
                && !self.in_transaction
                && !self.pool.closed.load(Ordering::Acquire)
            {
                self.pool.idle.lock().push(conn);
            }
        }
    }
}

// ============================================================================
// Pool Inner
// ============================================================================

struct PoolInner<F: Connect> {
    /// Pool configuration (validated)
    config: DbConfig,
    /// Factory for new sessions
    connector: F,
    /// Idle connections waiting to be used
    idle: Mutex<Vec<F::Conn>>,
    /// Semaphore to limit total connections
    semaphore: Arc<Semaphore>,
    /// Set once by close(); rejects new acquires and returns
    closed: AtomicBool,
}

/// A point-in-time snapshot of pool occupancy, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently idle in the pool
    pub idle: usize,
    /// Connections currently checked out
    pub in_use: usize,
    /// Configured maximum
    pub max: u32,
}

// ============================================================================
// Connection Pool
// ============================================================================

/// A bounded pool of database sessions.
///
/// Cheap to clone; all clones share the same connections.
pub struct Pool<F: Connect> {
    inner: Arc<PoolInner<F>>,
}

impl<F: Connect> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Connect> Pool<F> {
    /// Create a pool, validating the configuration and eagerly opening
    /// `min_connections` sessions.
    pub async fn connect(config: DbConfig, connector: F) -> Result<Self> {
        let config = config.validate()?;
        debug!(config = ?config, "opening connection pool");

        let inner = Arc::new(PoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_connections as usize)),
            config,
            connector,
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let pool = Self { inner };

        for _ in 0..pool.inner.config.min_connections {
            let conn = pool.inner.connector.connect().await?;
            pool.inner.idle.lock().push(conn);
        }

        Ok(pool)
    }

    /// Get a connection from the pool.
    ///
    /// With an `acquire_timeout` configured, an exhausted pool is waited on
    /// up to that bound; a connection returned in the meantime is picked up
    /// immediately. Without one, exhaustion fails fast. Either way the
    /// failure is [`PoolkitError::PoolExhausted`], never an indefinite block.
    pub async fn acquire(&self) -> Result<PooledConnection<F>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolkitError::PoolClosed);
        }

        let permit = self.acquire_permit().await?;

        // The pool may have closed while the permit was being handed over;
        // the idle list is already drained at that point, so a connection
        // issued here would be fresh and never reclaimed.
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolkitError::PoolClosed);
        }

        // Prefer an idle connection; skip over any that broke while idle.
        let conn = loop {
            let candidate = self.inner.idle.lock().pop();
            match candidate {
                Some(c) if !c.is_broken() => break Some(c),
                Some(mut stale) => {
                    stale.close().await;
                }
                None => break None,
            }
        };

        let conn = match conn {
            Some(c) => c,
            None => self.inner.connector.connect().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            in_transaction: false,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        let semaphore = Arc::clone(&self.inner.semaphore);
        match self.inner.config.acquire_timeout {
            Some(bound) => tokio::time::timeout(bound, semaphore.acquire_owned())
                .await
                .map_err(|_| PoolkitError::PoolExhausted { waited: bound })?
                .map_err(|_| PoolkitError::PoolClosed),
            None => match semaphore.try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(tokio::sync::TryAcquireError::NoPermits) => Err(PoolkitError::PoolExhausted {
                    waited: Duration::ZERO,
                }),
                Err(tokio::sync::TryAcquireError::Closed) => Err(PoolkitError::PoolClosed),
            },
        }
    }

    /// Close the pool: reject new acquires, wake waiters with
    /// [`PoolkitError::PoolClosed`], and close all idle connections.
    /// Connections still checked out are closed when their guards drop.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.semaphore.close();

        let connections = {
            let mut idle = self.inner.idle.lock();
            std::mem::take(&mut *idle)
        };
        debug!(idle = connections.len(), "closing connection pool");
        for mut conn in connections {
            conn.close().await;
        }
    }

    /// Number of idle connections currently in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Occupancy snapshot.
    pub fn status(&self) -> PoolStatus {
        let max = self.inner.config.max_connections;
        let available = self.inner.semaphore.available_permits();
        PoolStatus {
            idle: self.idle_count(),
            in_use: max as usize - available,
            max,
        }
    }

    /// The validated pool configuration.
    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockConnector, Scripted};

    fn test_config() -> DbConfig {
        DbConfig::new("testdb").min_connections(1).max_connections(2)
    }

    #[tokio::test]
    async fn test_min_connections_opened_eagerly() {
        let connector = MockConnector::new();
        let state = connector.state();
        let pool = Pool::connect(test_config().min_connections(2), connector)
            .await
            .unwrap();

        assert_eq!(state.lock().connects, 2);
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn test_acquire_and_release_restores_idle_count() {
        let pool = Pool::connect(test_config(), MockConnector::new())
            .await
            .unwrap();
        assert_eq!(pool.idle_count(), 1);

        let guard = pool.acquire().await.unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.status().in_use, 1);

        drop(guard);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_times_out_instead_of_deadlocking() {
        let config = DbConfig::new("testdb")
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(200));
        let pool = Pool::connect(config, MockConnector::new()).await.unwrap();

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            PoolkitError::PoolExhausted { waited } if waited == Duration::from_millis(200)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_proceeds_when_connection_is_returned() {
        let config = DbConfig::new("testdb")
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5));
        let pool = Pool::connect(config, MockConnector::new()).await.unwrap();

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_exhaustion_fails_fast_without_timeout() {
        let config = DbConfig::new("testdb").max_connections(1);
        let pool = Pool::connect(config, MockConnector::new()).await.unwrap();

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            PoolkitError::PoolExhausted { waited } if waited == Duration::ZERO
        ));
    }

    #[tokio::test]
    async fn test_broken_connection_is_discarded_not_pooled() {
        let connector = MockConnector::new();
        let state = connector.state();
        state
            .lock()
            .script("select 1", Scripted::Break("connection reset".into()));
        let pool = Pool::connect(test_config(), connector).await.unwrap();

        let mut guard = pool.acquire().await.unwrap();
        let err = guard.query("select 1", &[]).await.unwrap_err();
        assert!(matches!(err, PoolkitError::Connection(_)));
        assert!(!guard.is_healthy());
        drop(guard);

        // The broken session never re-enters the idle list; the next acquire
        // opens a fresh one.
        assert_eq!(pool.idle_count(), 0);
        let connects_before = state.lock().connects;
        let _fresh = pool.acquire().await.unwrap();
        assert_eq!(state.lock().connects, connects_before + 1);
    }

    #[tokio::test]
    async fn test_explicit_discard_frees_capacity() {
        let config = DbConfig::new("testdb").max_connections(1);
        let pool = Pool::connect(config, MockConnector::new()).await.unwrap();

        let mut guard = pool.acquire().await.unwrap();
        guard.discard();
        assert!(guard.query("select 1", &[]).await.is_err());
        drop(guard);

        assert_eq!(pool.idle_count(), 0);
        // Capacity was released even though the connection was not returned.
        pool.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_guard_dropped_mid_transaction_is_discarded() {
        let pool = Pool::connect(test_config(), MockConnector::new())
            .await
            .unwrap();

        let mut guard = pool.acquire().await.unwrap();
        guard.set_in_transaction(true);
        drop(guard);

        // An open transaction on a returned connection would leak state to
        // the next borrower, so the connection is dropped instead.
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_acquire_does_not_leak_capacity() {
        let config = DbConfig::new("testdb").max_connections(1);
        let pool = Pool::connect(config, MockConnector::new()).await.unwrap();

        {
            let fut = pool.acquire();
            // Dropped before completion, as on caller cancellation.
            drop(fut);
        }
        pool.acquire().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_rejects_acquires_and_wakes_waiters() {
        let config = DbConfig::new("testdb")
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(60));
        let pool = Pool::connect(config, MockConnector::new()).await.unwrap();

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.close().await;
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, PoolkitError::PoolClosed));

        assert!(matches!(
            pool.acquire().await.unwrap_err(),
            PoolkitError::PoolClosed
        ));

        // Held connection is closed on return, not pooled.
        drop(held);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_after_permit_handoff_does_not_issue_connections() {
        let config = DbConfig::new("testdb")
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(60));
        let pool = Pool::connect(config, MockConnector::new()).await.unwrap();

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The returned permit is handed to the waiter, but the pool closes
        // before the waiter runs again; it must not receive a connection.
        drop(held);
        pool.close().await;

        assert!(matches!(
            waiter.await.unwrap().unwrap_err(),
            PoolkitError::PoolClosed
        ));
        assert_eq!(pool.idle_count(), 0);
    }
}
