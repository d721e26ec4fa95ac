//! The driver seam.
//!
//! The pool and executor never talk to PostgreSQL directly; they go through
//! these traits. The production implementation lives in [`crate::pg`], tests
//! plug in mock sessions.

use async_trait::async_trait;

use crate::error::Result;
use crate::value::{Row, SqlValue};

/// One live database session, owned exclusively by its current borrower.
///
/// `query` must fully materialize its rows before returning so the caller can
/// release the session without invalidating the result.
#[async_trait]
pub trait Connection: Send {
    /// Run a parameterized statement and return all result rows.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a mutating statement and return the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run an unparameterized statement, discarding any result. Used for
    /// BEGIN / COMMIT / ROLLBACK.
    async fn batch_execute(&mut self, sql: &str) -> Result<()>;

    /// Whether the session is known to be broken. A broken session must be
    /// discarded, never returned to the pool: its transactional state is
    /// unknown and would leak to the next borrower.
    fn is_broken(&self) -> bool;

    /// Close the session. Errors during close are not actionable and may be
    /// ignored by callers.
    async fn close(&mut self);
}

/// Factory for new sessions; the pool calls this to grow up to its maximum.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Conn: Connection + 'static;

    async fn connect(&self) -> Result<Self::Conn>;
}
