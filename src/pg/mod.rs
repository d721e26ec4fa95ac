//! The tokio-postgres backed driver.
//!
//! Production implementation of the [`crate::connection`] traits. This module
//! owns no protocol logic of its own; it adapts the external driver to the
//! pool's seam:
//! - `connection`: session lifecycle and error classification
//! - `types`: `SqlValue` conversions in both directions

pub mod connection;
pub mod types;

#[cfg(all(test, feature = "postgres-integration-tests"))]
mod tests;

pub use connection::{PgConn, PgConnector};

use crate::config::DbConfig;
use crate::error::Result;
use crate::executor::Executor;
use crate::pool::Pool;

/// A pool of tokio-postgres sessions.
pub type PgPool = Pool<PgConnector>;

/// A pooled executor over tokio-postgres sessions.
pub type PgExecutor = Executor<PgConnector>;

/// Open a pool for `config` and wrap it in an executor.
pub async fn connect(config: DbConfig) -> Result<PgExecutor> {
    let connector = PgConnector::new(config.clone());
    let pool = Pool::connect(config, connector).await?;
    Ok(Executor::new(pool))
}
