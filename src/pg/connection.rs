//! PostgreSQL session implementation over tokio-postgres.
//!
//! Each `PgConn` owns one client plus the spawned task driving its socket.
//! Error classification is the important part: statement failures carrying a
//! SQLSTATE leave the session healthy, everything else marks it broken so the
//! pool discards it.

use async_trait::async_trait;
use tokio_postgres::NoTls;
use tracing::debug;

use super::types::{convert_rows, ToSqlParams};
use crate::config::DbConfig;
use crate::connection::{Connect, Connection};
use crate::error::{PoolkitError, Result};
use crate::value::{Row, SqlValue};

// ============================================================================
// Connector
// ============================================================================

/// Opens tokio-postgres sessions for a [`DbConfig`].
pub struct PgConnector {
    config: DbConfig,
}

impl PgConnector {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connect for PgConnector {
    type Conn = PgConn;

    async fn connect(&self) -> Result<PgConn> {
        let mut driver_config = tokio_postgres::Config::new();
        driver_config
            .host(&self.config.host)
            .port(self.config.port)
            .dbname(&self.config.dbname)
            .user(&self.config.user);
        if let Some(password) = &self.config.password {
            driver_config.password(password);
        }
        if let Some(name) = &self.config.application_name {
            driver_config.application_name(name);
        }

        let (client, connection) = driver_config
            .connect(NoTls)
            .await
            .map_err(|e| PoolkitError::Connection(format!("connect failed: {}", e)))?;

        // The connection task ends when the client is dropped. An error here
        // surfaces to borrowers through is_closed() on their next statement.
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(error = %err, "postgres connection task finished with error");
            }
        });

        Ok(PgConn { client })
    }
}

// ============================================================================
// Session
// ============================================================================

/// One live tokio-postgres session.
pub struct PgConn {
    client: tokio_postgres::Client,
}

#[async_trait]
impl Connection for PgConn {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let params = ToSqlParams::new(params);
        let pg_rows = self
            .client
            .query(sql, params.as_refs())
            .await
            .map_err(classify_error)?;
        convert_rows(&pg_rows)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let params = ToSqlParams::new(params);
        self.client
            .execute(sql, params.as_refs())
            .await
            .map_err(classify_error)
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await.map_err(classify_error)
    }

    fn is_broken(&self) -> bool {
        self.client.is_closed()
    }

    async fn close(&mut self) {
        // Dropping the client terminates the connection task; there is
        // nothing to flush at this layer.
    }
}

/// Map a driver error onto the crate taxonomy.
///
/// A server-reported error with a SQLSTATE means the statement failed but the
/// session survived; anything else (I/O, protocol, closed socket) means the
/// session is in doubt and must be discarded.
fn classify_error(err: tokio_postgres::Error) -> PoolkitError {
    if let Some(db_err) = err.as_db_error() {
        return PoolkitError::Query {
            message: db_err.message().to_string(),
            code: Some(db_err.code().code().to_string()),
        };
    }
    PoolkitError::Connection(err.to_string())
}
