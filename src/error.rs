//! Error types for poolkit.
//!
//! Every failure surfaced by this crate is one of these kinds, so callers can
//! discriminate retryable conditions (pool pressure, broken sessions) from
//! non-retryable ones (malformed statements) and apply their own retry policy.
//! This crate itself never retries.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolkitError {
    /// No connection became available within the configured wait bound.
    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    /// The underlying session is broken. Its connection has been discarded,
    /// not returned to the pool.
    #[error("database connection error: {0}")]
    Connection(String),

    /// A statement failed (malformed SQL, constraint violation, ...). The
    /// connection itself is healthy and has been returned to the pool.
    #[error("query failed{}: {message}", .code.as_deref().map(|c| format!(" (sqlstate {c})")).unwrap_or_default())]
    Query {
        message: String,
        /// SQLSTATE code reported by the server, when available.
        code: Option<String>,
    },

    /// BEGIN, COMMIT or ROLLBACK itself failed. Reported in preference to the
    /// body error it may supersede, since the transactional state is in doubt.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Invalid configuration, rejected before any connection is opened.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pool has been closed; no further acquisitions are possible.
    #[error("connection pool is closed")]
    PoolClosed,
}

impl PoolkitError {
    /// Build a query error without a SQLSTATE code.
    pub fn query(message: impl Into<String>) -> Self {
        PoolkitError::Query {
            message: message.into(),
            code: None,
        }
    }

    /// Whether a caller-side retry could plausibly succeed.
    ///
    /// Pool exhaustion and broken sessions are transient; everything else
    /// (bad SQL, bad config, closed pool) will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolkitError::PoolExhausted { .. } | PoolkitError::Connection(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PoolkitError>;
