//! In-process mock driver used by pool and executor tests.
//!
//! The mock models just enough of a database session for the coordination
//! layer's contracts to be observable: scripted per-statement outcomes, a
//! global statement log, and commit/rollback visibility through a shared
//! "committed" list.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connection::{Connect, Connection};
use crate::error::{PoolkitError, Result};
use crate::value::{Row, SharedColumns, SqlValue};

/// Scripted outcome for one statement text.
#[derive(Debug, Clone)]
pub enum Scripted {
    Rows(Vec<Row>),
    Affected(u64),
    /// Statement fails but the session stays healthy.
    QueryError(String),
    /// Statement fails and the session is broken afterwards.
    Break(String),
}

#[derive(Default)]
pub struct MockState {
    /// Number of sessions opened by the connector
    pub connects: usize,
    /// When set, connect() fails with a connection error
    pub fail_connect: bool,
    /// Statement text -> scripted outcome
    pub scripts: HashMap<String, Scripted>,
    /// Every statement sent to any session, in order
    pub log: Vec<String>,
    /// Statements made durable, either by autocommit or by COMMIT
    pub committed: Vec<String>,
}

impl MockState {
    pub fn script(&mut self, sql: &str, outcome: Scripted) {
        self.scripts.insert(sql.to_string(), outcome);
    }

    /// How many logged statements equal `sql`.
    pub fn count_logged(&self, sql: &str) -> usize {
        self.log.iter().filter(|s| s.as_str() == sql).count()
    }
}

/// Build single-column rows named `value` holding the given integers.
pub fn int_rows(values: &[i64]) -> Vec<Row> {
    let columns: SharedColumns = Arc::new(vec!["value".to_string()]);
    values
        .iter()
        .map(|v| Row::new(Arc::clone(&columns), [SqlValue::Int(*v)]))
        .collect()
}

pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl Connect for MockConnector {
    type Conn = MockConn;

    async fn connect(&self) -> Result<MockConn> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(PoolkitError::Connection("mock connect refused".into()));
        }
        state.connects += 1;
        Ok(MockConn {
            state: Arc::clone(&self.state),
            broken: false,
            in_tx: false,
            tx_buffer: Vec::new(),
        })
    }
}

pub struct MockConn {
    state: Arc<Mutex<MockState>>,
    broken: bool,
    in_tx: bool,
    /// Statements issued since BEGIN, made durable on COMMIT
    tx_buffer: Vec<String>,
}

impl MockConn {
    /// Log the statement and resolve its scripted outcome, updating broken
    /// state. Returns Ok(None) for unscripted statements.
    fn resolve(&mut self, sql: &str) -> Result<Option<Scripted>> {
        let outcome = {
            let mut state = self.state.lock();
            state.log.push(sql.to_string());
            state.scripts.get(sql).cloned()
        };
        match outcome {
            Some(Scripted::QueryError(message)) => Err(PoolkitError::query(message)),
            Some(Scripted::Break(message)) => {
                self.broken = true;
                Err(PoolkitError::Connection(message))
            }
            other => Ok(other),
        }
    }

    /// Record a successful statement as pending (in a transaction) or
    /// durable (autocommit).
    fn record(&mut self, sql: &str) {
        if self.in_tx {
            self.tx_buffer.push(sql.to_string());
        } else {
            self.state.lock().committed.push(sql.to_string());
        }
    }
}

#[async_trait]
impl Connection for MockConn {
    async fn query(&mut self, sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>> {
        let outcome = self.resolve(sql)?;
        self.record(sql);
        match outcome {
            Some(Scripted::Rows(rows)) => Ok(rows),
            _ => Ok(Vec::new()),
        }
    }

    async fn execute(&mut self, sql: &str, _params: &[SqlValue]) -> Result<u64> {
        let outcome = self.resolve(sql)?;
        self.record(sql);
        match outcome {
            Some(Scripted::Affected(n)) => Ok(n),
            Some(Scripted::Rows(rows)) => Ok(rows.len() as u64),
            _ => Ok(0),
        }
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        self.resolve(sql)?;
        match sql {
            "BEGIN" => {
                self.in_tx = true;
            }
            "COMMIT" => {
                let pending = std::mem::take(&mut self.tx_buffer);
                self.state.lock().committed.extend(pending);
                self.in_tx = false;
            }
            "ROLLBACK" => {
                self.tx_buffer.clear();
                self.in_tx = false;
            }
            other => {
                self.record(other);
            }
        }
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn close(&mut self) {
        self.broken = true;
    }
}
