//! Statement parameters and result rows.
//!
//! `SqlValue` is the single value type crossing the driver seam in both
//! directions: statement parameters going in, row columns coming out. Rows
//! share their column-name vector across a whole result set.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::error::{PoolkitError, Result};

// ============================================================================
// Values
// ============================================================================

/// A SQL value, either a statement parameter or a result column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(serde_json::Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            SqlValue::Float(f) => Some(*f),
            SqlValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            SqlValue::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            SqlValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            SqlValue::Json(j) => Some(j),
            _ => None,
        }
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl From<i16> for SqlValue {
    fn from(i: i16) -> Self {
        SqlValue::Int(i as i64)
    }
}

impl From<i32> for SqlValue {
    fn from(i: i32) -> Self {
        SqlValue::Int(i as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        SqlValue::Float(f)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(b: Vec<u8>) -> Self {
        SqlValue::Bytes(b)
    }
}

impl From<Uuid> for SqlValue {
    fn from(u: Uuid) -> Self {
        SqlValue::Uuid(u)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(ts: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(ts)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(d: NaiveDate) -> Self {
        SqlValue::Date(d)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(j: serde_json::Value) -> Self {
        SqlValue::Json(j)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

/// Shared column names - wrapped in Arc so every row of a result set points
/// at the same vector instead of cloning it.
pub type SharedColumns = Arc<Vec<String>>;

/// A single result row.
///
/// Values are stored inline for rows with up to 16 columns (most tables),
/// avoiding a heap allocation per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: SharedColumns,
    values: SmallVec<[SqlValue; 16]>,
}

impl Row {
    /// Build a row from shared column names and values.
    pub fn new(columns: SharedColumns, values: impl IntoIterator<Item = SqlValue>) -> Self {
        Self {
            columns,
            values: values.into_iter().collect(),
        }
    }

    /// Column names, in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a value by column name.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        let idx = self.columns.iter().position(|c| c == name)?;
        self.values.get(idx)
    }

    /// Look up a value by position.
    pub fn index(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    /// Look up a value by name, erroring on an unknown column.
    pub fn try_get(&self, name: &str) -> Result<&SqlValue> {
        self.get(name)
            .ok_or_else(|| PoolkitError::query(format!("no such column: {}", name)))
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        self.try_get(name)?
            .as_text()
            .ok_or_else(|| PoolkitError::query(format!("column {} is not text", name)))
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        self.try_get(name)?
            .as_int()
            .ok_or_else(|| PoolkitError::query(format!("column {} is not an integer", name)))
    }

    pub fn boolean(&self, name: &str) -> Result<bool> {
        self.try_get(name)?
            .as_bool()
            .ok_or_else(|| PoolkitError::query(format!("column {} is not a boolean", name)))
    }

    /// Consume the row, yielding its values in column order.
    pub fn into_values(self) -> impl Iterator<Item = SqlValue> {
        self.values.into_iter()
    }
}

/// Extract a single named column from a set of rows.
///
/// Convenience for single-column projections; unknown columns are an error.
pub fn column_values(rows: &[Row], name: &str) -> Result<Vec<SqlValue>> {
    rows.iter()
        .map(|row| row.try_get(name).cloned())
        .collect()
}

// ============================================================================
// Statements
// ============================================================================

/// A SQL statement: text plus positional parameters. Stateless value.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Append one parameter.
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        let columns = Arc::new(vec!["id".to_string(), "name".to_string(), "active".to_string()]);
        Row::new(
            columns,
            [
                SqlValue::Int(7),
                SqlValue::Text("ada".to_string()),
                SqlValue::Bool(true),
            ],
        )
    }

    #[test]
    fn test_row_lookup_by_name_and_index() {
        let row = sample_row();
        assert_eq!(row.get("id"), Some(&SqlValue::Int(7)));
        assert_eq!(row.index(1), Some(&SqlValue::Text("ada".to_string())));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_typed_accessors() {
        let row = sample_row();
        assert_eq!(row.int("id").unwrap(), 7);
        assert_eq!(row.text("name").unwrap(), "ada");
        assert!(row.boolean("active").unwrap());
        // Wrong type and unknown column are query errors
        assert!(row.int("name").is_err());
        assert!(row.text("missing").is_err());
    }

    #[test]
    fn test_column_values_projection() {
        let columns = Arc::new(vec!["n".to_string()]);
        let rows: Vec<Row> = (0..3)
            .map(|i| Row::new(Arc::clone(&columns), [SqlValue::Int(i)]))
            .collect();
        let ns = column_values(&rows, "n").unwrap();
        assert_eq!(ns, vec![SqlValue::Int(0), SqlValue::Int(1), SqlValue::Int(2)]);
        assert!(column_values(&rows, "missing").is_err());
    }

    #[test]
    fn test_option_params_map_to_null() {
        let some: SqlValue = Some(5i64).into();
        let none: SqlValue = Option::<i64>::None.into();
        assert_eq!(some, SqlValue::Int(5));
        assert!(none.is_null());
    }

    #[test]
    fn test_statement_bind() {
        let stmt = Statement::new("select * from users where id = $1 and active = $2")
            .bind(7i64)
            .bind(true);
        assert_eq!(stmt.params.len(), 2);
        assert_eq!(stmt.params[0], SqlValue::Int(7));
        assert_eq!(stmt.params[1], SqlValue::Bool(true));
    }
}
