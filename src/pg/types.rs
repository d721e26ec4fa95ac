//! `SqlValue` conversions across the tokio-postgres boundary.
//!
//! Parameters go out through a `ToSql` impl that delegates to the driver's
//! own encodings; result columns come back by decoding each column according
//! to its reported type.

use std::sync::Arc;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::{to_sql_checked, FromSqlOwned, IsNull, ToSql, Type};
use uuid::Uuid;

use crate::error::{PoolkitError, Result};
use crate::value::{Row, SharedColumns, SqlValue};

// ============================================================================
// Parameters (out)
// ============================================================================

/// Borrowed parameter list in the shape the driver wants.
pub struct ToSqlParams<'a> {
    refs: Vec<&'a (dyn ToSql + Sync)>,
}

impl<'a> ToSqlParams<'a> {
    pub fn new(params: &'a [SqlValue]) -> Self {
        Self {
            refs: params.iter().map(|p| p as &(dyn ToSql + Sync)).collect(),
        }
    }

    pub fn as_refs(&self) -> &[&'a (dyn ToSql + Sync)] {
        &self.refs
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => b.to_sql(ty, out),
            SqlValue::Int(i) => {
                // Narrow to the column's width; out-of-range is an encode error.
                if *ty == Type::INT2 {
                    i16::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*i)?.to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            SqlValue::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            SqlValue::Text(s) => s.to_sql(ty, out),
            SqlValue::Bytes(b) => b.to_sql(ty, out),
            SqlValue::Uuid(u) => u.to_sql(ty, out),
            SqlValue::Timestamp(ts) => {
                if *ty == Type::TIMESTAMP {
                    ts.naive_utc().to_sql(ty, out)
                } else {
                    ts.to_sql(ty, out)
                }
            }
            SqlValue::Date(d) => d.to_sql(ty, out),
            SqlValue::Json(j) => j.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Mismatches surface as per-variant encode or server errors instead
        // of being rejected up front; Null must bind to any column type.
        true
    }

    to_sql_checked!();
}

// ============================================================================
// Rows (in)
// ============================================================================

/// Convert a driver result set, sharing one column-name vector across rows.
pub fn convert_rows(pg_rows: &[tokio_postgres::Row]) -> Result<Vec<Row>> {
    let first = match pg_rows.first() {
        Some(row) => row,
        None => return Ok(Vec::new()),
    };
    let columns: SharedColumns = Arc::new(
        first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    );
    pg_rows
        .iter()
        .map(|row| convert_row(row, &columns))
        .collect()
}

fn convert_row(pg_row: &tokio_postgres::Row, columns: &SharedColumns) -> Result<Row> {
    let mut values = Vec::with_capacity(pg_row.len());
    for (idx, column) in pg_row.columns().iter().enumerate() {
        values.push(convert_value(pg_row, idx, column.type_())?);
    }
    Ok(Row::new(Arc::clone(columns), values))
}

fn decode<T: FromSqlOwned>(row: &tokio_postgres::Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| PoolkitError::query(format!("column decode failed: {}", e)))
}

fn convert_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<SqlValue> {
    let value = if *ty == Type::BOOL {
        decode::<bool>(row, idx)?.map(SqlValue::Bool)
    } else if *ty == Type::INT2 {
        decode::<i16>(row, idx)?.map(|v| SqlValue::Int(v as i64))
    } else if *ty == Type::INT4 {
        decode::<i32>(row, idx)?.map(|v| SqlValue::Int(v as i64))
    } else if *ty == Type::INT8 {
        decode::<i64>(row, idx)?.map(SqlValue::Int)
    } else if *ty == Type::FLOAT4 {
        decode::<f32>(row, idx)?.map(|v| SqlValue::Float(v as f64))
    } else if *ty == Type::FLOAT8 {
        decode::<f64>(row, idx)?.map(SqlValue::Float)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        decode::<String>(row, idx)?.map(SqlValue::Text)
    } else if *ty == Type::BYTEA {
        decode::<Vec<u8>>(row, idx)?.map(SqlValue::Bytes)
    } else if *ty == Type::UUID {
        decode::<Uuid>(row, idx)?.map(SqlValue::Uuid)
    } else if *ty == Type::TIMESTAMPTZ {
        decode::<DateTime<Utc>>(row, idx)?.map(SqlValue::Timestamp)
    } else if *ty == Type::TIMESTAMP {
        decode::<NaiveDateTime>(row, idx)?
            .map(|v| SqlValue::Timestamp(DateTime::from_naive_utc_and_offset(v, Utc)))
    } else if *ty == Type::DATE {
        decode::<NaiveDate>(row, idx)?.map(SqlValue::Date)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        decode::<serde_json::Value>(row, idx)?.map(SqlValue::Json)
    } else {
        return Err(PoolkitError::query(format!(
            "unsupported column type: {}",
            ty
        )));
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_encodes_as_null_for_any_type() {
        let mut buf = BytesMut::new();
        let result = SqlValue::Null.to_sql(&Type::INT8, &mut buf).unwrap();
        assert!(matches!(result, IsNull::Yes));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_int_narrows_to_column_width() {
        let mut buf = BytesMut::new();
        SqlValue::Int(7).to_sql(&Type::INT2, &mut buf).unwrap();
        assert_eq!(buf.len(), 2);

        let mut buf = BytesMut::new();
        SqlValue::Int(7).to_sql(&Type::INT8, &mut buf).unwrap();
        assert_eq!(buf.len(), 8);

        // Out of range for the target width is an encode error, not silent
        // truncation.
        let mut buf = BytesMut::new();
        assert!(SqlValue::Int(1i64 << 40).to_sql(&Type::INT2, &mut buf).is_err());
    }

    #[test]
    fn test_text_and_bool_encode() {
        let mut buf = BytesMut::new();
        SqlValue::Text("ada".into())
            .to_sql(&Type::TEXT, &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"ada");

        let mut buf = BytesMut::new();
        SqlValue::Bool(true).to_sql(&Type::BOOL, &mut buf).unwrap();
        assert_eq!(&buf[..], &[1]);
    }

    #[test]
    fn test_params_keep_positional_order() {
        let params = vec![SqlValue::Int(1), SqlValue::Text("x".into())];
        let wrapped = ToSqlParams::new(&params);
        assert_eq!(wrapped.as_refs().len(), 2);
    }
}
