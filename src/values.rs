//! Multi-row VALUES expansion.
//!
//! Helpers behind [`Executor::execute_values`](crate::executor::Executor::execute_values):
//! a statement containing a single `$values` marker is expanded into pages of
//! `($1,$2),($3,$4),...` placeholder tuples, one round trip per page.
//! Pure string manipulation, no I/O.

use crate::error::{PoolkitError, Result};

/// The marker replaced by the rendered placeholder tuples.
pub const VALUES_MARKER: &str = "$values";

/// Rows per round trip. Matches the classic execute_values page size.
pub const VALUES_PAGE_SIZE: usize = 100;

/// Split `sql` on its single `$values` marker, returning the text before and
/// after it.
///
/// Zero markers or more than one marker is a query error; the statement will
/// never reach the server in that case. Dollar-quoted strings containing the
/// marker text are not recognized.
pub fn split_values_marker(sql: &str) -> Result<(&str, &str)> {
    let first = sql.find(VALUES_MARKER).ok_or_else(|| {
        PoolkitError::query(format!(
            "statement contains no {} marker: {}",
            VALUES_MARKER, sql
        ))
    })?;
    let after = first + VALUES_MARKER.len();
    if sql[after..].contains(VALUES_MARKER) {
        return Err(PoolkitError::query(format!(
            "statement contains more than one {} marker: {}",
            VALUES_MARKER, sql
        )));
    }
    Ok((&sql[..first], &sql[after..]))
}

/// Render `count` placeholder tuples of `width` columns each, numbering
/// positional parameters from `$1`.
///
/// `render_placeholders(2, 3)` yields `($1,$2),($3,$4),($5,$6)`.
pub fn render_placeholders(width: usize, count: usize) -> String {
    let mut out = String::with_capacity(count * (width * 4 + 3));
    let mut n = 1usize;
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        out.push('(');
        for c in 0..width {
            if c > 0 {
                out.push(',');
            }
            out.push('$');
            out.push_str(&n.to_string());
            n += 1;
        }
        out.push(')');
    }
    out
}

/// Verify all rows share one non-zero width and return it.
pub fn uniform_width(rows: &[Vec<crate::value::SqlValue>]) -> Result<usize> {
    let width = rows
        .first()
        .map(|r| r.len())
        .ok_or_else(|| PoolkitError::query("execute_values called with no rows"))?;
    if width == 0 {
        return Err(PoolkitError::query("execute_values rows must not be empty"));
    }
    if let Some(bad) = rows.iter().find(|r| r.len() != width) {
        return Err(PoolkitError::query(format!(
            "execute_values rows have inconsistent widths ({} vs {})",
            width,
            bad.len()
        )));
    }
    Ok(width)
}
