use rusqlite::types::Value;
use rusqlite::{Connection, Statement, ToSql};

use crate::driver::ExecResult;
use crate::error::DbError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
/// Returns `DbError` if the value cannot be read.
pub fn sqlite_extract_value_sync(row: &rusqlite::Row, idx: usize) -> Result<RowValues, DbError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Run a statement and materialize every returned row.
///
/// # Errors
/// Returns `DbError` if execution or value extraction fails.
pub fn build_result_set(stmt: &mut Statement, params: &[Value]) -> Result<ResultSet, DbError> {
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();
    let mut result_set = ResultSet::new(column_names);

    let mut rows_iter = stmt.query(&param_refs[..])?;
    while let Some(row) = rows_iter.next()? {
        let values = (0..col_count)
            .map(|i| sqlite_extract_value_sync(row, i))
            .collect::<Result<Vec<_>, _>>()?;
        result_set.push(values);
    }

    Ok(result_set)
}

/// Execute a DML statement on a locked connection.
///
/// # Errors
/// Returns `DbError` if preparing or executing fails.
pub fn execute_dml(conn: &mut Connection, sql: &str, params: &[Value]) -> Result<ExecResult, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
    let affected = stmt.execute(&refs[..])?;
    drop(stmt);
    Ok(ExecResult {
        rows_affected: affected,
        last_insert_id: Some(conn.last_insert_rowid()),
    })
}

/// Prepare and run a query on a locked connection.
///
/// # Errors
/// Returns `DbError` if preparing or reading rows fails.
pub fn execute_select(conn: &mut Connection, sql: &str, params: &[Value]) -> Result<ResultSet, DbError> {
    let mut stmt = conn.prepare(sql)?;
    build_result_set(&mut stmt, params)
}
