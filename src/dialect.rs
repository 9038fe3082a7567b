//! SQL dialect seam: bind variables, quoting, paging and catalog probes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DbError;
use crate::router::ConnectionContext;
use crate::types::RowValues;

#[async_trait]
pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Placeholder for the `index`-th (1-based) bound value.
    fn bind_var(&self, index: usize) -> String;

    fn quote(&self, key: &str) -> String {
        format!("\"{}\"", key.replace('"', "\"\""))
    }

    fn limit_and_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }

    /// Clause appended to an INSERT so the new key comes back as a row.
    fn returning_sql(&self, _quoted_pk: &str) -> Option<String> {
        None
    }

    fn default_values_sql(&self) -> &'static str {
        "DEFAULT VALUES"
    }

    async fn has_table(&self, conn: &ConnectionContext, table: &str) -> Result<bool, DbError>;

    async fn has_column(
        &self,
        conn: &ConnectionContext,
        table: &str,
        column: &str,
    ) -> Result<bool, DbError>;

    async fn has_index(
        &self,
        conn: &ConnectionContext,
        table: &str,
        index: &str,
    ) -> Result<bool, DbError>;
}

async fn count_positive(
    conn: &ConnectionContext,
    sql: &str,
    params: &[RowValues],
) -> Result<bool, DbError> {
    let row = conn.query_row(sql, params).await?;
    Ok(row
        .as_ref()
        .and_then(|r| r.get_by_index(0))
        .and_then(RowValues::as_int)
        .is_some_and(|count| *count > 0))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

#[async_trait]
impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn bind_var(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn limit_and_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
        }
    }

    async fn has_table(&self, conn: &ConnectionContext, table: &str) -> Result<bool, DbError> {
        count_positive(
            conn,
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[RowValues::from(table)],
        )
        .await
    }

    async fn has_column(
        &self,
        conn: &ConnectionContext,
        table: &str,
        column: &str,
    ) -> Result<bool, DbError> {
        count_positive(
            conn,
            "SELECT count(*) FROM pragma_table_info(?) WHERE name = ?",
            &[RowValues::from(table), RowValues::from(column)],
        )
        .await
    }

    async fn has_index(
        &self,
        conn: &ConnectionContext,
        table: &str,
        index: &str,
    ) -> Result<bool, DbError> {
        count_positive(
            conn,
            "SELECT count(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND name = ?",
            &[RowValues::from(table), RowValues::from(index)],
        )
        .await
    }
}

/// SQL generation for Postgres-speaking drivers registered by the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

#[async_trait]
impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn bind_var(&self, index: usize) -> String {
        format!("${index}")
    }

    fn returning_sql(&self, quoted_pk: &str) -> Option<String> {
        Some(format!("RETURNING {quoted_pk}"))
    }

    async fn has_table(&self, conn: &ConnectionContext, table: &str) -> Result<bool, DbError> {
        count_positive(
            conn,
            "SELECT count(*) FROM information_schema.tables WHERE table_name = $1 AND table_type = 'BASE TABLE' AND table_schema = CURRENT_SCHEMA()",
            &[RowValues::from(table)],
        )
        .await
    }

    async fn has_column(
        &self,
        conn: &ConnectionContext,
        table: &str,
        column: &str,
    ) -> Result<bool, DbError> {
        count_positive(
            conn,
            "SELECT count(*) FROM information_schema.columns WHERE table_schema = CURRENT_SCHEMA() AND table_name = $1 AND column_name = $2",
            &[RowValues::from(table), RowValues::from(column)],
        )
        .await
    }

    async fn has_index(
        &self,
        conn: &ConnectionContext,
        table: &str,
        index: &str,
    ) -> Result<bool, DbError> {
        count_positive(
            conn,
            "SELECT count(*) FROM pg_indexes WHERE tablename = $1 AND indexname = $2 AND schemaname = CURRENT_SCHEMA()",
            &[RowValues::from(table), RowValues::from(index)],
        )
        .await
    }
}

/// ANSI fallback for drivers with no dedicated dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommonDialect;

#[async_trait]
impl Dialect for CommonDialect {
    fn name(&self) -> &'static str {
        "common"
    }

    fn bind_var(&self, _index: usize) -> String {
        "?".to_string()
    }

    async fn has_table(&self, conn: &ConnectionContext, table: &str) -> Result<bool, DbError> {
        count_positive(
            conn,
            "SELECT count(*) FROM information_schema.tables WHERE table_name = ?",
            &[RowValues::from(table)],
        )
        .await
    }

    async fn has_column(
        &self,
        conn: &ConnectionContext,
        table: &str,
        column: &str,
    ) -> Result<bool, DbError> {
        count_positive(
            conn,
            "SELECT count(*) FROM information_schema.columns WHERE table_name = ? AND column_name = ?",
            &[RowValues::from(table), RowValues::from(column)],
        )
        .await
    }

    async fn has_index(
        &self,
        _conn: &ConnectionContext,
        _table: &str,
        _index: &str,
    ) -> Result<bool, DbError> {
        Err(DbError::Unimplemented(
            "index lookup needs a driver-specific dialect".into(),
        ))
    }
}

/// Pick the dialect for a registered driver name.
#[must_use]
pub fn for_driver(name: &str) -> Arc<dyn Dialect> {
    match name {
        "sqlite" | "sqlite3" => Arc::new(SqliteDialect),
        "postgres" | "postgresql" | "pgx" => Arc::new(PostgresDialect),
        _ => Arc::new(CommonDialect),
    }
}
