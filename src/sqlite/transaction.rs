use std::sync::Arc;

use async_trait::async_trait;
use bb8::PooledConnection;

use super::config::{SharedSqliteConnection, SqliteManager};
use super::connection::run_blocking;
use super::params::Params;
use super::query::{execute_dml, execute_select};
use crate::driver::{Connector, DriverTx, ExecResult, IsolationLevel, Prepared, TxOptions};
use crate::error::DbError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Transaction that owns its pooled connection until commit or rollback.
pub struct SqliteTx {
    conn: Option<PooledConnection<'static, SqliteManager>>,
}

impl SqliteTx {
    pub(crate) async fn begin(
        conn: PooledConnection<'static, SqliteManager>,
        opts: TxOptions,
    ) -> Result<Self, DbError> {
        // sqlite only offers serializable isolation; read-only work can defer the write lock
        let begin_sql = if opts.read_only {
            "BEGIN DEFERRED"
        } else {
            "BEGIN IMMEDIATE"
        };
        if let Some(level) = opts.isolation
            && level != IsolationLevel::Serializable
        {
            tracing::debug!(?level, "sqlite runs every transaction as serializable");
        }
        run_blocking(Arc::clone(&*conn), move |guard| {
            guard.execute_batch(begin_sql)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn: Some(conn) })
    }

    fn handle(&self) -> Result<SharedSqliteConnection, DbError> {
        self.conn
            .as_ref()
            .map(|conn| Arc::clone(&**conn))
            .ok_or(DbError::TxDone)
    }

    async fn finish(&mut self, sql: &'static str) -> Result<(), DbError> {
        let conn = self.conn.take().ok_or(DbError::TxDone)?;
        let handle = Arc::clone(&*conn);
        let outcome = run_blocking(handle, move |guard| {
            let res = guard.execute_batch(sql);
            // leave the pooled connection clean even if COMMIT failed
            if res.is_err() && !guard.is_autocommit() {
                let _ = guard.execute_batch("ROLLBACK");
            }
            res.map_err(DbError::from)
        })
        .await;
        drop(conn);
        outcome
    }
}

#[async_trait]
impl Connector for SqliteTx {
    async fn execute(&self, sql: &str, params: &[RowValues]) -> Result<ExecResult, DbError> {
        let conn = self.handle()?;
        let sql_owned = sql.to_owned();
        let params = Params::convert(params);
        run_blocking(conn, move |guard| execute_dml(guard, &sql_owned, &params.0)).await
    }

    async fn prepare(&self, sql: &str) -> Result<Prepared, DbError> {
        let conn = self.handle()?;
        let sql_owned = sql.to_owned();
        run_blocking(conn, move |guard| {
            guard.prepare_cached(&sql_owned)?;
            Ok(Prepared::new(&sql_owned))
        })
        .await
    }

    async fn query(&self, sql: &str, params: &[RowValues]) -> Result<ResultSet, DbError> {
        let conn = self.handle()?;
        let sql_owned = sql.to_owned();
        let params = Params::convert(params);
        run_blocking(conn, move |guard| execute_select(guard, &sql_owned, &params.0)).await
    }
}

#[async_trait]
impl DriverTx for SqliteTx {
    async fn commit(&mut self) -> Result<(), DbError> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            handle.spawn(async move {
                let shared = Arc::clone(&*conn);
                let _ = run_blocking(shared, |guard| {
                    if !guard.is_autocommit() {
                        guard.execute_batch("ROLLBACK")?;
                    }
                    Ok(())
                })
                .await;
                drop(conn);
            });
        }
    }
}
