use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tokio::task::spawn_blocking;

use super::config::{SharedSqliteConnection, SqliteManager, SqliteOptions};
use super::params::Params;
use super::query::{execute_dml, execute_select};
use super::transaction::SqliteTx;
use crate::driver::{Connector, Driver, DriverTx, ExecResult, Prepared, TxOptions};
use crate::error::DbError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Pooled `SQLite` driver. Statements outside a transaction auto-commit.
pub struct SqliteDriver {
    pool: Pool<SqliteManager>,
    path: String,
    closed: AtomicBool,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("path", &self.path)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SqliteDriver {
    /// Create the pool and check out one connection so setup errors surface here.
    ///
    /// # Errors
    /// Returns `DbError::ConnectionError` if pool creation or the first checkout fails.
    pub async fn new(options: SqliteOptions) -> Result<Self, DbError> {
        let path = options.path.clone();
        let manager = SqliteManager::new(options);
        let pool = Pool::builder()
            .max_size(manager.max_size())
            .build(manager)
            .await
            .map_err(|e| DbError::ConnectionError(format!("Failed to create SQLite pool: {e}")))?;
        {
            let _probe = pool.get().await?;
        }
        Ok(Self {
            pool,
            path,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::ConnectionError(format!(
                "sqlite database {} is closed",
                self.path
            )));
        }
        Ok(())
    }

    async fn checkout(&self) -> Result<PooledConnection<'static, SqliteManager>, DbError> {
        self.ensure_open()?;
        Ok(self.pool.get_owned().await?)
    }
}

/// Run a closure on a checked-out connection. The checkout moves into the
/// blocking task and returns to the pool only after `func` finishes, even if
/// the caller stops waiting, so `begin` can never claim it mid-statement.
pub(crate) async fn run_pooled<F, R>(
    conn: PooledConnection<'static, SqliteManager>,
    func: F,
) -> Result<R, DbError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, DbError> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await?
}

/// Run a closure against the locked connection on the blocking pool.
pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, DbError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, DbError> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await?
}

#[async_trait]
impl Connector for SqliteDriver {
    async fn execute(&self, sql: &str, params: &[RowValues]) -> Result<ExecResult, DbError> {
        let conn = self.checkout().await?;
        let sql_owned = sql.to_owned();
        let params = Params::convert(params);
        run_pooled(conn, move |guard| execute_dml(guard, &sql_owned, &params.0)).await
    }

    async fn prepare(&self, sql: &str) -> Result<Prepared, DbError> {
        let conn = self.checkout().await?;
        let sql_owned = sql.to_owned();
        run_pooled(conn, move |guard| {
            guard.prepare_cached(&sql_owned)?;
            Ok(Prepared::new(&sql_owned))
        })
        .await
    }

    async fn query(&self, sql: &str, params: &[RowValues]) -> Result<ResultSet, DbError> {
        let conn = self.checkout().await?;
        let sql_owned = sql.to_owned();
        let params = Params::convert(params);
        run_pooled(conn, move |guard| execute_select(guard, &sql_owned, &params.0)).await
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn begin(&self, opts: TxOptions) -> Result<Box<dyn DriverTx>, DbError> {
        self.ensure_open()?;
        let conn = self.pool.get_owned().await?;
        let tx = SqliteTx::begin(conn, opts).await?;
        Ok(Box::new(tx))
    }

    async fn ping(&self) -> Result<(), DbError> {
        let conn = self.checkout().await?;
        run_pooled(conn, |guard| {
            guard.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), DbError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
