//! Minimal driver capability set the builder depends on.
//!
//! Backends implement [`Driver`] for the pooled handle and [`DriverTx`] for a
//! connection bound to an open transaction. Both share the statement surface in
//! [`Connector`].

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::DbError;
use crate::results::{CustomDbRow, ResultSet};
use crate::types::RowValues;

/// Outcome of a DML statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: usize,
    pub last_insert_id: Option<i64>,
}

/// Prepared statement handle. Backends validate the SQL when preparing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    sql: Arc<String>,
}

impl Prepared {
    #[must_use]
    pub fn new(sql: &str) -> Self {
        Self {
            sql: Arc::new(sql.to_owned()),
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn execute(&self, sql: &str, params: &[RowValues]) -> Result<ExecResult, DbError>;

    async fn prepare(&self, sql: &str) -> Result<Prepared, DbError>;

    async fn query(&self, sql: &str, params: &[RowValues]) -> Result<ResultSet, DbError>;

    async fn query_row(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Option<CustomDbRow>, DbError> {
        let rs = self.query(sql, params).await?;
        Ok(rs.results.into_iter().next())
    }
}

#[async_trait]
pub trait Driver: Connector {
    fn name(&self) -> &str;

    /// Whether [`Driver::begin`] can hand out transactions.
    fn supports_transactions(&self) -> bool {
        true
    }

    async fn begin(&self, opts: TxOptions) -> Result<Box<dyn DriverTx>, DbError>;

    async fn ping(&self) -> Result<(), DbError>;

    async fn close(&self) -> Result<(), DbError>;
}

#[async_trait]
pub trait DriverTx: Connector {
    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;
}

pub type DriverFactory =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Arc<dyn Driver>, DbError>> + Send + Sync>;

static DRIVERS: LazyLock<RwLock<HashMap<String, DriverFactory>>> = LazyLock::new(|| {
    #[allow(unused_mut)]
    let mut map: HashMap<String, DriverFactory> = HashMap::new();
    #[cfg(feature = "sqlite")]
    {
        let sqlite: DriverFactory = Arc::new(|source: String| {
            Box::pin(async move {
                let driver = crate::sqlite::SqliteOptionsBuilder::new(source)
                    .build()
                    .await?;
                Ok(Arc::new(driver) as Arc<dyn Driver>)
            })
        });
        map.insert("sqlite".to_string(), sqlite.clone());
        map.insert("sqlite3".to_string(), sqlite);
    }
    RwLock::new(map)
});

/// Make a driver available to [`crate::Db::open`] under `name`.
pub fn register_driver<F>(name: &str, factory: F)
where
    F: Fn(String) -> BoxFuture<'static, Result<Arc<dyn Driver>, DbError>> + Send + Sync + 'static,
{
    let mut drivers = match DRIVERS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    drivers.insert(name.to_string(), Arc::new(factory));
}

/// Connect using the factory registered under `name`.
///
/// # Errors
/// Returns `DbError::ConfigError` for an unknown driver name, or whatever the factory reports.
pub async fn open_driver(name: &str, source: &str) -> Result<Arc<dyn Driver>, DbError> {
    let factory = {
        let drivers = match DRIVERS.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        drivers.get(name).cloned()
    };
    match factory {
        Some(factory) => factory(source.to_string()).await,
        None => Err(DbError::ConfigError(format!(
            "sql: unknown driver {name:?} (forgotten import?)"
        ))),
    }
}
