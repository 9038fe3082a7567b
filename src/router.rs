//! Primary/replica routing and the observed statement path.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::context::QueryContext;
use crate::driver::{Connector, Driver, DriverTx, ExecResult, Prepared};
use crate::error::DbError;
use crate::observe::{QueryObserver, render_sql};
use crate::results::{CustomDbRow, ResultSet};
use crate::types::RowValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
    Prepare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Open,
    Committed,
    RolledBack,
}

enum TxState {
    Open(Box<dyn DriverTx>),
    Committed,
    RolledBack,
}

/// An open transaction and the connection it exclusively owns.
pub struct TxHandle {
    state: Mutex<TxState>,
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle").finish_non_exhaustive()
    }
}

impl TxHandle {
    #[must_use]
    pub fn new(tx: Box<dyn DriverTx>) -> Self {
        Self {
            state: Mutex::new(TxState::Open(tx)),
        }
    }

    pub async fn status(&self) -> TxStatus {
        match &*self.state.lock().await {
            TxState::Open(_) => TxStatus::Open,
            TxState::Committed => TxStatus::Committed,
            TxState::RolledBack => TxStatus::RolledBack,
        }
    }

    /// Commit. The handle is finished afterwards even if the driver fails.
    ///
    /// # Errors
    /// `DbError::TxDone` if already finished, otherwise the driver's error.
    pub async fn commit(&self) -> Result<(), DbError> {
        self.finish(TxState::Committed).await
    }

    /// Roll back. The handle is finished afterwards even if the driver fails.
    ///
    /// # Errors
    /// `DbError::TxDone` if already finished, otherwise the driver's error.
    pub async fn rollback(&self) -> Result<(), DbError> {
        self.finish(TxState::RolledBack).await
    }

    async fn finish(&self, terminal: TxState) -> Result<(), DbError> {
        let committing = matches!(terminal, TxState::Committed);
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, terminal) {
            TxState::Open(mut tx) => {
                if committing {
                    tx.commit().await
                } else {
                    tx.rollback().await
                }
            }
            finished => {
                *state = finished;
                Err(DbError::TxDone)
            }
        }
    }
}

#[async_trait]
impl Connector for TxHandle {
    async fn execute(&self, sql: &str, params: &[RowValues]) -> Result<ExecResult, DbError> {
        match &*self.state.lock().await {
            TxState::Open(tx) => tx.execute(sql, params).await,
            _ => Err(DbError::TxDone),
        }
    }

    async fn prepare(&self, sql: &str) -> Result<Prepared, DbError> {
        match &*self.state.lock().await {
            TxState::Open(tx) => tx.prepare(sql).await,
            _ => Err(DbError::TxDone),
        }
    }

    async fn query(&self, sql: &str, params: &[RowValues]) -> Result<ResultSet, DbError> {
        match &*self.state.lock().await {
            TxState::Open(tx) => tx.query(sql, params).await,
            _ => Err(DbError::TxDone),
        }
    }
}

/// A physical handle: the pooled database or a transaction bound to one connection.
#[derive(Clone)]
pub enum Handle {
    Driver(Arc<dyn Driver>),
    Tx(Arc<TxHandle>),
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Driver(driver) => f.debug_tuple("Driver").field(&driver.name()).finish(),
            Handle::Tx(_) => f.write_str("Tx"),
        }
    }
}

impl Handle {
    #[must_use]
    pub fn is_tx(&self) -> bool {
        matches!(self, Handle::Tx(_))
    }

    #[must_use]
    pub fn as_tx(&self) -> Option<&Arc<TxHandle>> {
        match self {
            Handle::Tx(tx) => Some(tx),
            Handle::Driver(_) => None,
        }
    }

    #[must_use]
    pub fn as_driver(&self) -> Option<&Arc<dyn Driver>> {
        match self {
            Handle::Driver(driver) => Some(driver),
            Handle::Tx(_) => None,
        }
    }

    /// Whether both handles point at the same physical object.
    #[must_use]
    pub fn same_as(&self, other: &Handle) -> bool {
        match (self, other) {
            (Handle::Driver(a), Handle::Driver(b)) => Arc::ptr_eq(a, b),
            (Handle::Tx(a), Handle::Tx(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[async_trait]
impl Connector for Handle {
    async fn execute(&self, sql: &str, params: &[RowValues]) -> Result<ExecResult, DbError> {
        match self {
            Handle::Driver(driver) => driver.execute(sql, params).await,
            Handle::Tx(tx) => tx.execute(sql, params).await,
        }
    }

    async fn prepare(&self, sql: &str) -> Result<Prepared, DbError> {
        match self {
            Handle::Driver(driver) => driver.prepare(sql).await,
            Handle::Tx(tx) => tx.prepare(sql).await,
        }
    }

    async fn query(&self, sql: &str, params: &[RowValues]) -> Result<ResultSet, DbError> {
        match self {
            Handle::Driver(driver) => driver.query(sql, params).await,
            Handle::Tx(tx) => tx.query(sql, params).await,
        }
    }

    async fn query_row(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Option<CustomDbRow>, DbError> {
        match self {
            Handle::Driver(driver) => driver.query_row(sql, params).await,
            Handle::Tx(tx) => tx.query_row(sql, params).await,
        }
    }
}

/// Primary and optional replica handles plus the caller context they run under.
#[derive(Clone, Default)]
pub struct ConnectionContext {
    primary: Option<Handle>,
    replica: Option<Handle>,
    ctx: Option<QueryContext>,
    source: Arc<str>,
    observer: Option<Arc<dyn QueryObserver>>,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("primary", &self.primary)
            .field("replica", &self.replica)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ConnectionContext {
    #[must_use]
    pub fn new(primary: Arc<dyn Driver>, replica: Option<Arc<dyn Driver>>) -> Self {
        Self {
            primary: Some(Handle::Driver(primary)),
            replica: replica.map(Handle::Driver),
            ..Self::default()
        }
    }

    /// Pick the handle for a statement.
    ///
    /// An open transaction always wins. Otherwise reads prefer the replica.
    ///
    /// # Errors
    /// `DbError::ConnectionError` when no primary handle is attached.
    pub fn route(&self, kind: StatementKind) -> Result<&Handle, DbError> {
        let primary = self
            .primary
            .as_ref()
            .ok_or_else(|| DbError::ConnectionError("no primary connection available".into()))?;
        if primary.is_tx() {
            return Ok(primary);
        }
        match (kind, &self.replica) {
            (StatementKind::Read, Some(replica)) => Ok(replica),
            _ => Ok(primary),
        }
    }

    #[must_use]
    pub fn primary(&self) -> Option<&Handle> {
        self.primary.as_ref()
    }

    #[must_use]
    pub fn replica(&self) -> Option<&Handle> {
        self.replica.as_ref()
    }

    #[must_use]
    pub fn tx(&self) -> Option<&Arc<TxHandle>> {
        self.primary.as_ref().and_then(Handle::as_tx)
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx().is_some()
    }

    pub(crate) fn set_primary(&mut self, primary: Option<Handle>) {
        self.primary = primary;
    }

    /// Drop the replica so later reads on this clone hit the primary.
    pub fn use_master(&mut self) {
        self.replica = None;
    }

    pub(crate) fn bind(&mut self, ctx: QueryContext, source: &str) {
        self.ctx = Some(ctx);
        self.source = Arc::from(source);
    }

    pub(crate) fn set_observer(&mut self, observer: Option<Arc<dyn QueryObserver>>) {
        self.observer = observer;
    }

    #[must_use]
    pub fn context(&self) -> Option<&QueryContext> {
        self.ctx.as_ref()
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    async fn observed<T, F>(
        &self,
        operation: &'static str,
        sql: &str,
        params: &[RowValues],
        rows_of: fn(&T) -> Option<usize>,
        fut: F,
    ) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        let done = self.observer.as_ref().map(|observer| {
            observer.begin(
                self.ctx.as_ref(),
                operation,
                &render_sql(sql, params),
                &self.source,
            )
        });
        let res = match &self.ctx {
            Some(ctx) => ctx.run(fut).await,
            None => fut.await,
        };
        if let Some(done) = done {
            match &res {
                Ok(value) => done(None, rows_of(value)),
                Err(err) => done(Some(err), None),
            }
        }
        res
    }

    /// # Errors
    /// Routing, cancellation or driver errors.
    pub async fn exec(&self, sql: &str, params: &[RowValues]) -> Result<ExecResult, DbError> {
        let handle = self.route(StatementKind::Write)?;
        self.observed(
            "exec",
            sql,
            params,
            |r: &ExecResult| Some(r.rows_affected),
            handle.execute(sql, params),
        )
        .await
    }

    /// # Errors
    /// Routing, cancellation or driver errors.
    pub async fn prepare(&self, sql: &str) -> Result<Prepared, DbError> {
        let handle = self.route(StatementKind::Prepare)?;
        self.observed("prepare", sql, &[], |_| None, handle.prepare(sql))
            .await
    }

    /// # Errors
    /// Routing, cancellation or driver errors.
    pub async fn query(&self, sql: &str, params: &[RowValues]) -> Result<ResultSet, DbError> {
        let handle = self.route(StatementKind::Read)?;
        self.observed("query", sql, params, |_| None, handle.query(sql, params))
            .await
    }

    /// # Errors
    /// Routing, cancellation or driver errors.
    pub async fn query_row(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Option<CustomDbRow>, DbError> {
        let handle = self.route(StatementKind::Read)?;
        self.observed(
            "query_row",
            sql,
            params,
            |_| None,
            handle.query_row(sql, params),
        )
        .await
    }
}
