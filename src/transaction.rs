//! Transaction lifecycle on the builder: `none -> open -> committed | rolled back`.

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::error;

use crate::context::QueryContext;
use crate::db::Db;
use crate::driver::TxOptions;
use crate::error::DbError;
use crate::router::{Handle, TxHandle};

/// Rolls the transaction back if dropped while still armed, e.g. when the
/// future running the body is cancelled.
struct RollbackGuard {
    tx: Option<Arc<TxHandle>>,
}

impl RollbackGuard {
    fn disarm(&mut self) {
        self.tx = None;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            drop(handle.spawn(async move {
                if let Err(err) = tx.rollback().await
                    && !matches!(err, DbError::TxDone)
                {
                    tracing::warn!(error = %err, "rollback of abandoned transaction failed");
                }
            }));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Db {
    /// Begin with default options.
    pub async fn begin(&self) -> Db {
        self.begin_tx(TxOptions::default()).await
    }

    /// Clone with the primary replaced by a new transaction handle.
    ///
    /// A primary that is already a transaction, or whose driver has no
    /// transaction support, leaves "can't start transaction" on the clone.
    pub async fn begin_tx(&self, opts: TxOptions) -> Db {
        let mut clone = self.clone();
        let driver = match clone.conn.primary() {
            Some(Handle::Driver(driver)) if driver.supports_transactions() => Arc::clone(driver),
            _ => {
                clone.add_error(DbError::cant_start_transaction(None));
                return clone;
            }
        };
        let begun = match clone.conn.context() {
            Some(ctx) => ctx.run(driver.begin(opts)).await,
            None => driver.begin(opts).await,
        };
        match begun {
            Ok(tx) => clone
                .conn
                .set_primary(Some(Handle::Tx(Arc::new(TxHandle::new(tx))))),
            Err(err) => clone.add_error(DbError::cant_start_transaction(Some(err))),
        }
        clone
    }

    /// # Errors
    /// Recorded on the builder: `InvalidTransaction` without an open
    /// transaction, otherwise the driver's commit error.
    pub async fn commit(&mut self) -> &mut Self {
        if let Err(err) = self.end_tx(true).await {
            self.add_error(err);
        }
        self
    }

    /// Rolling back a transaction that already finished is not an error.
    pub async fn rollback(&mut self) -> &mut Self {
        if let Err(err) = self.end_tx(false).await {
            self.add_error(err);
        }
        self
    }

    async fn end_tx(&self, commit: bool) -> Result<(), DbError> {
        let tx = self.conn.tx().cloned().ok_or(DbError::InvalidTransaction)?;
        let res = if commit {
            tx.commit().await
        } else {
            tx.rollback().await
        };
        match res {
            Err(DbError::TxDone) if commit => Err(DbError::InvalidTransaction),
            Err(DbError::TxDone) => Ok(()),
            other => other,
        }
    }

    /// Transactions begin from a clone without the caller's earlier errors,
    /// so the error slot afterwards only reflects the begin itself.
    fn tx_base(&self) -> Db {
        let mut base = self.clone();
        base.error = None;
        base
    }

    /// Cleanup form of [`Db::rollback`], safe to call after a commit.
    pub async fn rollback_unless_committed(&mut self) -> &mut Self {
        self.rollback().await
    }

    /// Run `body` in a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// A panicking body is rolled back and the panic continues on the caller.
    ///
    /// # Errors
    /// The begin error, the body's error, or the commit error.
    pub async fn transaction<F, Fut, T>(&self, body: F) -> Result<T, DbError>
    where
        F: FnOnce(Db) -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let mut tx = self.tx_base().begin().await;
        if let Some(err) = tx.error.clone() {
            return Err(err);
        }
        let mut guard = RollbackGuard {
            tx: tx.conn.tx().cloned(),
        };

        let outcome = AssertUnwindSafe(body(tx.clone())).catch_unwind().await;
        let result = match outcome {
            Err(panic) => {
                tx.rollback().await;
                guard.disarm();
                resume_unwind(panic);
            }
            Ok(Err(err)) => {
                tx.rollback().await;
                Err(err)
            }
            Ok(Ok(value)) => match tx.end_tx(true).await {
                Ok(()) => Ok(value),
                Err(err) => {
                    tx.add_error(err.clone());
                    tx.rollback().await;
                    Err(err)
                }
            },
        };
        guard.disarm();
        result
    }

    /// Like [`Db::transaction`], with `ctx` handed to the body and a panic
    /// turned into [`DbError::PanicRecovered`]. See [`Db::close_tx`].
    ///
    /// # Errors
    /// The begin error, the body's error, or the rollback/commit error that
    /// replaced it.
    pub async fn transaction_with_context<F, Fut, T>(
        &self,
        ctx: QueryContext,
        body: F,
    ) -> Result<T, DbError>
    where
        F: FnOnce(QueryContext, Db) -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let mut tx = self.tx_base().with_context(ctx.clone()).begin().await;
        if let Some(err) = tx.error.clone() {
            return Err(err);
        }
        let mut guard = RollbackGuard {
            tx: tx.conn.tx().cloned(),
        };
        let outcome = AssertUnwindSafe(body(ctx.clone(), tx.clone()))
            .catch_unwind()
            .await;
        let result = tx.close_tx(&ctx, outcome).await;
        guard.disarm();
        result
    }

    /// Finish this transaction from the body's outcome.
    ///
    /// A panic becomes `PanicRecovered` and rolls back. When the rollback or
    /// the commit itself fails, both errors are logged and the secondary error
    /// is returned.
    ///
    /// # Errors
    /// See above.
    pub async fn close_tx<T>(
        &mut self,
        ctx: &QueryContext,
        outcome: std::thread::Result<Result<T, DbError>>,
    ) -> Result<T, DbError> {
        let outcome = outcome.unwrap_or_else(|panic| {
            let err = DbError::PanicRecovered(panic_message(panic.as_ref()));
            error!(parent: ctx.span(), error = %err, "panic is captured, then will rollback");
            Err(err)
        });

        match outcome {
            Err(err) => {
                if let Err(rollback_error) = self.end_tx(false).await {
                    error!(
                        parent: ctx.span(),
                        error = %err,
                        rollback_error = %rollback_error,
                        "rollback fail"
                    );
                    self.add_error(rollback_error.clone());
                    return Err(rollback_error);
                }
                Err(err)
            }
            Ok(value) => {
                if let Err(commit_error) = self.end_tx(true).await {
                    error!(parent: ctx.span(), commit_error = %commit_error, "commit fail");
                    self.add_error(commit_error.clone());
                    return Err(commit_error);
                }
                Ok(value)
            }
        }
    }
}
