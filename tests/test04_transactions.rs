#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{TestResult, User, setup_db, user};
use futures_util::future::BoxFuture;
use sql_scope::driver::{Connector, ExecResult, Prepared};
use sql_scope::prelude::*;

async fn user_count(db: &Db) -> Result<i64, DbError> {
    let mut count = 0_i64;
    db.table("users").count(&mut count).await.into_result()?;
    Ok(count)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transaction_commits_on_ok_and_rolls_back_on_err() -> TestResult {
    let (db, _dir) = setup_db().await?;

    let id = db
        .transaction(|tx| async move {
            let mut kept = user("kept", 1);
            tx.create(&mut kept).await.into_result()?;
            Ok::<_, DbError>(kept.id)
        })
        .await?;
    assert_eq!(id, 1);
    assert_eq!(user_count(&db).await?, 1);

    let res: Result<(), DbError> = db
        .transaction(|tx| async move {
            let mut lost = user("lost", 2);
            tx.create(&mut lost).await.into_result()?;
            Err::<(), _>(DbError::Other("stop".into()))
        })
        .await;
    assert!(matches!(res, Err(DbError::Other(msg)) if msg == "stop"));
    assert_eq!(user_count(&db).await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panic_in_transaction_rolls_back_and_resumes() -> TestResult {
    let (db, _dir) = setup_db().await?;

    let inner = db.clone();
    let joined = tokio::spawn(async move {
        inner
            .transaction(|tx| async move {
                let mut doomed = user("doomed", 1);
                tx.create(&mut doomed).await.into_result()?;
                if doomed.id > 0 {
                    panic!("boom");
                }
                Ok::<(), DbError>(())
            })
            .await
    })
    .await;
    let err = joined.unwrap_err();
    assert!(err.is_panic());
    assert_eq!(user_count(&db).await?, 0);

    // the write lock is free again
    db.create(&mut user("after", 2)).await.into_result()?;
    assert_eq!(user_count(&db).await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transaction_with_context_turns_panics_into_errors() -> TestResult {
    let (db, _dir) = setup_db().await?;

    let res: Result<(), DbError> = db
        .transaction_with_context(QueryContext::new(), |_ctx, tx| async move {
            let mut doomed = user("doomed", 1);
            tx.create(&mut doomed).await.into_result()?;
            if doomed.id > 0 {
                panic!("lost in a hook");
            }
            Ok::<(), DbError>(())
        })
        .await;
    assert!(matches!(res, Err(DbError::PanicRecovered(msg)) if msg == "lost in a hook"));
    assert_eq!(user_count(&db).await?, 0);

    let name = db
        .transaction_with_context(QueryContext::new(), |_ctx, tx| async move {
            let mut kept = user("kept", 1);
            tx.create(&mut kept).await.into_result()?;
            Ok::<_, DbError>(kept.name)
        })
        .await?;
    assert_eq!(name, "kept");
    assert_eq!(user_count(&db).await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_context_never_begins() -> TestResult {
    let (db, _dir) = setup_db().await?;
    let ctx = QueryContext::new();
    ctx.cancel();
    let res: Result<(), DbError> = db
        .transaction_with_context(ctx, |_ctx, _tx| async move { Ok::<(), DbError>(()) })
        .await;
    assert!(matches!(res, Err(DbError::CantStartTransaction { .. })));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commit_and_rollback_state_machine() -> TestResult {
    let (db, _dir) = setup_db().await?;

    let mut tx = db.begin().await;
    tx.create(&mut user("committed", 1)).await.into_result()?;
    tx.commit().await;
    assert!(tx.error().is_none());

    // rolling back after a commit is a no-op cleanup
    tx.rollback_unless_committed().await;
    assert!(tx.error().is_none());

    tx.commit().await;
    assert!(matches!(tx.error(), Some(DbError::InvalidTransaction)));
    assert_eq!(user_count(&db).await?, 1);

    let nested = db.begin().await.begin().await;
    assert!(matches!(
        nested.error(),
        Some(DbError::CantStartTransaction { .. })
    ));

    let mut plain = db.clone();
    plain.commit().await;
    assert!(matches!(plain.error(), Some(DbError::InvalidTransaction)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_transaction_releases_its_lock() -> TestResult {
    let (db, _dir) = setup_db().await?;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(200),
        db.transaction(|tx| async move {
            tx.create(&mut user("abandoned", 1)).await.into_result()?;
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<(), DbError>(())
        }),
    )
    .await;
    assert!(abandoned.is_err());

    let mut after = user("after", 2);
    db.create(&mut after).await.into_result()?;
    let mut all = Vec::<User>::new();
    db.find(&mut all).await.into_result()?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "after");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn autocommit_writes_survive_a_concurrent_rollback() -> TestResult {
    let (db, _dir) = setup_db().await?;
    let rounds = 50_i64;
    for round in 0..rounds {
        let mut writers = Vec::new();
        for n in 0..4_i64 {
            let db = db.clone();
            writers.push(tokio::spawn(async move {
                db.exec(
                    "INSERT INTO users (name, age) VALUES (?, ?)",
                    vec![RowValues::from(format!("w{round}-{n}")), RowValues::Int(n)],
                )
                .await
                .error()
                .cloned()
            }));
        }
        let mut tx = db.begin().await;
        tokio::task::yield_now().await;
        tx.rollback().await;
        for writer in writers {
            assert!(writer.await?.is_none());
        }
    }
    assert_eq!(user_count(&db).await?, rounds * 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn earlier_builder_errors_do_not_block_a_transaction() -> TestResult {
    let (db, _dir) = setup_db().await?;
    let mut tainted = db.clone();
    tainted.add_error(DbError::Other("earlier failure".into()));

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let id = tainted
        .transaction(|tx| async move {
            flag.store(true, Ordering::SeqCst);
            let mut kept = user("kept", 1);
            tx.create(&mut kept).await.into_result()?;
            Ok::<_, DbError>(kept.id)
        })
        .await?;
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(id, 1);

    let name = tainted
        .transaction_with_context(QueryContext::new(), |_ctx, tx| async move {
            let mut also = user("also kept", 2);
            tx.create(&mut also).await.into_result()?;
            Ok::<_, DbError>(also.name)
        })
        .await?;
    assert_eq!(name, "also kept");
    assert_eq!(user_count(&db).await?, 2);
    Ok(())
}

/// In-memory driver whose transaction support and outcomes are scripted.
#[derive(Default)]
struct ScriptedDriver {
    no_transactions: bool,
    refuse_commit: bool,
    refuse_rollback: bool,
    rollbacks: Arc<AtomicUsize>,
}

struct ScriptedTx {
    refuse_commit: bool,
    refuse_rollback: bool,
    rollbacks: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for ScriptedDriver {
    async fn execute(&self, _sql: &str, _params: &[RowValues]) -> Result<ExecResult, DbError> {
        Ok(ExecResult::default())
    }

    async fn prepare(&self, sql: &str) -> Result<Prepared, DbError> {
        Ok(Prepared::new(sql))
    }

    async fn query(&self, _sql: &str, _params: &[RowValues]) -> Result<ResultSet, DbError> {
        Ok(ResultSet::default())
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_transactions(&self) -> bool {
        !self.no_transactions
    }

    async fn begin(&self, _opts: TxOptions) -> Result<Box<dyn DriverTx>, DbError> {
        Ok(Box::new(ScriptedTx {
            refuse_commit: self.refuse_commit,
            refuse_rollback: self.refuse_rollback,
            rollbacks: Arc::clone(&self.rollbacks),
        }))
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        Ok(())
    }
}

#[async_trait]
impl Connector for ScriptedTx {
    async fn execute(&self, _sql: &str, _params: &[RowValues]) -> Result<ExecResult, DbError> {
        Ok(ExecResult::default())
    }

    async fn prepare(&self, sql: &str) -> Result<Prepared, DbError> {
        Ok(Prepared::new(sql))
    }

    async fn query(&self, _sql: &str, _params: &[RowValues]) -> Result<ResultSet, DbError> {
        Ok(ResultSet::default())
    }
}

#[async_trait]
impl DriverTx for ScriptedTx {
    async fn commit(&mut self) -> Result<(), DbError> {
        if self.refuse_commit {
            return Err(DbError::ExecutionError("commit refused".into()));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.refuse_rollback {
            return Err(DbError::ExecutionError("rollback refused".into()));
        }
        Ok(())
    }
}

fn scripted(driver: ScriptedDriver) -> Db {
    Db::from_driver("scripted", Arc::new(driver), None)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drivers_without_transactions_cannot_begin() -> TestResult {
    let db = scripted(ScriptedDriver {
        no_transactions: true,
        ..ScriptedDriver::default()
    });
    let begun = db.begin().await;
    assert!(matches!(
        begun.error(),
        Some(DbError::CantStartTransaction { .. })
    ));
    assert!(!begun.common_db().in_transaction());

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let res = db
        .transaction(|_tx| async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), DbError>(())
        })
        .await;
    assert!(matches!(res, Err(DbError::CantStartTransaction { .. })));
    assert!(!ran.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_rollback_replaces_the_body_error() -> TestResult {
    let db = scripted(ScriptedDriver {
        refuse_rollback: true,
        ..ScriptedDriver::default()
    });
    let res: Result<(), DbError> = db
        .transaction_with_context(QueryContext::new(), |_ctx, _tx| async move {
            Err::<(), _>(DbError::Other("body failed".into()))
        })
        .await;
    assert!(matches!(res, Err(DbError::ExecutionError(msg)) if msg == "rollback refused"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_commit_is_returned_after_a_good_body() -> TestResult {
    let db = scripted(ScriptedDriver {
        refuse_commit: true,
        ..ScriptedDriver::default()
    });
    let res = db
        .transaction_with_context(QueryContext::new(), |_ctx, _tx| async move {
            Ok::<_, DbError>(7)
        })
        .await;
    assert!(matches!(res, Err(DbError::ExecutionError(msg)) if msg == "commit refused"));
    Ok(())
}

fn explode(_scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move { panic!("hook exploded") })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hook_panic_still_propagates_when_rollback_fails() -> TestResult {
    let rollbacks = Arc::new(AtomicUsize::new(0));
    let db = scripted(ScriptedDriver {
        refuse_rollback: true,
        rollbacks: Arc::clone(&rollbacks),
        ..ScriptedDriver::default()
    });
    db.callback()
        .create()
        .after("begin_transaction")
        .register("explode", explode);

    let inner = db.clone();
    let joined = tokio::spawn(async move {
        let mut doomed = user("doomed", 1);
        inner.create(&mut doomed).await.error().cloned()
    })
    .await;
    assert!(joined.unwrap_err().is_panic());
    assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
    Ok(())
}
