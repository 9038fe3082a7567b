#![cfg(feature = "sqlite")]

mod common;

use std::sync::{Arc, Mutex};

use common::{TestResult, User, open_with_tables, seed_users, user};
use sql_scope::observe::Completion;
use sql_scope::prelude::*;

/// Primary and replica files that hold different rows, so a read shows where it went.
async fn split_pair() -> Result<(Db, tempfile::TempDir), DbError> {
    common::init_tracing();
    let dir = tempfile::tempdir().map_err(|e| DbError::Other(e.to_string()))?;
    let primary = dir.path().join("primary.db").to_string_lossy().into_owned();
    let replica = dir.path().join("replica.db").to_string_lossy().into_owned();

    let primary_only = open_with_tables(&primary).await?;
    seed_users(&primary_only, &["from-primary"]).await?;
    let replica_only = open_with_tables(&replica).await?;
    seed_users(&replica_only, &["from-replica"]).await?;

    let db = DatabaseConfigBuilder::new("sqlite", &primary)
        .replica(&replica)
        .log_mode(LogMode::Silent)
        .build()
        .await?;
    Ok((db, dir))
}

async fn first_name(db: &Db) -> Result<String, DbError> {
    let mut found = User::default();
    db.first(&mut found).await.into_result()?;
    Ok(found.name)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_use_the_replica_and_writes_the_primary() -> TestResult {
    let (db, _dir) = split_pair().await?;
    assert_eq!(first_name(&db).await?, "from-replica");
    assert_eq!(first_name(&db.master()).await?, "from-primary");

    let mut written = user("written", 1);
    db.create(&mut written).await.into_result()?;
    let mut names = Vec::new();
    db.master()
        .table("users")
        .order("id")
        .pluck("name", &mut names)
        .await
        .into_result()?;
    assert_eq!(names.len(), 2);
    assert_eq!(names[1], RowValues::from("written"));

    let mut on_replica = 0_i64;
    db.table("users").count(&mut on_replica).await.into_result()?;
    assert_eq!(on_replica, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn master_sticks_to_derived_builders() -> TestResult {
    let (db, _dir) = split_pair().await?;
    let pinned = db.master();
    let derived = pinned.where_(Condition::sql("id > ?", vec![RowValues::Int(0)]));
    assert!(derived.common_db().replica().is_none());
    assert_eq!(first_name(&derived).await?, "from-primary");
    // the original keeps its replica
    assert!(db.common_db().replica().is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_inside_a_transaction_see_the_primary() -> TestResult {
    let (db, _dir) = split_pair().await?;
    let mut tx = db.begin().await;
    assert!(tx.error().is_none());
    assert!(tx.common_db().in_transaction());
    assert_eq!(first_name(&tx).await?, "from-primary");

    let mut pending = user("pending", 2);
    tx.create(&mut pending).await.into_result()?;
    let mut seen = 0_i64;
    tx.table("users").count(&mut seen).await.into_result()?;
    assert_eq!(seen, 2);

    tx.rollback().await;
    assert!(tx.error().is_none());
    let mut after = 0_i64;
    db.master().table("users").count(&mut after).await.into_result()?;
    assert_eq!(after, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_context_stops_statements() -> TestResult {
    let (db, _dir) = split_pair().await?;
    let ctx = QueryContext::new();
    let bound = db.with_context(ctx.clone());
    assert!(bound.common_db().source().contains("test03_routing.rs"));
    assert_eq!(first_name(&bound).await?, "from-replica");

    ctx.cancel();
    let res = bound.first(&mut User::default()).await;
    assert!(matches!(res.error(), Some(DbError::Cancelled)));

    let begun = bound.begin().await;
    assert!(begun.error().is_some());
    Ok(())
}

#[derive(Debug, Default, Clone)]
struct RecordingObserver {
    seen: Arc<Mutex<Vec<(String, String, bool)>>>,
}

impl QueryObserver for RecordingObserver {
    fn begin(
        &self,
        _ctx: Option<&QueryContext>,
        operation: &'static str,
        sql: &str,
        _source: &str,
    ) -> Completion {
        let seen = Arc::clone(&self.seen);
        let sql = sql.to_string();
        Box::new(move |err, _rows| {
            seen.lock()
                .unwrap()
                .push((operation.to_string(), sql, err.is_some()));
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn observer_sees_every_statement_with_bound_values() -> TestResult {
    let (mut db, _dir) = split_pair().await?;
    let observer = RecordingObserver::default();
    db.set_observer(Some(Arc::new(observer.clone())));

    db.where_(Condition::eq("name", "from-replica"))
        .first(&mut User::default())
        .await
        .into_result()?;
    let res = db.exec("SELECT * FROM missing_table", Vec::new()).await;
    assert!(res.error().is_some());

    let seen = observer.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "query");
    assert!(seen[0].1.contains("'from-replica'"));
    assert!(!seen[0].2);
    assert_eq!(seen[1].0, "exec");
    assert!(seen[1].2);
    Ok(())
}
