#![cfg(feature = "sqlite")]

mod common;

use std::sync::{Arc, Mutex};

use common::{CapturingLogger, TestResult, User, seed_users, setup_db, user};
use futures_util::future::BoxFuture;
use sql_scope::prelude::*;

const TRACE: &str = "test:trace";

type Trace = Arc<Mutex<Vec<&'static str>>>;

fn record(scope: &Scope, step: &'static str) {
    if let Some(trace) = scope.get::<Trace>(TRACE) {
        trace.lock().unwrap().push(step);
    }
}

fn trace_a(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move { record(scope, "A") })
}

fn trace_b(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move { record(scope, "B") })
}

fn trace_b2(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move { record(scope, "B2") })
}

fn trace_c(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move { record(scope, "C") })
}

fn two_errors(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        scope.err(DbError::Other("first".into()));
        scope.err(DbError::Other("second".into()));
        scope.err(DbError::Other("first".into()));
    })
}

fn explode(_scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move { panic!("hook exploded") })
}

fn stop_here(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move { scope.skip_left() })
}

fn position(names: &[&str], name: &str) -> usize {
    names.iter().position(|n| *n == name).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hooks_run_in_registration_constraint_order() -> TestResult {
    let (db, _dir) = setup_db().await?;
    seed_users(&db, &["traced"]).await?;

    db.callback().query().register("trace:a", trace_a);
    db.callback().query().after("trace:a").register("trace:b", trace_b);
    db.callback().query().before("trace:a").register("trace:c", trace_c);

    let snapshot = db.callback().snapshot();
    let names = snapshot.names(OperationKind::Query);
    assert!(position(&names, "trace:c") < position(&names, "trace:a"));
    assert!(position(&names, "trace:a") < position(&names, "trace:b"));

    let trace: Trace = Arc::default();
    let traced = db.set(TRACE, Arc::clone(&trace));
    traced.first(&mut User::default()).await.into_result()?;
    assert_eq!(*trace.lock().unwrap(), ["C", "A", "B"]);

    db.callback().query().replace("trace:b", trace_b2);
    db.callback().query().remove("trace:c");
    trace.lock().unwrap().clear();
    traced.first(&mut User::default()).await.into_result()?;
    assert_eq!(*trace.lock().unwrap(), ["A", "B2"]);
    assert!(db.callback().query().get("trace:c").is_none());
    assert!(db.callback().query().get("trace:a").is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn default_pipelines_are_wired_in_order() -> TestResult {
    let (db, _dir) = setup_db().await?;
    let snapshot = db.callback().snapshot();
    assert_eq!(
        snapshot.names(OperationKind::Create),
        [
            "begin_transaction",
            "before_create",
            "update_time_stamp",
            "create",
            "after_create",
            "commit_or_rollback_transaction"
        ]
    );
    assert_eq!(
        snapshot.names(OperationKind::Query),
        ["query", "preload", "after_query"]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn distinct_errors_aggregate_on_the_builder() -> TestResult {
    let (db, _dir) = setup_db().await?;
    db.callback()
        .create()
        .before("create")
        .register("validate", two_errors);

    let res = db.create(&mut user("never", 1)).await;
    let errors = res.get_errors();
    assert_eq!(errors.len(), 2);
    assert!(matches!(res.error(), Some(DbError::Multi(_))));
    assert_eq!(
        res.error().unwrap().to_string(),
        "Other database error: first; Other database error: second"
    );

    db.callback().create().remove("validate");
    let mut count = 0_i64;
    db.table("users").count(&mut count).await.into_result()?;
    assert_eq!(count, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn skip_left_ends_the_pipeline_and_closes_its_transaction() -> TestResult {
    let (db, _dir) = setup_db().await?;
    db.callback()
        .create()
        .before("create")
        .register("stop_here", stop_here);

    let mut skipped = user("skipped", 1);
    let res = db.create(&mut skipped).await;
    assert!(res.error().is_none());
    assert_eq!(skipped.id, 0);

    db.callback().create().remove("stop_here");
    db.create(&mut user("written", 2)).await.into_result()?;
    let mut count = 0_i64;
    db.table("users").count(&mut count).await.into_result()?;
    assert_eq!(count, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_hook_rolls_back_its_transaction() -> TestResult {
    let (db, _dir) = setup_db().await?;
    db.callback()
        .create()
        .after("create")
        .register("explode", explode);

    let inner = db.clone();
    let joined = tokio::spawn(async move {
        let mut doomed = user("doomed", 1);
        inner.create(&mut doomed).await.error().cloned()
    })
    .await;
    assert!(joined.unwrap_err().is_panic());

    db.callback().create().remove("explode");
    db.create(&mut user("survivor", 2)).await.into_result()?;
    let mut names = Vec::new();
    db.table("users").pluck("name", &mut names).await.into_result()?;
    assert_eq!(names, vec![RowValues::from("survivor")]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verbose_mode_logs_statements_and_errors() -> TestResult {
    let (mut db, _dir) = setup_db().await?;
    let logger = CapturingLogger::default();
    db.set_logger(Arc::new(logger.clone()));

    // silent builders print nothing
    let _ = db.exec("SELECT * FROM missing_table", Vec::new()).await;
    assert!(logger.entries.lock().unwrap().is_empty());

    let verbose = db.debug();
    verbose.first(&mut User::default()).await;
    let statements = logger.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("SELECT * FROM \"users\""));
    assert!(logger.errors().is_empty());

    let _ = verbose.exec("SELECT * FROM missing_table", Vec::new()).await;
    let errors = logger.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("missing_table"));
    Ok(())
}
