#![cfg(feature = "sqlite")]

mod common;

use common::{Email, TestResult, User, seed_users, setup_db};
use sql_scope::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chained_builders_do_not_leak_into_each_other() -> TestResult {
    let (db, _dir) = setup_db().await?;
    seed_users(&db, &["alice", "bob", "carol"]).await?;

    let base = db.where_(Condition::sql("age >= ?", vec![RowValues::Int(21)]));
    let narrowed = base.where_(Condition::eq("name", "carol"));
    let widened = base.or(Condition::eq("name", "alice"));

    assert_eq!(db.search().where_conditions().len(), 0);
    assert_eq!(base.search().where_conditions().len(), 1);
    assert_eq!(narrowed.search().where_conditions().len(), 2);

    let mut all = Vec::<User>::new();
    base.find(&mut all).await.into_result()?;
    assert_eq!(all.len(), 2);

    let mut only_carol = Vec::<User>::new();
    narrowed.find(&mut only_carol).await.into_result()?;
    assert_eq!(only_carol.len(), 1);
    assert_eq!(only_carol[0].name, "carol");

    let mut everyone = Vec::<User>::new();
    widened.find(&mut everyone).await.into_result()?;
    assert_eq!(everyone.len(), 3);

    // base is untouched after its descendants ran
    let mut again = Vec::<User>::new();
    base.find(&mut again).await.into_result()?;
    assert_eq!(again.len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_last_and_take_follow_the_primary_key() -> TestResult {
    let (db, _dir) = setup_db().await?;
    seed_users(&db, &["one", "two", "three"]).await?;

    let mut first = User::default();
    db.first(&mut first).await.into_result()?;
    assert_eq!(first.id, 1);
    assert_eq!(first.name, "one");

    let mut last = User::default();
    db.last(&mut last).await.into_result()?;
    assert_eq!(last.id, 3);

    let mut taken = User::default();
    db.where_(2_i64).take(&mut taken).await.into_result()?;
    assert_eq!(taken.name, "two");

    let mut missing = User::default();
    let res = db.where_(Condition::eq("name", "nobody")).first(&mut missing).await;
    assert!(res.record_not_found());
    assert!(matches!(res.error(), Some(DbError::RecordNotFound)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn order_limit_offset_and_not() -> TestResult {
    let (db, _dir) = setup_db().await?;
    seed_users(&db, &["a", "b", "c", "d"]).await?;

    let mut page = Vec::<User>::new();
    db.order("age desc")
        .limit(2_u64)
        .offset(1_u64)
        .find(&mut page)
        .await
        .into_result()?;
    let names: Vec<_> = page.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["c", "b"]);

    let mut rest = Vec::<User>::new();
    db.not(Condition::eq("name", "a"))
        .reorder("id desc")
        .find(&mut rest)
        .await
        .into_result()?;
    let names: Vec<_> = rest.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["d", "c", "b"]);

    // None resets the limit
    let mut unlimited = Vec::<User>::new();
    db.limit(1_u64).limit(None::<u64>).find(&mut unlimited).await.into_result()?;
    assert_eq!(unlimited.len(), 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn count_pluck_and_group() -> TestResult {
    let (db, _dir) = setup_db().await?;
    seed_users(&db, &["x", "y", "z"]).await?;
    db.table("users")
        .where_(Condition::eq("name", "z"))
        .update_column("age", 20_i64)
        .await
        .into_result()?;

    let mut count = 0_i64;
    db.model(&User::default())
        .where_(Condition::sql("age > ?", vec![RowValues::Int(20)]))
        .count(&mut count)
        .await
        .into_result()?;
    assert_eq!(count, 1);

    let mut names = Vec::new();
    db.table("users")
        .order("name")
        .pluck("name", &mut names)
        .await
        .into_result()?;
    assert_eq!(
        names,
        vec![
            RowValues::Text("x".into()),
            RowValues::Text("y".into()),
            RowValues::Text("z".into())
        ]
    );

    let mut groups = 0_i64;
    db.table("users")
        .select("age")
        .group("age")
        .count(&mut groups)
        .await
        .into_result()?;
    assert_eq!(groups, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preload_and_related_attach_children() -> TestResult {
    let (db, _dir) = setup_db().await?;
    let users = seed_users(&db, &["owner", "other"]).await?;
    for address in ["a@example.com", "b@example.com"] {
        let mut email = Email {
            user_id: users[0].id,
            address: address.to_string(),
            ..Email::default()
        };
        db.create(&mut email).await.into_result()?;
    }

    let mut loaded = Vec::<User>::new();
    db.preload("Emails", Vec::new())
        .order("id")
        .find(&mut loaded)
        .await
        .into_result()?;
    assert_eq!(loaded[0].emails.len(), 2);
    assert!(loaded[1].emails.is_empty());

    let mut filtered = User::default();
    db.preload("Emails", vec![Condition::eq("address", "b@example.com")])
        .first(&mut filtered)
        .await
        .into_result()?;
    assert_eq!(filtered.emails.len(), 1);

    let mut related = Vec::<Email>::new();
    db.model(&users[0])
        .related(&mut related, None)
        .await
        .into_result()?;
    assert_eq!(related.len(), 2);

    let res = db.preload("Nope", Vec::new()).first(&mut User::default()).await;
    assert!(res.error().is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_scan_and_rows() -> TestResult {
    let (db, _dir) = setup_db().await?;
    seed_users(&db, &["r1", "r2"]).await?;

    let mut scanned = Vec::<User>::new();
    db.raw(
        "SELECT * FROM users WHERE name = ?",
        vec![RowValues::Text("r2".into())],
    )
    .scan(&mut scanned)
    .await
    .into_result()?;
    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].name, "r2");

    let rows = db
        .table("users")
        .select("name, age")
        .order("id")
        .rows()
        .await?;
    assert_eq!(rows.results.len(), 2);
    assert_eq!(
        rows.results[0].get("name"),
        Some(&RowValues::Text("r1".into()))
    );
    assert!(db.has_table("users").await?);
    assert!(!db.has_table("missing").await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn settings_are_copied_with_the_builder() -> TestResult {
    let (db, _dir) = setup_db().await?;
    let tagged = db.set("app:tenant", 7_i64);
    assert_eq!(tagged.get::<i64>("app:tenant"), Some(7));
    assert_eq!(db.get::<i64>("app:tenant"), None);

    tagged.instant_set("app:tenant", 8_i64);
    assert_eq!(tagged.get::<i64>("app:tenant"), Some(8));
    assert_eq!(db.get::<i64>("app:tenant"), None);
    Ok(())
}
