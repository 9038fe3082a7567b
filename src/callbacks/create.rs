use futures_util::future::BoxFuture;

use super::shared::{
    begin_transaction, call_model_hooks, commit_or_rollback_transaction, extra_option,
};
use super::{Callbacks, OperationKind};
use crate::error::DbError;
use crate::model::{ModelHook, ModelStruct};
use crate::scope::{Scope, keys};
use crate::types::RowValues;

pub(super) fn register_defaults(callbacks: &mut Callbacks) {
    let kind = OperationKind::Create;
    callbacks.register_fn(kind, "begin_transaction", begin_transaction);
    callbacks.register_fn(kind, "before_create", before_create);
    callbacks.register_fn(kind, "update_time_stamp", update_time_stamp);
    callbacks.register_fn(kind, "create", create);
    callbacks.register_fn(kind, "after_create", after_create);
    callbacks.register_fn(
        kind,
        "commit_or_rollback_transaction",
        commit_or_rollback_transaction,
    );
}

fn before_create(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        call_model_hooks(scope, &[ModelHook::BeforeSave, ModelHook::BeforeCreate]);
    })
}

/// Fill blank `created_at` / `updated_at` columns.
fn update_time_stamp(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if scope.has_error() {
            return;
        }
        let Some(ms) = scope.model_struct() else {
            return;
        };
        let now = RowValues::Timestamp(scope.db().now());
        for idx in 0..scope.record_count() {
            let Some(values) = scope.record_values(idx) else {
                continue;
            };
            for (position, column) in [(ms.created_at, "created_at"), (ms.updated_at, "updated_at")] {
                let blank = position
                    .and_then(|pos| values.get(pos))
                    .is_some_and(RowValues::is_zero);
                if blank {
                    let res = scope.set_record_value(idx, column, now.clone());
                    scope.check(res);
                }
            }
        }
    })
}

fn create(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if scope.has_error() {
            return;
        }
        let Some(ms) = scope.model_struct() else {
            scope.err(DbError::Other("create needs a model value".into()));
            return;
        };
        let mut inserted = 0;
        for idx in 0..scope.record_count() {
            if scope.has_error() {
                break;
            }
            inserted += insert_record(scope, &ms, idx).await;
        }
        scope.db_mut().rows_affected = inserted;
    })
}

async fn insert_record(scope: &mut Scope, ms: &ModelStruct, idx: usize) -> usize {
    let Some(values) = scope.record_values(idx) else {
        return 0;
    };
    scope.reset_sql();

    let mut columns = Vec::new();
    let mut placeholders = Vec::new();
    let mut blank_key = false;
    for (pos, (column, value)) in ms.schema.columns.iter().zip(values).enumerate() {
        if Some(pos) == ms.primary_index && value.is_zero() {
            blank_key = true;
            continue;
        }
        if !scope.changeable_column(column) {
            continue;
        }
        columns.push(scope.quote(column));
        placeholders.push(scope.add_to_vars(value));
    }

    let table = scope.quoted_table_name();
    let dialect = scope.dialect();
    let option = extra_option(scope, keys::INSERT_OPTION);
    let mut sql = if columns.is_empty() {
        format!("INSERT INTO {table} {}{option}", dialect.default_values_sql())
    } else {
        format!(
            "INSERT INTO {table} ({}) VALUES ({}){option}",
            columns.join(","),
            placeholders.join(",")
        )
    };

    let primary_key = ms.schema.primary_key;
    let returning = dialect.returning_sql(&scope.quote(primary_key));
    match returning.filter(|_| blank_key) {
        Some(returning) => {
            sql = format!("{sql} {returning}");
            scope.raw(sql);
            let Some(rows) = scope.query_rows().await else {
                return 0;
            };
            if let Some(id) = rows.first().and_then(|row| row.get_by_index(0)).cloned() {
                let res = scope.set_record_value(idx, primary_key, id);
                scope.check(res);
            }
            1
        }
        None => {
            scope.raw(sql);
            let Some(outcome) = scope.exec().await else {
                return 0;
            };
            if blank_key && let Some(id) = outcome.last_insert_id {
                let res = scope.set_record_value(idx, primary_key, RowValues::Int(id));
                scope.check(res);
            }
            outcome.rows_affected
        }
    }
}

fn after_create(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        call_model_hooks(scope, &[ModelHook::AfterCreate, ModelHook::AfterSave]);
    })
}
