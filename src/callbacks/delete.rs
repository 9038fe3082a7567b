use futures_util::future::BoxFuture;

use super::shared::{
    begin_transaction, block_global_write, call_model_hooks, commit_or_rollback_transaction,
    extra_option, with_space,
};
use super::{Callbacks, OperationKind};
use crate::model::ModelHook;
use crate::scope::{Scope, keys};
use crate::types::RowValues;

pub(super) fn register_defaults(callbacks: &mut Callbacks) {
    let kind = OperationKind::Delete;
    callbacks.register_fn(kind, "begin_transaction", begin_transaction);
    callbacks.register_fn(kind, "before_delete", before_delete);
    callbacks.register_fn(kind, "delete", delete);
    callbacks.register_fn(kind, "after_delete", after_delete);
    callbacks.register_fn(
        kind,
        "commit_or_rollback_transaction",
        commit_or_rollback_transaction,
    );
}

fn before_delete(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if block_global_write(scope, "deleting") {
            return;
        }
        call_model_hooks(scope, &[ModelHook::BeforeDelete]);
    })
}

/// Soft delete through `deleted_at` unless the builder is unscoped.
fn delete(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if scope.has_error() {
            return;
        }
        scope.reset_sql();

        let soft = !scope.search().is_unscoped()
            && scope.model_struct().is_some_and(|ms| ms.deleted_at.is_some());
        let table = scope.quoted_table_name();
        let option = extra_option(scope, keys::DELETE_OPTION);
        let sql = if soft {
            let now = RowValues::Timestamp(scope.db().now());
            let column = scope.quote("deleted_at");
            let var = scope.add_to_vars(now);
            let where_sql = scope.where_sql();
            format!("UPDATE {table} SET {column}={var}{}{option}", with_space(where_sql))
        } else {
            let where_sql = scope.where_sql();
            format!("DELETE FROM {table}{}{option}", with_space(where_sql))
        };
        scope.raw(sql);
        scope.exec().await;
    })
}

fn after_delete(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        call_model_hooks(scope, &[ModelHook::AfterDelete]);
    })
}
