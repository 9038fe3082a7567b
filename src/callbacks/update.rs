use futures_util::future::BoxFuture;

use super::shared::{
    begin_transaction, block_global_write, call_model_hooks, commit_or_rollback_transaction,
    extra_option, with_space,
};
use super::{Callbacks, OperationKind};
use crate::model::ModelHook;
use crate::scope::{Scope, keys};
use crate::search::Attrs;
use crate::types::RowValues;

pub(super) fn register_defaults(callbacks: &mut Callbacks) {
    let kind = OperationKind::Update;
    callbacks.register_fn(kind, "assign_updating_attributes", assign_updating_attributes);
    callbacks.register_fn(kind, "begin_transaction", begin_transaction);
    callbacks.register_fn(kind, "before_update", before_update);
    callbacks.register_fn(kind, "update_time_stamp", update_time_stamp);
    callbacks.register_fn(kind, "update", update);
    callbacks.register_fn(kind, "after_update", after_update);
    callbacks.register_fn(
        kind,
        "commit_or_rollback_transaction",
        commit_or_rollback_transaction,
    );
}

/// Turn the requested attributes into the column set to write; nothing to
/// write stops the pipeline before a transaction is opened.
fn assign_updating_attributes(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let Some(attrs) = scope.instance_get::<Attrs>(keys::UPDATE_INTERFACE) else {
            return;
        };
        match scope.updated_attrs_with_values(attrs) {
            Some(updates) => scope.instance_set(keys::UPDATE_ATTRS, updates),
            None => scope.skip_left(),
        }
    })
}

fn before_update(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if block_global_write(scope, "updating") {
            return;
        }
        if !scope.instance_has(keys::UPDATE_COLUMN) {
            call_model_hooks(scope, &[ModelHook::BeforeSave, ModelHook::BeforeUpdate]);
        }
    })
}

fn update_time_stamp(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if scope.has_error() || scope.instance_has(keys::UPDATE_COLUMN) {
            return;
        }
        let now = RowValues::Timestamp(scope.db().now());
        let res = scope.set_column("updated_at", &now);
        scope.check(res);
    })
}

fn update(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if scope.has_error() {
            return;
        }
        scope.reset_sql();

        let mut sets = Vec::new();
        if let Some(attrs) = scope.instance_get::<Attrs>(keys::UPDATE_ATTRS) {
            for (column, value) in attrs {
                let var = scope.add_to_vars(value);
                sets.push(format!("{} = {var}", scope.quote(&column)));
            }
        } else if let Some(ms) = scope.model_struct()
            && scope.value().is_some_and(|v| !v.is_collection())
            && let Some(values) = scope.record_values(0)
        {
            for (pos, (column, value)) in ms.schema.columns.iter().zip(values).enumerate() {
                let is_key = Some(pos) == ms.primary_index;
                let blank_created = Some(pos) == ms.created_at && value.is_zero();
                if is_key || blank_created || !scope.changeable_column(column) {
                    continue;
                }
                let var = scope.add_to_vars(value);
                sets.push(format!("{} = {var}", scope.quote(column)));
            }
        }
        if sets.is_empty() {
            return;
        }

        let where_sql = scope.where_sql();
        let sql = format!(
            "UPDATE {} SET {}{}{}",
            scope.quoted_table_name(),
            sets.join(", "),
            with_space(where_sql),
            extra_option(scope, keys::UPDATE_OPTION)
        );
        scope.raw(sql);
        scope.exec().await;
    })
}

fn after_update(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if !scope.instance_has(keys::UPDATE_COLUMN) {
            call_model_hooks(scope, &[ModelHook::AfterUpdate, ModelHook::AfterSave]);
        }
    })
}
