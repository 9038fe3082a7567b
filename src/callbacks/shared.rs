use futures_util::future::BoxFuture;

use crate::error::DbError;
use crate::model::ModelHook;
use crate::scope::Scope;

pub(super) fn begin_transaction(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(scope.begin())
}

pub(super) fn commit_or_rollback_transaction(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(scope.commit_or_rollback())
}

/// Run model lifecycle hooks on every record, stopping at the first error.
pub(super) fn call_model_hooks(scope: &mut Scope, hooks: &[ModelHook]) {
    for hook in hooks {
        if scope.has_error() {
            return;
        }
        let res = match scope.value_mut() {
            Some(target) => target
                .records_mut()
                .into_iter()
                .try_for_each(|record| record.hook(*hook)),
            None => Ok(()),
        };
        scope.check(res);
    }
}

/// Reject an unconditioned UPDATE or DELETE when the builder blocks global writes.
pub(super) fn block_global_write(scope: &mut Scope, action: &'static str) -> bool {
    if scope.db().blocks_global_update() && !scope.has_conditions() {
        scope.err(DbError::MissingWhereClause(action));
        return true;
    }
    false
}

/// Caller-supplied statement suffix stored under `key`, e.g. `ON CONFLICT DO NOTHING`.
pub(super) fn extra_option(scope: &Scope, key: &str) -> String {
    scope
        .get::<String>(key)
        .map(with_space)
        .unwrap_or_default()
}

pub(super) fn with_space(sql: String) -> String {
    if sql.is_empty() { sql } else { format!(" {sql}") }
}
