use futures_util::future::BoxFuture;

use super::shared::extra_option;
use super::{Callbacks, OperationKind};
use crate::error::DbError;
use crate::model::ModelHook;
use crate::results::CustomDbRow;
use crate::scope::{Scope, keys};
use crate::search::Condition;
use crate::types::RowValues;

pub(super) fn register_defaults(callbacks: &mut Callbacks) {
    let kind = OperationKind::Query;
    callbacks.register_fn(kind, "query", query);
    callbacks.register_fn(kind, "preload", preload);
    callbacks.register_fn(kind, "after_query", after_query);
}

fn query(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if scope.has_error() {
            return;
        }
        scope.db_mut().rows_affected = 0;

        if let Some(direction) = scope.instance_get::<&'static str>(keys::ORDER_BY_PRIMARY_KEY)
            && let Some(ms) = scope.model_struct()
            && ms.primary_index.is_some()
        {
            let order = format!(
                "{}.{} {direction}",
                scope.quoted_table_name(),
                scope.quote(ms.schema.primary_key)
            );
            scope.search_mut().order(order, false);
        }

        scope.reset_sql();
        scope.prepare_query_sql();
        let option = extra_option(scope, keys::QUERY_OPTION);
        if !option.is_empty() {
            let sql = format!("{}{option}", scope.sql());
            scope.raw(sql);
        }
        let Some(rows) = scope.query_rows().await else {
            return;
        };

        if scope.instance_has(keys::QUERY_ROWS) {
            scope.db_mut().rows_affected = rows.results.len();
            scope.rows = Some(rows);
            return;
        }

        let loaded = match scope.target_mut() {
            Some(target) => target
                .load(&rows)
                .map(|count| (count, target.is_collection())),
            None => Err(DbError::Other("query has no value to load rows into".into())),
        };
        match loaded {
            Ok((count, collection)) => {
                scope.db_mut().rows_affected = count;
                if count == 0 && !collection {
                    scope.err(DbError::RecordNotFound);
                }
            }
            Err(err) => scope.err(err),
        }
    })
}

/// Has-many / has-one preload: one `IN` query per relation.
fn preload(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if scope.has_error() || scope.instance_has(keys::QUERY_ROWS) {
            return;
        }
        let preloads = scope.search().preload.clone();
        if preloads.is_empty() {
            return;
        }
        let Some(target) = scope.target() else {
            return;
        };
        let ms = scope.model_struct_of(target);
        let Some(pk_index) = ms.primary_index else {
            return;
        };

        for preload in preloads {
            let Some(relation) = ms.relation(&preload.relation).copied() else {
                scope.err(DbError::Other(format!(
                    "can't preload field {} for {}",
                    preload.relation, ms.schema.name
                )));
                return;
            };

            let mut keys: Vec<RowValues> = Vec::new();
            if let Some(target) = scope.target() {
                for record in target.records() {
                    if let Some(key) = record.values().into_iter().nth(pk_index)
                        && !key.is_zero()
                        && !keys.contains(&key)
                    {
                        keys.push(key);
                    }
                }
            }
            if keys.is_empty() {
                continue;
            }

            let placeholders = vec!["?"; keys.len()].join(",");
            let mut related = scope.db().new_session().table(relation.table).where_(
                Condition::sql(
                    format!("{} IN ({placeholders})", scope.quote(relation.foreign_key)),
                    keys,
                ),
            );
            for cond in preload.conditions {
                related = related.where_(cond);
            }
            let rows = match related.rows().await {
                Ok(rows) => rows,
                Err(err) => {
                    scope.err(err);
                    return;
                }
            };

            let attached = match scope.target_mut() {
                Some(target) => target.records_mut().into_iter().try_for_each(|record| {
                    let key = record.values().into_iter().nth(pk_index);
                    let matching: Vec<CustomDbRow> = rows
                        .results
                        .iter()
                        .filter(|row| key.is_some() && row.get(relation.foreign_key) == key.as_ref())
                        .cloned()
                        .collect();
                    record.attach(relation.name, &matching)
                }),
                None => Ok(()),
            };
            scope.check(attached);
        }
    })
}

fn after_query(scope: &mut Scope) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if scope.has_error() || scope.instance_has(keys::QUERY_ROWS) {
            return;
        }
        let res = match scope.target_mut() {
            Some(target) => target
                .records_mut()
                .into_iter()
                .try_for_each(|record| record.hook(ModelHook::AfterFind)),
            None => Ok(()),
        };
        scope.check(res);
    })
}
