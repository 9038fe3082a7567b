//! Per-call execution state handed to every hook.

use std::any::Any;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;

use crate::callbacks::OperationKind;
use crate::db::Db;
use crate::dialect::Dialect;
use crate::driver::ExecResult;
use crate::error::DbError;
use crate::logger::{LogEntry, LogMode};
use crate::model::{ModelStruct, Target};
use crate::results::ResultSet;
use crate::router::Handle;
use crate::search::{Attrs, Condition, Search};
use crate::settings::Settings;
use crate::types::RowValues;

/// Instance setting keys shared between the builder and the default hooks.
pub mod keys {
    pub const ORDER_BY_PRIMARY_KEY: &str = "order_by_primary_key";
    pub const QUERY_ROWS: &str = "query_rows";
    pub const UPDATE_INTERFACE: &str = "update_interface";
    pub const UPDATE_ATTRS: &str = "update_attrs";
    pub const UPDATE_COLUMN: &str = "update_column";
    pub const STARTED_TRANSACTION: &str = "started_transaction";
    pub const INSERT_OPTION: &str = "insert_option";
    pub const UPDATE_OPTION: &str = "update_option";
    pub const DELETE_OPTION: &str = "delete_option";
    pub const QUERY_OPTION: &str = "query_option";
}

pub struct Scope {
    pub(crate) db: Db,
    pub(crate) value: Option<Box<dyn Target>>,
    pub(crate) dest: Option<Box<dyn Target>>,
    pub(crate) rows: Option<ResultSet>,
    instance: Settings,
    sql: String,
    sql_vars: Vec<RowValues>,
    skip_left: bool,
    saved_primary: Option<Option<Handle>>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("value", &self.value)
            .field("sql", &self.sql)
            .field("skip_left", &self.skip_left)
            .finish_non_exhaustive()
    }
}

impl Scope {
    /// Scope over an explicit target; the builder's own model value is dropped.
    pub(crate) fn new(db: &Db, value: Option<Box<dyn Target>>) -> Self {
        let mut db = db.clone();
        db.value = None;
        Self::from_parts(db, value)
    }

    /// Scope over the model value carried by the builder, if any.
    pub(crate) fn for_model(db: &Db) -> Self {
        let mut db = db.clone();
        let value = db.value.take();
        Self::from_parts(db, value)
    }

    fn from_parts(db: Db, value: Option<Box<dyn Target>>) -> Self {
        Self {
            db,
            value,
            dest: None,
            rows: None,
            instance: Settings::new(),
            sql: String::new(),
            sql_vars: Vec::new(),
            skip_left: false,
            saved_primary: None,
        }
    }

    #[must_use]
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut Db {
        &mut self.db
    }

    #[must_use]
    pub fn search(&self) -> &Search {
        &self.db.search
    }

    pub fn search_mut(&mut self) -> &mut Search {
        &mut self.db.search
    }

    #[must_use]
    pub fn value(&self) -> Option<&dyn Target> {
        self.value.as_deref()
    }

    pub fn value_mut(&mut self) -> Option<&mut (dyn Target + 'static)> {
        self.value.as_deref_mut()
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.db.error.is_some()
    }

    /// Record an error on the underlying builder.
    pub fn err(&mut self, err: DbError) {
        self.db.add_error(err);
    }

    /// Record `res`'s error if any, passing the value through.
    pub fn check<T>(&mut self, res: Result<T, DbError>) -> Option<T> {
        match res {
            Ok(value) => Some(value),
            Err(err) => {
                self.err(err);
                None
            }
        }
    }

    /// Stop the pipeline after the running hook.
    pub fn skip_left(&mut self) {
        self.skip_left = true;
    }

    /// Builder-level setting, visible to later hooks and the returned builder.
    pub fn set<T: Any + Send + Sync>(&mut self, name: &str, value: T) {
        self.db.settings.set(name, value);
    }

    #[must_use]
    pub fn get<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.db.settings.get(name)
    }

    /// Setting scoped to this one call.
    pub fn instance_set<T: Any + Send + Sync>(&mut self, name: &str, value: T) {
        self.instance.set(name, value);
    }

    #[must_use]
    pub fn instance_get<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.instance.get(name)
    }

    #[must_use]
    pub fn instance_has(&self, name: &str) -> bool {
        self.instance.contains(name)
    }

    #[must_use]
    pub fn dialect(&self) -> Arc<dyn Dialect> {
        self.db.dialect()
    }

    #[must_use]
    pub fn quote(&self, key: &str) -> String {
        self.db.root.dialect.quote(key)
    }

    pub(crate) fn model_struct_of(&self, target: &dyn Target) -> Arc<ModelStruct> {
        self.db.root.models.get(target)
    }

    /// The value rows are loaded into: an explicit scan destination, else the value.
    #[must_use]
    pub fn target(&self) -> Option<&dyn Target> {
        self.dest.as_deref().or(self.value.as_deref())
    }

    pub fn target_mut(&mut self) -> Option<&mut (dyn Target + 'static)> {
        match self.dest.as_deref_mut() {
            Some(dest) => Some(dest),
            None => self.value.as_deref_mut(),
        }
    }

    #[must_use]
    pub fn model_struct(&self) -> Option<Arc<ModelStruct>> {
        self.value
            .as_deref()
            .or(self.dest.as_deref())
            .map(|v| self.model_struct_of(v))
    }

    #[must_use]
    pub fn table_name(&self) -> String {
        if let Some(table) = &self.db.search.table_name {
            return table.clone();
        }
        self.model_struct()
            .map(|ms| ms.table_name(self.db.root.singular_table()))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn quoted_table_name(&self) -> String {
        let table = self.table_name();
        if table.contains(' ') || table.contains('(') {
            table
        } else {
            self.quote(&table)
        }
    }

    fn primary_key_column(&self) -> String {
        self.model_struct()
            .map_or_else(|| "id".to_string(), |ms| ms.schema.primary_key.to_string())
    }

    /// Primary key of a single-record target.
    #[must_use]
    pub fn primary_key_value(&self) -> Option<RowValues> {
        let value = self.value.as_deref()?;
        if value.is_collection() {
            return None;
        }
        let idx = self.model_struct()?.primary_index?;
        value.records().first()?.values().into_iter().nth(idx)
    }

    #[must_use]
    pub fn primary_key_zero(&self) -> bool {
        self.primary_key_value().is_none_or(|v| v.is_zero())
    }

    pub(crate) fn has_conditions(&self) -> bool {
        !self.primary_key_zero() || self.db.search.has_conditions()
    }

    /// Push a bound value and return its placeholder.
    pub fn add_to_vars(&mut self, value: RowValues) -> String {
        self.sql_vars.push(value);
        self.db.root.dialect.bind_var(self.sql_vars.len())
    }

    /// Replace the statement to run, keeping the bound values gathered so far.
    pub fn raw(&mut self, sql: impl Into<String>) {
        self.sql = sql.into();
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn sql_vars(&self) -> &[RowValues] {
        &self.sql_vars
    }

    pub(crate) fn reset_sql(&mut self) {
        self.sql.clear();
        self.sql_vars.clear();
    }

    pub(crate) fn bind_fragment(&mut self, sql: &str, args: &[RowValues]) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut args = args.iter();
        let mut in_quote = false;
        for c in sql.chars() {
            match c {
                '\'' => {
                    in_quote = !in_quote;
                    out.push(c);
                }
                '?' if !in_quote => match args.next() {
                    Some(arg) => {
                        let var = self.add_to_vars(arg.clone());
                        out.push_str(&var);
                    }
                    None => out.push('?'),
                },
                _ => out.push(c),
            }
        }
        out
    }

    fn column_ref(&self, column: &str) -> String {
        if column.contains('.') || column.contains('(') {
            column.to_string()
        } else {
            format!("{}.{}", self.quoted_table_name(), self.quote(column))
        }
    }

    pub(crate) fn build_condition(&mut self, cond: &Condition, include: bool) -> String {
        match cond {
            Condition::Sql { sql, args } => {
                if sql.trim().is_empty() {
                    return String::new();
                }
                let bound = self.bind_fragment(sql, args);
                if include {
                    format!("({bound})")
                } else {
                    format!("NOT ({bound})")
                }
            }
            Condition::Columns(pairs) => {
                let mut parts = Vec::with_capacity(pairs.len());
                for (column, value) in pairs {
                    let column = self.column_ref(column);
                    let part = match (value.is_null(), include) {
                        (true, true) => format!("({column} IS NULL)"),
                        (true, false) => format!("({column} IS NOT NULL)"),
                        (false, true) => format!("({column} = {})", self.add_to_vars(value.clone())),
                        (false, false) => {
                            format!("({column} <> {})", self.add_to_vars(value.clone()))
                        }
                    };
                    parts.push(part);
                }
                parts.join(" AND ")
            }
            Condition::PrimaryKey(value) => {
                let column = self.column_ref(&self.primary_key_column());
                let var = self.add_to_vars(value.clone());
                if include {
                    format!("({column} = {var})")
                } else {
                    format!("({column} <> {var})")
                }
            }
        }
    }

    pub(crate) fn where_sql(&mut self) -> String {
        let mut primary_conditions = Vec::new();
        let quoted_table = self.quoted_table_name();

        if !self.db.search.unscoped
            && let Some(ms) = self.model_struct()
            && ms.deleted_at.is_some()
        {
            primary_conditions.push(format!("{quoted_table}.{} IS NULL", self.quote("deleted_at")));
        }

        if let Some(pk) = self.primary_key_value().filter(|v| !v.is_zero()) {
            let column = format!("{quoted_table}.{}", self.quote(&self.primary_key_column()));
            let var = self.add_to_vars(pk);
            primary_conditions.push(format!("{column} = {var}"));
        }

        let search = self.db.search.clone();
        let mut and_conditions = Vec::new();
        let mut or_conditions = Vec::new();
        for cond in &search.where_conditions {
            let sql = self.build_condition(cond, true);
            if !sql.is_empty() {
                and_conditions.push(sql);
            }
        }
        for cond in &search.or_conditions {
            let sql = self.build_condition(cond, true);
            if !sql.is_empty() {
                or_conditions.push(sql);
            }
        }
        for cond in &search.not_conditions {
            let sql = self.build_condition(cond, false);
            if !sql.is_empty() {
                and_conditions.push(sql);
            }
        }

        let or_sql = or_conditions.join(" OR ");
        let mut combined = and_conditions.join(" AND ");
        if combined.is_empty() {
            combined = or_sql;
        } else if !or_sql.is_empty() {
            combined = format!("{combined} OR {or_sql}");
        }

        if !primary_conditions.is_empty() {
            let mut sql = format!("WHERE {}", primary_conditions.join(" AND "));
            if !combined.is_empty() {
                sql = format!("{sql} AND ({combined})");
            }
            sql
        } else if !combined.is_empty() {
            format!("WHERE {combined}")
        } else {
            String::new()
        }
    }

    fn select_sql(&mut self) -> String {
        match self.db.search.select.clone() {
            Some(Condition::Sql { sql, args }) => self.bind_fragment(&sql, &args),
            Some(Condition::Columns(pairs)) => pairs
                .iter()
                .map(|(c, _)| self.quote(c))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_string(),
        }
    }

    fn joins_sql(&mut self) -> String {
        let joins = self.db.search.join_conditions.clone();
        joins
            .iter()
            .filter_map(|cond| match cond {
                Condition::Sql { sql, args } => Some(self.bind_fragment(sql, args)),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn group_sql(&self) -> String {
        self.db
            .search
            .group
            .as_ref()
            .map(|group| format!(" GROUP BY {group}"))
            .unwrap_or_default()
    }

    fn having_sql(&mut self) -> String {
        let having = self.db.search.having_conditions.clone();
        let parts: Vec<String> = having
            .iter()
            .map(|cond| self.build_condition(cond, true))
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            String::new()
        } else {
            format!(" HAVING {}", parts.join(" AND "))
        }
    }

    fn order_sql(&self) -> String {
        if self.db.search.orders.is_empty() || self.db.search.ignore_order {
            String::new()
        } else {
            format!(" ORDER BY {}", self.db.search.orders.join(","))
        }
    }

    fn limit_and_offset_sql(&self) -> String {
        self.db
            .root
            .dialect
            .limit_and_offset_sql(self.db.search.limit, self.db.search.offset)
    }

    /// Joins, WHERE, GROUP BY, HAVING, ORDER BY and paging, in that order.
    pub fn combined_condition_sql(&mut self) -> String {
        let joins = self.joins_sql();
        let where_sql = self.where_sql();
        let group = self.group_sql();
        let having = self.having_sql();
        let order = self.order_sql();
        let paging = self.limit_and_offset_sql();
        let head = [joins, where_sql]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        format!("{head}{group}{having}{order}{paging}")
    }

    pub(crate) fn prepare_query_sql(&mut self) {
        if self.db.search.raw {
            let raw = self.db.search.where_conditions.clone();
            let parts: Vec<String> = raw
                .iter()
                .filter_map(|cond| match cond {
                    Condition::Sql { sql, args } => Some(self.bind_fragment(sql, args)),
                    _ => None,
                })
                .collect();
            self.sql = parts.join(" ");
        } else {
            let select = self.select_sql();
            let table = self.quoted_table_name();
            let conditions = self.combined_condition_sql();
            self.sql = if conditions.is_empty() {
                format!("SELECT {select} FROM {table}")
            } else {
                format!("SELECT {select} FROM {table} {conditions}")
            };
        }
    }

    /// Column names the caller restricted writes to with `select`.
    pub(crate) fn selected_attrs(&self) -> Vec<String> {
        match &self.db.search.select {
            Some(Condition::Sql { sql, .. }) => sql
                .split(',')
                .map(|s| s.trim().trim_matches('"').to_string())
                .filter(|s| !s.is_empty() && s != "*")
                .collect(),
            Some(Condition::Columns(pairs)) => pairs.iter().map(|(c, _)| c.clone()).collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn changeable_column(&self, column: &str) -> bool {
        let selected = self.selected_attrs();
        if selected.is_empty() {
            !self.db.search.omits.iter().any(|c| c == column)
        } else {
            selected.iter().any(|c| c == column)
        }
    }

    pub(crate) fn record_count(&self) -> usize {
        self.value.as_deref().map_or(0, |v| v.records().len())
    }

    pub(crate) fn record_values(&self, index: usize) -> Option<Vec<RowValues>> {
        self.value
            .as_deref()
            .and_then(|v| v.records().get(index).map(|r| r.values()))
    }

    pub(crate) fn set_record_value(
        &mut self,
        index: usize,
        column: &str,
        value: RowValues,
    ) -> Result<(), DbError> {
        match self.value.as_deref_mut() {
            Some(target) => match target.records_mut().into_iter().nth(index) {
                Some(record) => record.set_value(column, value),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Apply an attribute update to every record of the target.
    pub(crate) fn set_column(&mut self, column: &str, value: &RowValues) -> Result<(), DbError> {
        let Some(ms) = self.model_struct() else {
            return Ok(());
        };
        if !ms.has_column(column) {
            return Ok(());
        }
        if let Some(target) = self.value.as_deref_mut() {
            for record in target.records_mut() {
                record.set_value(column, value.clone())?;
            }
        }
        if let Some(mut attrs) = self.instance_get::<Attrs>(keys::UPDATE_ATTRS) {
            crate::search::merge_attrs(&mut attrs, vec![(column.to_string(), value.clone())]);
            self.instance_set(keys::UPDATE_ATTRS, attrs);
        }
        Ok(())
    }

    /// Keep the known, changeable columns of `attrs` and write them onto a
    /// single-record value. `None` means nothing is left to update.
    pub(crate) fn updated_attrs_with_values(&mut self, attrs: Attrs) -> Option<Attrs> {
        let single = self.value.as_deref().is_some_and(|v| !v.is_collection());
        let ms = match self.model_struct() {
            Some(ms) if single => ms,
            _ => return Some(attrs),
        };
        let mut results = Attrs::new();
        for (column, value) in attrs {
            if !ms.has_column(&column) || !self.changeable_column(&column) {
                continue;
            }
            let res = self.set_record_value(0, &column, value.clone());
            if self.check(res).is_some() {
                results.push((column, value));
            }
        }
        (!results.is_empty()).then_some(results)
    }

    /// Seed the value from column conditions, then `attrs`, then `assign`.
    pub(crate) fn initialize(&mut self) {
        let search = self.db.search.clone();
        for cond in &search.where_conditions {
            if let Condition::Columns(pairs) = cond {
                self.updated_attrs_with_values(pairs.clone());
            }
        }
        self.updated_attrs_with_values(search.init_attrs);
        self.updated_attrs_with_values(search.assign_attrs);
    }

    fn log_sql(&self, started: Instant, rows: Option<usize>) {
        if self.db.log_mode == LogMode::Verbose {
            self.db.logger.print(&LogEntry::Sql {
                source: self.db.conn.source().to_string(),
                duration: started.elapsed(),
                sql: crate::observe::render_sql(&self.sql, &self.sql_vars),
                rows,
            });
        }
    }

    /// Run the prepared statement as DML, recording rows affected or the error.
    pub async fn exec(&mut self) -> Option<ExecResult> {
        if self.has_error() {
            return None;
        }
        let started = Instant::now();
        let res = self.db.conn.exec(&self.sql, &self.sql_vars).await;
        match res {
            Ok(outcome) => {
                self.log_sql(started, Some(outcome.rows_affected));
                self.db.rows_affected = outcome.rows_affected;
                Some(outcome)
            }
            Err(err) => {
                self.log_sql(started, None);
                self.err(err);
                None
            }
        }
    }

    /// Run the prepared statement as a read through the router.
    pub async fn query_rows(&mut self) -> Option<ResultSet> {
        if self.has_error() {
            return None;
        }
        let started = Instant::now();
        let res = self.db.conn.query(&self.sql, &self.sql_vars).await;
        match res {
            Ok(rows) => {
                self.log_sql(started, Some(rows.results.len()));
                Some(rows)
            }
            Err(err) => {
                self.log_sql(started, None);
                self.err(err);
                None
            }
        }
    }

    /// Start a scope-owned transaction unless one is already open.
    pub async fn begin(&mut self) {
        if self.has_error() || self.db.conn.in_transaction() {
            return;
        }
        let Some(driver) = self.db.conn.primary().and_then(|h| h.as_driver()).cloned() else {
            return;
        };
        if !driver.supports_transactions() {
            return;
        }
        match driver.begin(crate::driver::TxOptions::default()).await {
            Ok(tx) => {
                self.saved_primary = Some(self.db.conn.primary().cloned());
                self.db
                    .conn
                    .set_primary(Some(Handle::Tx(Arc::new(crate::router::TxHandle::new(tx)))));
                self.instance_set(keys::STARTED_TRANSACTION, true);
            }
            Err(err) => self.err(err),
        }
    }

    /// Finish a scope-owned transaction and restore the previous primary.
    pub async fn commit_or_rollback(&mut self) {
        let Some(primary) = self.saved_primary.take() else {
            return;
        };
        if let Some(tx) = self.db.conn.tx().cloned() {
            if self.has_error() {
                if let Err(err) = tx.rollback().await {
                    tracing::warn!(error = %err, "rollback of implicit transaction failed");
                }
            } else {
                match tx.commit().await {
                    Ok(()) | Err(DbError::TxDone) => {}
                    Err(err) => self.err(err),
                }
            }
        }
        self.db.conn.set_primary(primary);
    }

    /// Run the registered hooks for `kind` in order.
    ///
    /// A panicking hook rolls back any open transaction before the panic continues.
    pub(crate) async fn call_callbacks(&mut self, kind: OperationKind) {
        let callbacks = self.db.root.callbacks();
        let outcome = AssertUnwindSafe(async {
            for (_, hook) in callbacks.hooks(kind) {
                hook(self).await;
                if self.skip_left {
                    break;
                }
            }
            // a pipeline cut short must not leave its own transaction open
            if self.saved_primary.is_some() {
                self.commit_or_rollback().await;
            }
        })
        .catch_unwind()
        .await;

        if let Err(panic) = outcome {
            if let Some(tx) = self.db.conn.tx().cloned()
                && let Err(err) = tx.rollback().await
                && !matches!(err, DbError::TxDone)
            {
                tracing::warn!(error = %err, "rollback after hook panic failed");
            }
            if let Some(primary) = self.saved_primary.take() {
                self.db.conn.set_primary(primary);
            }
            resume_unwind(panic);
        }
    }

    /// Hand back the builder; the scope's value becomes the builder's value.
    pub(crate) fn into_db(self) -> (Db, Option<Box<dyn Target>>, Option<Box<dyn Target>>) {
        (self.db, self.value, self.dest)
    }
}
