//! The chainable, copy-on-write builder.
//!
//! Every builder method clones, mutates the clone and hands it back; terminal
//! methods run the hook pipeline for their operation kind and return the
//! resulting builder, whose error slot carries the outcome.

use std::any::Any;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::NaiveDateTime;

use crate::callbacks::{CallbackEditor, Callbacks, OperationKind};
use crate::context::QueryContext;
use crate::dialect::{self, Dialect};
use crate::driver::{Driver, open_driver};
use crate::error::{DbError, Errors};
use crate::logger::{LogEntry, LogMode, Logger, TracingLogger, print_detached};
use crate::model::{ModelRegistry, Target, to_snake_case};
use crate::observe::{QueryObserver, TracingObserver};
use crate::results::ResultSet;
use crate::router::ConnectionContext;
use crate::scope::{Scope, keys};
use crate::search::{Attrs, Condition, Search, into_attrs};
use crate::settings::Settings;
use crate::types::RowValues;

pub type NowFunc = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Process-wide state shared by every builder derived from one `open`.
pub(crate) struct Root {
    pub(crate) dialect: Arc<dyn Dialect>,
    callbacks: Arc<RwLock<Arc<Callbacks>>>,
    singular_table: AtomicBool,
    pub(crate) models: ModelRegistry,
    primary: Arc<dyn Driver>,
    replica: Option<Arc<dyn Driver>>,
}

impl Root {
    pub(crate) fn callbacks(&self) -> Arc<Callbacks> {
        match self.callbacks.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub(crate) fn singular_table(&self) -> bool {
        self.singular_table.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct Db {
    pub(crate) root: Arc<Root>,
    pub(crate) value: Option<Box<dyn Target>>,
    pub(crate) error: Option<DbError>,
    pub(crate) rows_affected: usize,
    pub(crate) conn: ConnectionContext,
    pub(crate) search: Search,
    pub(crate) settings: Settings,
    pub(crate) log_mode: LogMode,
    pub(crate) logger: Arc<dyn Logger>,
    block_global_update: bool,
    now_func: Option<NowFunc>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.root.dialect.name())
            .field("value", &self.value)
            .field("error", &self.error)
            .field("rows_affected", &self.rows_affected)
            .field("conn", &self.conn)
            .field("search", &self.search)
            .field("log_mode", &self.log_mode)
            .finish_non_exhaustive()
    }
}

async fn open_and_ping(driver: &str, source: &str) -> Result<Arc<dyn Driver>, DbError> {
    let handle = open_driver(driver, source).await?;
    if let Err(err) = handle.ping().await {
        if let Err(close_err) = handle.close().await {
            tracing::warn!(driver, error = %close_err, "close after failed ping");
        }
        return Err(err);
    }
    Ok(handle)
}

impl Db {
    /// Open `source` with the driver registered as `driver` and ping it.
    ///
    /// # Errors
    /// Unknown driver, connection or ping failures.
    pub async fn open(driver: &str, source: &str) -> Result<Db, DbError> {
        let primary = open_and_ping(driver, source).await?;
        Ok(Self::from_driver(driver, primary, None))
    }

    /// Open a primary and a read replica with the same driver.
    ///
    /// # Errors
    /// Unknown driver, connection or ping failures on either side.
    pub async fn open_with_replica(driver: &str, primary: &str, replica: &str) -> Result<Db, DbError> {
        let primary = open_and_ping(driver, primary).await?;
        let replica = match open_and_ping(driver, replica).await {
            Ok(replica) => replica,
            Err(err) => {
                if let Err(close_err) = primary.close().await {
                    tracing::warn!(driver, error = %close_err, "close primary after replica failure");
                }
                return Err(err);
            }
        };
        Ok(Self::from_driver(driver, primary, Some(replica)))
    }

    /// Root builder over already-connected drivers.
    #[must_use]
    pub fn from_driver(
        dialect_name: &str,
        primary: Arc<dyn Driver>,
        replica: Option<Arc<dyn Driver>>,
    ) -> Db {
        let mut conn = ConnectionContext::new(Arc::clone(&primary), replica.clone());
        conn.set_observer(Some(Arc::new(TracingObserver::default())));
        let root = Root {
            dialect: dialect::for_driver(dialect_name),
            callbacks: Arc::new(RwLock::new(Callbacks::shared_defaults())),
            singular_table: AtomicBool::new(false),
            models: ModelRegistry::default(),
            primary,
            replica,
        };
        Db {
            root: Arc::new(root),
            value: None,
            error: None,
            rows_affected: 0,
            conn,
            search: Search::default(),
            settings: Settings::new(),
            log_mode: LogMode::default(),
            logger: Arc::new(TracingLogger),
            block_global_update: false,
            now_func: None,
        }
    }

    /// Bind a caller context; the call site becomes the diagnostic source label.
    #[track_caller]
    #[must_use]
    pub fn with_context(&self, ctx: QueryContext) -> Db {
        let caller = Location::caller();
        let mut clone = self.clone();
        clone
            .conn
            .bind(ctx, &format!("{}:{}", caller.file(), caller.line()));
        clone
    }

    /// Close the root's primary and replica drivers.
    ///
    /// # Errors
    /// The first close failure.
    pub async fn close(&self) -> Result<(), DbError> {
        let primary = self.root.primary.close().await;
        if let Some(replica) = &self.root.replica {
            replica.close().await?;
        }
        primary
    }

    /// A builder on the same connections with no search state, value or error.
    #[must_use]
    pub fn new_session(&self) -> Db {
        let mut clone = self.clone();
        clone.search = Search::default();
        clone.value = None;
        clone.error = None;
        clone
    }

    /// Force later reads on this builder and its clones onto the primary.
    #[must_use]
    pub fn master(&self) -> Db {
        let mut clone = self.clone();
        clone.conn.use_master();
        clone
    }

    /// The connection context statements run through.
    #[must_use]
    pub fn common_db(&self) -> &ConnectionContext {
        &self.conn
    }

    #[must_use]
    pub fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.root.dialect)
    }

    /// Editor for this root's hook registry.
    #[must_use]
    pub fn callback(&self) -> CallbackEditor {
        CallbackEditor::new(Arc::clone(&self.root.callbacks))
    }

    pub fn set_logger(&mut self, logger: Arc<dyn Logger>) -> &mut Self {
        self.logger = logger;
        self
    }

    pub fn log_mode(&mut self, mode: LogMode) -> &mut Self {
        self.log_mode = mode;
        self
    }

    /// Verbose clone.
    #[must_use]
    pub fn debug(&self) -> Db {
        let mut clone = self.clone();
        clone.log_mode = LogMode::Verbose;
        clone
    }

    /// Switch table naming for every builder of this root.
    pub fn singular_table(&self, enable: bool) {
        self.root.singular_table.store(enable, Ordering::Relaxed);
    }

    pub fn block_global_update(&mut self, enable: bool) -> &mut Self {
        self.block_global_update = enable;
        self
    }

    #[must_use]
    pub fn blocks_global_update(&self) -> bool {
        self.block_global_update
    }

    pub fn set_now_func<F>(&mut self, now: F) -> &mut Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.now_func = Some(Arc::new(now));
        self
    }

    pub(crate) fn now(&self) -> NaiveDateTime {
        match &self.now_func {
            Some(now) => now(),
            None => chrono::Utc::now().naive_utc(),
        }
    }

    /// Replace the statement observer; `None` disables observation.
    pub fn set_observer(&mut self, observer: Option<Arc<dyn QueryObserver>>) -> &mut Self {
        self.conn.set_observer(observer);
        self
    }

    fn derive(&self, apply: impl FnOnce(&mut Db)) -> Db {
        let mut clone = self.clone();
        apply(&mut clone);
        clone
    }

    #[must_use]
    pub fn where_(&self, cond: impl Into<Condition>) -> Db {
        self.derive(|db| db.search.where_(cond.into()))
    }

    #[must_use]
    pub fn or(&self, cond: impl Into<Condition>) -> Db {
        self.derive(|db| db.search.or(cond.into()))
    }

    #[must_use]
    pub fn not(&self, cond: impl Into<Condition>) -> Db {
        self.derive(|db| db.search.not(cond.into()))
    }

    /// `None` resets to unset.
    #[must_use]
    pub fn limit(&self, limit: impl Into<Option<u64>>) -> Db {
        self.derive(|db| db.search.limit = limit.into())
    }

    /// `None` resets to unset.
    #[must_use]
    pub fn offset(&self, offset: impl Into<Option<u64>>) -> Db {
        self.derive(|db| db.search.offset = offset.into())
    }

    #[must_use]
    pub fn order(&self, value: &str) -> Db {
        self.derive(|db| db.search.order(value.to_string(), false))
    }

    /// Replace any earlier ordering.
    #[must_use]
    pub fn reorder(&self, value: &str) -> Db {
        self.derive(|db| db.search.order(value.to_string(), true))
    }

    #[must_use]
    pub fn select(&self, query: impl Into<Condition>) -> Db {
        self.derive(|db| db.search.select = Some(query.into()))
    }

    #[must_use]
    pub fn omit(&self, columns: &[&str]) -> Db {
        self.derive(|db| {
            db.search.omits = columns.iter().map(ToString::to_string).collect();
        })
    }

    #[must_use]
    pub fn group(&self, query: &str) -> Db {
        self.derive(|db| db.search.group = Some(query.to_string()))
    }

    #[must_use]
    pub fn having(&self, cond: impl Into<Condition>) -> Db {
        self.derive(|db| db.search.having_conditions.push(cond.into()))
    }

    #[must_use]
    pub fn joins(&self, query: &str, args: Vec<RowValues>) -> Db {
        self.derive(|db| db.search.join_conditions.push(Condition::sql(query, args)))
    }

    #[must_use]
    pub fn preload(&self, relation: &str, conditions: Vec<Condition>) -> Db {
        self.derive(|db| db.search.preload(relation.to_string(), conditions))
    }

    /// Include soft-deleted rows and delete for real.
    #[must_use]
    pub fn unscoped(&self) -> Db {
        self.derive(|db| db.search.unscoped = true)
    }

    /// Attach a model value that later update or row calls operate on.
    #[must_use]
    pub fn model<T: Target + Clone>(&self, value: &T) -> Db {
        self.derive(|db| db.value = Some(value.clone_box()))
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Db {
        self.derive(|db| {
            db.search.table_name = Some(name.to_string());
            db.value = None;
        })
    }

    /// Attributes used only when `first_or_init`/`first_or_create` initialize.
    #[must_use]
    pub fn attrs<K, V, I>(&self, attrs: I) -> Db
    where
        K: Into<String>,
        V: Into<RowValues>,
        I: IntoIterator<Item = (K, V)>,
    {
        let attrs = into_attrs(attrs);
        self.derive(|db| crate::search::merge_attrs(&mut db.search.init_attrs, attrs))
    }

    /// Attributes applied whether or not a record was found.
    #[must_use]
    pub fn assign<K, V, I>(&self, attrs: I) -> Db
    where
        K: Into<String>,
        V: Into<RowValues>,
        I: IntoIterator<Item = (K, V)>,
    {
        let attrs = into_attrs(attrs);
        self.derive(|db| crate::search::merge_attrs(&mut db.search.assign_attrs, attrs))
    }

    /// Run `sql` as the whole query; pair with `scan` or `rows`.
    #[must_use]
    pub fn raw(&self, sql: &str, args: Vec<RowValues>) -> Db {
        self.derive(|db| {
            db.search.raw = true;
            db.search.where_(Condition::sql(sql, args));
        })
    }

    #[must_use]
    pub fn set<T: Any + Send + Sync>(&self, name: &str, value: T) -> Db {
        let clone = self.clone();
        clone.settings.set(name, value);
        clone
    }

    /// Set on this builder without cloning.
    pub fn instant_set<T: Any + Send + Sync>(&self, name: &str, value: T) -> &Self {
        self.settings.set(name, value);
        self
    }

    #[must_use]
    pub fn get<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.settings.get(name)
    }

    #[must_use]
    pub fn search(&self) -> &Search {
        &self.search
    }

    /// The model value carried by this builder.
    #[must_use]
    pub fn value<T: Target>(&self) -> Option<&T> {
        self.value.as_deref().and_then(|v| v.as_any().downcast_ref())
    }

    #[must_use]
    pub fn rows_affected(&self) -> usize {
        self.rows_affected
    }

    fn with_inline(&self, conds: Vec<Condition>) -> Db {
        self.derive(|db| {
            for cond in conds {
                db.search.where_(cond);
            }
        })
    }

    /// Move `out` into a scope, run `kind` and move the result back.
    async fn run_with<T, F>(&self, kind: OperationKind, out: &mut T, prepare: F) -> Db
    where
        T: Target + Default,
        F: FnOnce(&mut Scope),
    {
        let mut scope = Scope::new(self, Some(Box::new(std::mem::take(out))));
        prepare(&mut scope);
        scope.call_callbacks(kind).await;
        finish(scope, out)
    }

    /// Run `kind` against the builder's own model value.
    async fn run_model(&self, kind: OperationKind, prepare: impl FnOnce(&mut Scope)) -> Db {
        let mut scope = Scope::for_model(self);
        prepare(&mut scope);
        scope.call_callbacks(kind).await;
        let (mut db, value, _) = scope.into_db();
        db.value = value;
        db
    }

    async fn run_rows(&self, prepare: impl FnOnce(&mut Scope)) -> (Db, ResultSet) {
        let mut scope = Scope::for_model(self);
        scope.instance_set(keys::QUERY_ROWS, true);
        prepare(&mut scope);
        scope.call_callbacks(OperationKind::Query).await;
        let rows = scope.rows.take().unwrap_or_default();
        let (mut db, value, _) = scope.into_db();
        db.value = value;
        (db, rows)
    }

    pub async fn find<T: Target + Default>(&self, out: &mut T) -> Db {
        self.run_with(OperationKind::Query, out, |_| {}).await
    }

    /// First record by primary key.
    pub async fn first<T: Target + Default>(&self, out: &mut T) -> Db {
        self.run_with(OperationKind::Query, out, |scope| {
            scope.search_mut().limit = Some(1);
            scope.instance_set(keys::ORDER_BY_PRIMARY_KEY, "ASC");
        })
        .await
    }

    /// Last record by primary key.
    pub async fn last<T: Target + Default>(&self, out: &mut T) -> Db {
        self.run_with(OperationKind::Query, out, |scope| {
            scope.search_mut().limit = Some(1);
            scope.instance_set(keys::ORDER_BY_PRIMARY_KEY, "DESC");
        })
        .await
    }

    /// One record, no ordering.
    pub async fn take<T: Target + Default>(&self, out: &mut T) -> Db {
        self.run_with(OperationKind::Query, out, |scope| {
            scope.search_mut().limit = Some(1);
        })
        .await
    }

    /// Load query results into `dest`, using the builder's model for the table.
    pub async fn scan<T: Target + Default>(&self, dest: &mut T) -> Db {
        let mut scope = Scope::for_model(self);
        scope.dest = Some(Box::new(std::mem::take(dest)));
        scope.call_callbacks(OperationKind::Query).await;
        let (mut db, value, loaded) = scope.into_db();
        db.value = value;
        restore(loaded, dest);
        db
    }

    /// Raw result rows of the current query.
    ///
    /// # Errors
    /// Whatever error the query pipeline left on the builder.
    pub async fn rows(&self) -> Result<ResultSet, DbError> {
        let (db, rows) = self.run_rows(|_| {}).await;
        match db.error {
            Some(err) => Err(err),
            None => Ok(rows),
        }
    }

    /// Count matching rows. With `group`, the number of groups.
    pub async fn count(&self, out: &mut i64) -> Db {
        let grouped = self.search.group.is_some();
        let (db, rows) = self
            .run_rows(|scope| {
                let search = scope.search_mut();
                let counting = matches!(
                    &search.select,
                    Some(Condition::Sql { sql, .. }) if sql.trim_start().to_ascii_lowercase().starts_with("count(")
                );
                if !counting {
                    search.select = Some(Condition::from("count(*)"));
                }
                search.ignore_order = true;
            })
            .await;
        if db.error.is_none() {
            *out = if grouped {
                i64::try_from(rows.results.len()).unwrap_or(i64::MAX)
            } else {
                rows.first()
                    .and_then(|row| row.get_by_index(0))
                    .and_then(RowValues::as_int)
                    .copied()
                    .unwrap_or(0)
            };
        }
        db
    }

    /// Values of one column.
    pub async fn pluck(&self, column: &str, out: &mut Vec<RowValues>) -> Db {
        let (db, rows) = self
            .run_rows(|scope| scope.search_mut().select = Some(Condition::from(column)))
            .await;
        if db.error.is_none() {
            *out = rows
                .results
                .iter()
                .filter_map(|row| row.get_by_index(0).cloned())
                .collect();
        }
        db
    }

    /// Load records of `out`'s model whose `foreign_key` holds this builder's
    /// model key. The key defaults to `<model>_id`.
    pub async fn related<T: Target + Default>(&self, out: &mut T, foreign_key: Option<&str>) -> Db {
        let Some(source) = self.value.as_deref() else {
            let mut db = self.clone();
            db.add_error(DbError::Other("related needs a model value".into()));
            return db;
        };
        let ms = self.root.models.get(source);
        let key = ms.primary_index.and_then(|idx| {
            source
                .records()
                .first()
                .and_then(|record| record.values().into_iter().nth(idx))
        });
        let Some(key) = key.filter(|k| !k.is_zero()) else {
            let mut db = self.clone();
            db.add_error(DbError::Other("primary key can't be nil".into()));
            return db;
        };
        let column = foreign_key.map_or_else(
            || format!("{}_id", to_snake_case(ms.schema.name)),
            ToString::to_string,
        );
        self.new_session()
            .where_(Condition::Columns(vec![(column, key)]))
            .find(out)
            .await
    }

    pub async fn create<T: Target + Default>(&self, value: &mut T) -> Db {
        self.run_with(OperationKind::Create, value, |_| {}).await
    }

    /// Insert when the primary key is zero, otherwise update every column.
    ///
    /// An update touching no rows falls back to `first_or_create` on the same
    /// table, which also fires when the matched row is simply absent.
    pub async fn save<T: Target + Default>(&self, value: &mut T) -> Db {
        let mut scope = Scope::new(self, Some(Box::new(std::mem::take(value))));
        if scope.primary_key_zero() {
            scope.call_callbacks(OperationKind::Create).await;
            return finish(scope, value);
        }
        let table = scope.table_name();
        scope.call_callbacks(OperationKind::Update).await;
        let db = finish(scope, value);
        if db.error.is_none() && db.rows_affected == 0 {
            return self
                .new_session()
                .table(&table)
                .first_or_create(value, Vec::new())
                .await;
        }
        db
    }

    /// Update one column of the model value (or the table's matching rows).
    pub async fn update(&self, column: &str, value: impl Into<RowValues>) -> Db {
        self.updates([(column, value.into())]).await
    }

    pub async fn updates<K, V, I>(&self, attrs: I) -> Db
    where
        K: Into<String>,
        V: Into<RowValues>,
        I: IntoIterator<Item = (K, V)>,
    {
        let attrs = into_attrs(attrs);
        self.run_model(OperationKind::Update, |scope| {
            scope.instance_set(keys::UPDATE_INTERFACE, attrs);
        })
        .await
    }

    /// Like [`Db::update`] without model hooks or `updated_at`.
    pub async fn update_column(&self, column: &str, value: impl Into<RowValues>) -> Db {
        self.update_columns([(column, value.into())]).await
    }

    pub async fn update_columns<K, V, I>(&self, attrs: I) -> Db
    where
        K: Into<String>,
        V: Into<RowValues>,
        I: IntoIterator<Item = (K, V)>,
    {
        let attrs = into_attrs(attrs);
        self.run_model(OperationKind::Update, |scope| {
            scope.instance_set(keys::UPDATE_COLUMN, true);
            scope.instance_set(keys::UPDATE_INTERFACE, attrs);
        })
        .await
    }

    /// Delete `value` (by primary key) plus any `where_` conditions.
    pub async fn delete<T: Target + Default>(&self, value: &mut T) -> Db {
        self.run_with(OperationKind::Delete, value, |_| {}).await
    }

    /// Run raw DML directly, bypassing the hook pipeline.
    pub async fn exec(&self, sql: &str, args: Vec<RowValues>) -> Db {
        let mut scope = Scope::new(self, None);
        let bound = scope.bind_fragment(sql, &args);
        scope.raw(bound);
        scope.exec().await;
        scope.into_db().0
    }

    /// Load the first match, or initialize `out` from the conditions and
    /// `attrs`/`assign` without saving.
    pub async fn first_or_init<T: Target + Default>(&self, out: &mut T, conds: Vec<Condition>) -> Db {
        let c = self.clone();
        let seeded = c.with_inline(conds);
        let result = seeded.first(out).await;
        if result.error.is_some() {
            if !result.record_not_found() {
                return result;
            }
            let mut scope = Scope::new(&seeded, Some(Box::new(std::mem::take(out))));
            scope.initialize();
            restore(scope.into_db().1, out);
        } else if !c.search.assign_attrs.is_empty() {
            let mut scope = Scope::new(&c, Some(Box::new(std::mem::take(out))));
            scope.updated_attrs_with_values(c.search.assign_attrs.clone());
            restore(scope.into_db().1, out);
        }
        c
    }

    /// Load the first match, or create one from the conditions and
    /// `attrs`/`assign`. A found record gets `assign` attributes saved.
    pub async fn first_or_create<T: Target + Default>(&self, out: &mut T, conds: Vec<Condition>) -> Db {
        let c = self.clone();
        let seeded = c.with_inline(conds);
        let result = seeded.first(out).await;
        if result.error.is_some() {
            if !result.record_not_found() {
                return result;
            }
            let mut scope = Scope::new(&seeded, Some(Box::new(std::mem::take(out))));
            scope.initialize();
            scope.call_callbacks(OperationKind::Create).await;
            return finish(scope, out);
        }
        if !c.search.assign_attrs.is_empty() {
            let assign: Attrs = c.search.assign_attrs.clone();
            let mut scope = Scope::new(&c, Some(Box::new(std::mem::take(out))));
            scope.instance_set(keys::UPDATE_INTERFACE, assign);
            scope.call_callbacks(OperationKind::Update).await;
            return finish(scope, out);
        }
        c
    }

    /// Whether the dialect sees `table`.
    ///
    /// # Errors
    /// Catalog query failures.
    pub async fn has_table(&self, table: &str) -> Result<bool, DbError> {
        self.root.dialect.has_table(&self.conn, table).await
    }

    /// True when `value`'s primary key is still zero.
    #[must_use]
    pub fn new_record<T: Target>(&self, value: &T) -> bool {
        let ms = self.root.models.get(value);
        ms.primary_index
            .and_then(|idx| {
                value
                    .records()
                    .first()
                    .and_then(|record| record.values().into_iter().nth(idx))
            })
            .is_none_or(|key| key.is_zero())
    }

    #[must_use]
    pub fn error(&self) -> Option<&DbError> {
        self.error.as_ref()
    }

    /// The builder itself on success, its error otherwise.
    ///
    /// # Errors
    /// The builder's error slot.
    pub fn into_result(self) -> Result<Db, DbError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    /// Every error accumulated on this builder.
    #[must_use]
    pub fn get_errors(&self) -> Vec<DbError> {
        match &self.error {
            Some(DbError::Multi(errors)) => errors.iter().cloned().collect(),
            Some(err) => vec![err.clone()],
            None => Vec::new(),
        }
    }

    /// Record `err` in the error slot.
    ///
    /// "Record not found" replaces the slot silently. Anything else is printed
    /// according to the log mode and accumulated; two or more distinct errors
    /// leave an aggregate in the slot.
    pub fn add_error(&mut self, err: DbError) {
        if matches!(err, DbError::RecordNotFound) {
            self.error = Some(err);
            return;
        }
        self.print_error(&err);
        let mut errors = Errors::from(self.get_errors());
        errors.add(err.clone());
        self.error = Some(if errors.len() > 1 {
            DbError::Multi(errors)
        } else {
            err
        });
    }

    fn print_error(&self, err: &DbError) {
        let entry = LogEntry::Error {
            source: self.conn.source().to_string(),
            error: err.clone(),
        };
        match self.log_mode {
            LogMode::Default => print_detached(Arc::clone(&self.logger), entry),
            LogMode::Verbose => self.logger.print(&entry),
            LogMode::Silent => {}
        }
    }

    #[must_use]
    pub fn record_not_found(&self) -> bool {
        self.get_errors().iter().any(DbError::is_record_not_found)
    }
}

fn finish<T: Target>(scope: Scope, out: &mut T) -> Db {
    let (db, value, _) = scope.into_db();
    restore(value, out);
    db
}

fn restore<T: Target>(value: Option<Box<dyn Target>>, out: &mut T) {
    if let Some(value) = value
        && let Ok(value) = value.into_any().downcast::<T>()
    {
        *out = *value;
    }
}
