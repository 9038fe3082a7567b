//! Convenient imports for common functionality.

pub use crate::callbacks::{CallbackEditor, Callbacks, Hook, OperationKind};
pub use crate::config::{DatabaseConfig, DatabaseConfigBuilder};
pub use crate::context::QueryContext;
pub use crate::db::Db;
pub use crate::driver::{Driver, DriverTx, IsolationLevel, TxOptions, register_driver};
pub use crate::error::{DbError, Errors};
pub use crate::logger::{LogEntry, LogMode, Logger};
pub use crate::model::{Model, ModelHook, ModelSchema, Record, Relation, Target};
pub use crate::observe::{QueryObserver, TracingObserver};
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::scope::Scope;
pub use crate::search::Condition;
pub use crate::types::RowValues;

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{JournalMode, SqliteDriver, SqliteOptionsBuilder};
