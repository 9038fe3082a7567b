//! Chainable query builder with copy-on-write chaining, ordered hook
//! pipelines for create/query/update/delete, primary/replica routing and
//! panic-safe transactions.
//!
//! ```rust,no_run
//! use sql_scope::prelude::*;
//!
//! # async fn demo() -> Result<(), DbError> {
//! let db = DatabaseConfigBuilder::new("sqlite", "app.db").build().await?;
//! let adults = db.where_(Condition::sql("age >= ?", vec![RowValues::Int(18)]));
//! let mut count = 0_i64;
//! adults.table("users").count(&mut count).await.into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod config;
pub mod context;
pub mod db;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod logger;
pub mod model;
pub mod observe;
pub mod prelude;
pub mod results;
pub mod router;
pub mod scope;
pub mod search;
pub mod settings;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod transaction;
pub mod types;

pub use callbacks::{CallbackEditor, Callbacks, Hook, OperationKind};
pub use config::{DatabaseConfig, DatabaseConfigBuilder};
pub use context::QueryContext;
pub use db::Db;
pub use error::{DbError, Errors};
pub use logger::{LogEntry, LogMode, Logger};
pub use model::{Model, ModelHook, ModelSchema, Record, Relation, Target};
pub use results::{CustomDbRow, ResultSet};
pub use scope::Scope;
pub use search::Condition;
pub use types::RowValues;
