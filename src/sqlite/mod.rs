//! `SQLite` driver backed by `rusqlite` and a bb8 pool.

pub mod config;
pub mod connection;
pub mod params;
pub mod query;
pub mod transaction;

pub use config::{
    JournalMode, SharedSqliteConnection, SqliteManager, SqliteOptions, SqliteOptionsBuilder,
};
pub use connection::SqliteDriver;
pub use transaction::SqliteTx;
