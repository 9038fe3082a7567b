use std::sync::Arc;
use std::time::Duration;

use bb8::ManageConnection;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::connection::SqliteDriver;
use crate::error::DbError;

pub type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    #[default]
    Wal,
    Memory,
}

impl JournalMode {
    fn as_pragma(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Wal => "WAL",
            JournalMode::Memory => "MEMORY",
        }
    }
}

/// Options for configuring a `SQLite` pool.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub path: String,
    pub pool_size: u32,
    pub busy_timeout: Duration,
    pub journal_mode: JournalMode,
    pub foreign_keys: bool,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(path: String) -> Self {
        Self {
            path,
            pool_size: 4,
            busy_timeout: Duration::from_secs(5),
            journal_mode: JournalMode::Wal,
            foreign_keys: true,
        }
    }

    fn is_memory(&self) -> bool {
        self.path == ":memory:" || self.path.contains("mode=memory")
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            opts: SqliteOptions::new(path.into()),
        }
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.opts.pool_size = pool_size.max(1);
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn journal_mode(mut self, journal_mode: JournalMode) -> Self {
        self.opts.journal_mode = journal_mode;
        self
    }

    #[must_use]
    pub fn foreign_keys(mut self, foreign_keys: bool) -> Self {
        self.opts.foreign_keys = foreign_keys;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build the pooled driver and run a smoke-test checkout.
    ///
    /// # Errors
    /// Returns `DbError` if pool creation or the first connection fails.
    pub async fn build(self) -> Result<SqliteDriver, DbError> {
        SqliteDriver::new(self.finish()).await
    }
}

/// bb8 manager that opens one `rusqlite::Connection` per pool slot.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    options: SqliteOptions,
}

impl SqliteManager {
    #[must_use]
    pub fn new(options: SqliteOptions) -> Self {
        Self { options }
    }

    /// Every connection to a private in-memory database is its own database,
    /// so those pools hold a single connection.
    pub(crate) fn max_size(&self) -> u32 {
        if self.options.is_memory() {
            1
        } else {
            self.options.pool_size
        }
    }
}

fn open_connection(options: &SqliteOptions) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(&options.path)?;
    conn.busy_timeout(options.busy_timeout)?;
    let _mode: String = conn.query_row(
        &format!("PRAGMA journal_mode = {}", options.journal_mode.as_pragma()),
        [],
        |row| row.get(0),
    )?;
    conn.execute_batch(if options.foreign_keys {
        "PRAGMA foreign_keys = ON"
    } else {
        "PRAGMA foreign_keys = OFF"
    })?;
    Ok(conn)
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = rusqlite::Error;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let options = self.options.clone();
        async move {
            let conn = open_connection(&options)?;
            Ok(Arc::new(Mutex::new(conn)))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(conn);
        async move {
            let guard = handle.lock().await;
            guard.query_row("SELECT 1", [], |_| Ok(()))
        }
    }

    /// A connection handed back with a transaction still open is discarded.
    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.try_lock()
            .map(|guard| !guard.is_autocommit())
            .unwrap_or(false)
    }
}
