use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

use crate::error::DbError;

/// How much a builder prints about its own work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// Errors only, printed off the calling task.
    #[default]
    Default,
    /// Nothing.
    Silent,
    /// Errors printed inline plus every statement with timing.
    Verbose,
}

#[derive(Debug, Clone)]
pub enum LogEntry {
    Error {
        source: String,
        error: DbError,
    },
    Sql {
        source: String,
        duration: Duration,
        sql: String,
        rows: Option<usize>,
    },
    Info {
        source: String,
        message: String,
    },
}

pub trait Logger: Send + Sync + fmt::Debug {
    fn print(&self, entry: &LogEntry);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn print(&self, entry: &LogEntry) {
        match entry {
            LogEntry::Error { source, error } => {
                tracing::error!(source = %source, error = %error, "database error");
            }
            LogEntry::Sql {
                source,
                duration,
                sql,
                rows,
            } => {
                tracing::info!(
                    source = %source,
                    duration_ms = %format!("{:.2}", duration.as_secs_f64() * 1000.0),
                    rows = rows.map_or(-1, |r| i64::try_from(r).unwrap_or(i64::MAX)),
                    sql = %sql,
                    "sql"
                );
            }
            LogEntry::Info { source, message } => {
                tracing::info!(source = %source, "{message}");
            }
        }
    }
}

/// Fire-and-forget print. Runs on the ambient tokio runtime when there is one;
/// a failing logger only affects its own task.
pub(crate) fn print_detached(logger: Arc<dyn Logger>, entry: LogEntry) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            drop(handle.spawn(async move { logger.print(&entry) }));
        }
        Err(_) => logger.print(&entry),
    }
}
