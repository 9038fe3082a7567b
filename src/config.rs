use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::db::Db;
use crate::driver::{Driver, open_driver};
use crate::error::DbError;
use crate::logger::LogMode;
use crate::observe::{DEFAULT_SLOW_THRESHOLD, TracingObserver};

/// Connection and builder settings, loadable from JSON.
///
/// ```rust
/// use sql_scope::prelude::*;
///
/// let config = DatabaseConfig::from_json(
///     r#"{ "driver": "sqlite", "primary": "app.db", "log_mode": "verbose" }"#,
/// )
/// .unwrap();
/// assert_eq!(config.log_mode, LogMode::Verbose);
/// assert!(config.replica.is_none());
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub driver: String,
    pub primary: String,
    pub replica: Option<String>,
    pub pool_size: Option<u32>,
    pub busy_timeout_ms: Option<u64>,
    pub slow_threshold_ms: Option<u64>,
    pub log_mode: LogMode,
    pub singular_table: bool,
    pub block_global_update: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            primary: String::new(),
            replica: None,
            pool_size: None,
            busy_timeout_ms: None,
            slow_threshold_ms: None,
            log_mode: LogMode::Default,
            singular_table: false,
            block_global_update: false,
        }
    }
}

impl DatabaseConfig {
    /// # Errors
    /// Returns `DbError::ConfigError` for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, DbError> {
        serde_json::from_str(json)
            .map_err(|e| DbError::ConfigError(format!("invalid database config: {e}")))
    }

    #[must_use]
    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold_ms
            .map_or(DEFAULT_SLOW_THRESHOLD, Duration::from_millis)
    }
}

pub struct DatabaseConfigBuilder {
    config: DatabaseConfig,
}

impl DatabaseConfigBuilder {
    #[must_use]
    pub fn new(driver: &str, primary: &str) -> Self {
        Self {
            config: DatabaseConfig {
                driver: driver.to_string(),
                primary: primary.to_string(),
                ..DatabaseConfig::default()
            },
        }
    }

    #[must_use]
    pub fn replica(mut self, replica: &str) -> Self {
        self.config.replica = Some(replica.to_string());
        self
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.config.pool_size = Some(pool_size);
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.config.busy_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_threshold_ms =
            Some(u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn log_mode(mut self, mode: LogMode) -> Self {
        self.config.log_mode = mode;
        self
    }

    #[must_use]
    pub fn singular_table(mut self, enable: bool) -> Self {
        self.config.singular_table = enable;
        self
    }

    #[must_use]
    pub fn block_global_update(mut self, enable: bool) -> Self {
        self.config.block_global_update = enable;
        self
    }

    #[must_use]
    pub fn finish(self) -> DatabaseConfig {
        self.config
    }

    /// # Errors
    /// See [`Db::connect`].
    pub async fn build(self) -> Result<Db, DbError> {
        Db::connect(&self.config).await
    }
}

async fn connect_source(config: &DatabaseConfig, source: &str) -> Result<Arc<dyn Driver>, DbError> {
    #[cfg(feature = "sqlite")]
    if matches!(config.driver.as_str(), "sqlite" | "sqlite3") {
        let mut builder = crate::sqlite::SqliteOptionsBuilder::new(source);
        if let Some(pool_size) = config.pool_size {
            builder = builder.pool_size(pool_size);
        }
        if let Some(ms) = config.busy_timeout_ms {
            builder = builder.busy_timeout(Duration::from_millis(ms));
        }
        let driver = builder.build().await?;
        return Ok(Arc::new(driver));
    }
    open_driver(&config.driver, source).await
}

async fn connect_and_ping(config: &DatabaseConfig, source: &str) -> Result<Arc<dyn Driver>, DbError> {
    let driver = connect_source(config, source).await?;
    if let Err(err) = driver.ping().await {
        if let Err(close_err) = driver.close().await {
            tracing::warn!(error = %close_err, "close after failed ping");
        }
        return Err(err);
    }
    Ok(driver)
}

impl Db {
    /// Open the configured primary (and replica) and apply the builder settings.
    ///
    /// # Errors
    /// `DbError::ConfigError` for an empty primary source, otherwise connection failures.
    pub async fn connect(config: &DatabaseConfig) -> Result<Db, DbError> {
        if config.primary.is_empty() {
            return Err(DbError::ConfigError("primary source is required".into()));
        }
        let primary = connect_and_ping(config, &config.primary).await?;
        let replica = match &config.replica {
            Some(source) => match connect_and_ping(config, source).await {
                Ok(replica) => Some(replica),
                Err(err) => {
                    if let Err(close_err) = primary.close().await {
                        tracing::warn!(error = %close_err, "close primary after replica failure");
                    }
                    return Err(err);
                }
            },
            None => None,
        };

        let mut db = Db::from_driver(&config.driver, primary, replica);
        db.log_mode(config.log_mode)
            .block_global_update(config.block_global_update)
            .set_observer(Some(Arc::new(TracingObserver::new(config.slow_threshold()))));
        db.singular_table(config.singular_table);
        tracing::debug!(driver = %config.driver, replica = config.replica.is_some(), "database connected");
        Ok(db)
    }
}
