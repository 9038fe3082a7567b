use std::fmt;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DbError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(Arc<rusqlite::Error>),

    #[error("record not found")]
    RecordNotFound,

    #[error("invalid transaction")]
    InvalidTransaction,

    #[error("can't start transaction")]
    CantStartTransaction {
        #[source]
        source: Option<Arc<DbError>>,
    },

    /// The underlying transaction was already committed or rolled back.
    #[error("transaction has already been committed or rolled back")]
    TxDone,

    #[error(transparent)]
    Multi(Errors),

    #[error("panic recovered: {0}")]
    PanicRecovered(String),

    #[error("missing WHERE clause while {0}")]
    MissingWhereClause(&'static str),

    #[error("operation cancelled by caller context")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl DbError {
    #[must_use]
    pub fn is_record_not_found(&self) -> bool {
        match self {
            DbError::RecordNotFound => true,
            DbError::Multi(errors) => errors.iter().any(DbError::is_record_not_found),
            _ => false,
        }
    }

    /// Wrap a lower-level failure as the "can't start transaction" condition.
    #[must_use]
    pub fn cant_start_transaction(source: Option<DbError>) -> Self {
        DbError::CantStartTransaction {
            source: source.map(Arc::new),
        }
    }

    /// Flatten this error into its individual parts.
    #[must_use]
    pub fn into_errors(self) -> Vec<DbError> {
        match self {
            DbError::Multi(errors) => errors.into_vec(),
            other => vec![other],
        }
    }

    fn same_as(&self, other: &DbError) -> bool {
        match (self, other) {
            #[cfg(feature = "sqlite")]
            (DbError::SqliteError(a), DbError::SqliteError(b)) if Arc::ptr_eq(a, b) => true,
            _ => {
                std::mem::discriminant(self) == std::mem::discriminant(other)
                    && self.to_string() == other.to_string()
            }
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::SqliteError(Arc::new(err))
    }
}

#[cfg(feature = "sqlite")]
impl From<bb8::RunError<rusqlite::Error>> for DbError {
    fn from(err: bb8::RunError<rusqlite::Error>) -> Self {
        DbError::ConnectionError(format!("SQLite pool error: {err}"))
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::ExecutionError(format!("blocking task join error: {err}"))
    }
}

/// An ordered set of distinct errors collected on one builder.
#[derive(Debug, Clone, Default)]
pub struct Errors(Vec<DbError>);

impl Errors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error, flattening nested aggregates and skipping duplicates.
    pub fn add(&mut self, err: DbError) {
        match err {
            DbError::Multi(nested) => {
                for inner in nested.0 {
                    self.add(inner);
                }
            }
            other => {
                if !self.0.iter().any(|existing| existing.same_as(&other)) {
                    self.0.push(other);
                }
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DbError> {
        self.0.iter()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<DbError> {
        self.0
    }
}

impl From<Vec<DbError>> for Errors {
    fn from(errors: Vec<DbError>) -> Self {
        let mut out = Errors::new();
        for err in errors {
            out.add(err);
        }
        out
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for err in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}

impl<'a> IntoIterator for &'a Errors {
    type Item = &'a DbError;
    type IntoIter = std::slice::Iter<'a, DbError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_skips_duplicates_and_flattens() {
        let mut errors = Errors::new();
        errors.add(DbError::Other("a".into()));
        errors.add(DbError::Other("a".into()));
        errors.add(DbError::Multi(Errors::from(vec![
            DbError::Other("b".into()),
            DbError::InvalidTransaction,
        ])));

        assert_eq!(errors.len(), 3);
        assert_eq!(
            errors.to_string(),
            "Other database error: a; Other database error: b; invalid transaction"
        );
    }

    #[test]
    fn record_not_found_is_seen_through_aggregates() {
        let agg = DbError::Multi(Errors::from(vec![
            DbError::Other("x".into()),
            DbError::RecordNotFound,
        ]));
        assert!(agg.is_record_not_found());
        assert_eq!(agg.into_errors().len(), 2);
    }
}
