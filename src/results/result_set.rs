use std::sync::Arc;

use super::row::{Columns, CustomDbRow};
use crate::types::RowValues;

/// Rows returned by one query.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub results: Vec<CustomDbRow>,
    columns: Arc<Columns>,
}

impl ResultSet {
    #[must_use]
    pub fn new(column_names: Vec<String>) -> Self {
        Self {
            results: Vec::new(),
            columns: Arc::new(Columns::new(column_names)),
        }
    }

    /// Append a row; `values` must follow the column order.
    pub fn push(&mut self, values: Vec<RowValues>) {
        self.results
            .push(CustomDbRow::new(Arc::clone(&self.columns), values));
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&CustomDbRow> {
        self.results.first()
    }
}
