use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

/// Values that can be stored in a database row or used as query parameters.
///
/// Conditions, attributes and model columns all speak this one enum:
/// ```rust
/// use sql_scope::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Null,
    JSON(JsonValue),
    Blob(Vec<u8>),
}

impl RowValues {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Zero values mark a primary key as "not yet assigned".
    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            RowValues::Null => true,
            RowValues::Int(i) => *i == 0,
            RowValues::Float(f) => *f == 0.0,
            RowValues::Text(s) => s.is_empty(),
            RowValues::Bool(b) => !*b,
            RowValues::Blob(b) => b.is_empty(),
            RowValues::JSON(j) => j.is_null(),
            RowValues::Timestamp(_) => false,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        match self {
            RowValues::Int(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RowValues::Text(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            RowValues::Timestamp(value) => Some(*value),
            // sqlite hands timestamps back as TEXT
            RowValues::Text(s) => ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok()),
            _ => None,
        }
    }

    /// Render as an SQL literal, for logs only.
    #[must_use]
    pub fn to_sql_literal(&self) -> String {
        match self {
            RowValues::Int(i) => i.to_string(),
            RowValues::Float(f) => f.to_string(),
            RowValues::Text(s) => format!("'{}'", s.replace('\'', "''")),
            RowValues::Bool(b) => b.to_string(),
            RowValues::Timestamp(dt) => format!("'{}'", dt.format("%F %T%.f")),
            RowValues::Null => "NULL".to_string(),
            RowValues::JSON(j) => format!("'{j}'"),
            RowValues::Blob(b) => format!("<binary {} bytes>", b.len()),
        }
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_string())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<NaiveDateTime> for RowValues {
    fn from(value: NaiveDateTime) -> Self {
        RowValues::Timestamp(value)
    }
}

impl From<JsonValue> for RowValues {
    fn from(value: JsonValue) -> Self {
        RowValues::JSON(value)
    }
}

impl From<Vec<u8>> for RowValues {
    fn from(value: Vec<u8>) -> Self {
        RowValues::Blob(value)
    }
}

impl<T: Into<RowValues>> From<Option<T>> for RowValues {
    fn from(value: Option<T>) -> Self {
        value.map_or(RowValues::Null, Into::into)
    }
}
