#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use sql_scope::prelude::*;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

const USERS_DDL: &str = "CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL DEFAULT '',
    age INTEGER NOT NULL DEFAULT 0,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT
)";

const EMAILS_DDL: &str = "CREATE TABLE IF NOT EXISTS emails (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    address TEXT NOT NULL
)";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
    pub emails: Vec<Email>,
    pub hooks: Vec<ModelHook>,
}

fn timestamp(value: RowValues) -> Option<NaiveDateTime> {
    value.as_timestamp()
}

fn opt_timestamp(value: Option<NaiveDateTime>) -> RowValues {
    value.map_or(RowValues::Null, RowValues::Timestamp)
}

impl Model for User {
    fn schema() -> ModelSchema {
        const RELATIONS: &[Relation] = &[Relation {
            name: "Emails",
            table: "emails",
            foreign_key: "user_id",
        }];
        ModelSchema::new(
            "User",
            "id",
            &["id", "name", "age", "created_at", "updated_at", "deleted_at"],
        )
        .relations(RELATIONS)
    }

    fn values(&self) -> Vec<RowValues> {
        vec![
            RowValues::Int(self.id),
            RowValues::Text(self.name.clone()),
            RowValues::Int(self.age),
            opt_timestamp(self.created_at),
            opt_timestamp(self.updated_at),
            opt_timestamp(self.deleted_at),
        ]
    }

    fn set_value(&mut self, column: &str, value: RowValues) -> Result<(), DbError> {
        match column {
            "id" => self.id = value.as_int().copied().unwrap_or_default(),
            "name" => self.name = value.as_text().unwrap_or_default().to_string(),
            "age" => self.age = value.as_int().copied().unwrap_or_default(),
            "created_at" => self.created_at = timestamp(value),
            "updated_at" => self.updated_at = timestamp(value),
            "deleted_at" => self.deleted_at = timestamp(value),
            other => return Err(DbError::Other(format!("unknown user column {other}"))),
        }
        Ok(())
    }

    fn hook(&mut self, hook: ModelHook) -> Result<(), DbError> {
        if hook == ModelHook::BeforeSave && self.name == "invalid" {
            return Err(DbError::Other("invalid user name".into()));
        }
        self.hooks.push(hook);
        Ok(())
    }

    fn attach(&mut self, relation: &str, rows: &[CustomDbRow]) -> Result<(), DbError> {
        match relation {
            "Emails" => {
                self.emails = rows.iter().map(Email::from_row).collect::<Result<_, _>>()?;
                Ok(())
            }
            other => Err(DbError::Other(format!("no relation {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Email {
    pub id: i64,
    pub user_id: i64,
    pub address: String,
}

impl Model for Email {
    fn schema() -> ModelSchema {
        ModelSchema::new("Email", "id", &["id", "user_id", "address"])
    }

    fn values(&self) -> Vec<RowValues> {
        vec![
            RowValues::Int(self.id),
            RowValues::Int(self.user_id),
            RowValues::Text(self.address.clone()),
        ]
    }

    fn set_value(&mut self, column: &str, value: RowValues) -> Result<(), DbError> {
        match column {
            "id" => self.id = value.as_int().copied().unwrap_or_default(),
            "user_id" => self.user_id = value.as_int().copied().unwrap_or_default(),
            "address" => self.address = value.as_text().unwrap_or_default().to_string(),
            other => return Err(DbError::Other(format!("unknown email column {other}"))),
        }
        Ok(())
    }
}

pub fn user(name: &str, age: i64) -> User {
    User {
        name: name.to_string(),
        age,
        ..User::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Temp-file database with the test tables; keep the `TempDir` alive.
pub async fn setup_db() -> Result<(Db, TempDir), DbError> {
    init_tracing();
    let dir = tempfile::tempdir().map_err(|e| DbError::Other(e.to_string()))?;
    let path = dir.path().join("primary.db");
    let db = open_with_tables(&path.to_string_lossy()).await?;
    Ok((db, dir))
}

pub async fn open_with_tables(path: &str) -> Result<Db, DbError> {
    let db = DatabaseConfigBuilder::new("sqlite", path)
        .log_mode(LogMode::Silent)
        .build()
        .await?;
    create_tables(&db).await?;
    Ok(db)
}

pub async fn create_tables(db: &Db) -> Result<(), DbError> {
    db.exec(USERS_DDL, Vec::new()).await.into_result()?;
    db.exec(EMAILS_DDL, Vec::new()).await.into_result()?;
    Ok(())
}

pub async fn seed_users(db: &Db, names: &[&str]) -> Result<Vec<User>, DbError> {
    let mut created = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let mut u = user(name, 20 + i64::try_from(i).unwrap_or_default());
        db.create(&mut u).await.into_result()?;
        created.push(u);
    }
    Ok(created)
}

/// Logger that keeps every entry for inspection.
#[derive(Debug, Default, Clone)]
pub struct CapturingLogger {
    pub entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CapturingLogger {
    fn print(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

impl CapturingLogger {
    pub fn errors(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Error { error, .. } => Some(error.to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn statements(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Sql { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }
}
