//! Database adapter capability and the backends behind it
//!
//! Exactly one adapter is built at startup and shared for the process lifetime.

pub mod sqlite;

use std::{fmt, path::PathBuf, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::errors::DatabaseError;

pub use sqlite::SqliteAdapter;

/// Row count cap applied to `EXPLAIN` output, which is small in practice.
pub const EXPLAIN_ROW_CAP: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sqlite,
}

impl DatabaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub kind: DatabaseKind,
    pub path: PathBuf,
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TableInfo {
    pub table_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub table_schema: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub table_type: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub column_default: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub column_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub extra: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
}

/// Every call carries the caller's deadline; implementations must give up
/// once it has passed.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn kind(&self) -> DatabaseKind;

    async fn connect(&self, deadline: Instant) -> Result<(), DatabaseError>;

    async fn close(&self) -> Result<(), DatabaseError>;

    async fn ping(&self, deadline: Instant) -> Result<(), DatabaseError>;

    async fn list_tables(&self, deadline: Instant) -> Result<Vec<TableInfo>, DatabaseError>;

    async fn describe_table(
        &self,
        deadline: Instant,
        table_name: &str,
    ) -> Result<Vec<ColumnInfo>, DatabaseError>;

    async fn execute_query(
        &self,
        deadline: Instant,
        sql: &str,
        max_rows: usize,
    ) -> Result<QueryResult, DatabaseError>;

    async fn explain_query(&self, deadline: Instant, sql: &str)
        -> Result<QueryResult, DatabaseError>;
}

pub fn build_adapter(config: &DatabaseConfig) -> Arc<dyn DatabaseAdapter> {
    match config.kind {
        DatabaseKind::Sqlite => Arc::new(SqliteAdapter::new(config.path.clone(), config.read_only)),
    }
}
