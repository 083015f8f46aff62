use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use rusqlite::{params, types::ValueRef, Connection, InterruptHandle, OpenFlags, Row};
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    ColumnInfo, DatabaseAdapter, DatabaseKind, QueryResult, TableInfo, EXPLAIN_ROW_CAP,
};
use crate::errors::DatabaseError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const LIST_TABLES_SQL: &str = "SELECT name, type FROM sqlite_master \
     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
     ORDER BY name";

const DESCRIBE_TABLE_SQL: &str =
    "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1, ?2) ORDER BY cid";

/// SQLite backend. All statements run on the blocking pool; a statement that
/// outlives its deadline is interrupted.
pub struct SqliteAdapter {
    path: PathBuf,
    read_only: bool,
    connection: Arc<Mutex<Option<Connection>>>,
    interrupt: Mutex<Option<InterruptHandle>>,
}

impl SqliteAdapter {
    pub fn new(path: PathBuf, read_only: bool) -> Self {
        Self {
            path,
            read_only,
            connection: Arc::new(Mutex::new(None)),
            interrupt: Mutex::new(None),
        }
    }

    fn open_flags(&self) -> OpenFlags {
        if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::default()
        }
    }

    async fn run<T, F>(
        &self,
        deadline: Instant,
        operation: &'static str,
        job: F,
    ) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        let task = tokio::task::spawn_blocking(move || {
            let guard = connection
                .lock()
                .map_err(|_| DatabaseError::Worker("connection lock poisoned".to_string()))?;
            let conn = guard.as_ref().ok_or(DatabaseError::NotConnected)?;
            job(conn)
        });

        match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(DatabaseError::Worker(err.to_string())),
            Err(_) => {
                self.interrupt_running_statement(operation);
                Err(DatabaseError::Timeout { operation })
            }
        }
    }

    fn interrupt_running_statement(&self, operation: &'static str) {
        if let Ok(guard) = self.interrupt.lock() {
            if let Some(handle) = guard.as_ref() {
                warn!(operation, "deadline elapsed, interrupting sqlite statement");
                handle.interrupt();
            }
        }
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    async fn connect(&self, deadline: Instant) -> Result<(), DatabaseError> {
        let path = self.path.clone();
        let flags = self.open_flags();
        let opened = tokio::task::spawn_blocking(move || -> Result<Connection, DatabaseError> {
            let conn = Connection::open_with_flags(&path, flags)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(conn)
        });

        let conn = match tokio::time::timeout_at(deadline, opened).await {
            Ok(Ok(result)) => result?,
            Ok(Err(err)) => return Err(DatabaseError::Worker(err.to_string())),
            Err(_) => return Err(DatabaseError::Timeout { operation: "connect" }),
        };

        let handle = conn.get_interrupt_handle();
        let mut slot = self
            .connection
            .lock()
            .map_err(|_| DatabaseError::Worker("connection lock poisoned".to_string()))?;
        *slot = Some(conn);
        if let Ok(mut interrupt) = self.interrupt.lock() {
            *interrupt = Some(handle);
        }

        debug!(path = %self.path.display(), read_only = self.read_only, "sqlite connection opened");
        Ok(())
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        if let Ok(mut interrupt) = self.interrupt.lock() {
            interrupt.take();
        }
        let taken = self
            .connection
            .lock()
            .map_err(|_| DatabaseError::Worker("connection lock poisoned".to_string()))?
            .take();

        if let Some(conn) = taken {
            conn.close().map_err(|(_, err)| DatabaseError::Sqlite(err))?;
        }
        Ok(())
    }

    async fn ping(&self, deadline: Instant) -> Result<(), DatabaseError> {
        self.run(deadline, "ping", |conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    async fn list_tables(&self, deadline: Instant) -> Result<Vec<TableInfo>, DatabaseError> {
        self.run(deadline, "list tables", |conn| {
            let mut statement = conn.prepare(LIST_TABLES_SQL)?;
            let tables = statement
                .query_map([], |row| {
                    let kind: String = row.get(1)?;
                    Ok(TableInfo {
                        table_name: row.get(0)?,
                        table_schema: "main".to_string(),
                        table_type: if kind == "view" {
                            "VIEW".to_string()
                        } else {
                            "BASE TABLE".to_string()
                        },
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tables)
        })
        .await
    }

    async fn describe_table(
        &self,
        deadline: Instant,
        table_name: &str,
    ) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let requested = table_name.to_string();
        let (schema, table) = split_qualified_name(table_name);
        self.run(deadline, "describe table", move |conn| {
            let mut statement = conn.prepare(DESCRIBE_TABLE_SQL)?;
            let columns = statement
                .query_map(params![table, schema], |row| {
                    let not_null: i64 = row.get(2)?;
                    let default: Option<String> = row.get(3)?;
                    let primary_key: i64 = row.get(4)?;
                    Ok(ColumnInfo {
                        column_name: row.get(0)?,
                        data_type: row.get(1)?,
                        is_nullable: if not_null != 0 { "NO" } else { "YES" }.to_string(),
                        column_default: default.unwrap_or_default(),
                        column_key: if primary_key > 0 { "PRI" } else { "" }.to_string(),
                        extra: String::new(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            if columns.is_empty() {
                return Err(DatabaseError::TableNotFound(requested));
            }
            Ok(columns)
        })
        .await
    }

    async fn execute_query(
        &self,
        deadline: Instant,
        sql: &str,
        max_rows: usize,
    ) -> Result<QueryResult, DatabaseError> {
        let sql = sql.to_string();
        self.run(deadline, "execute query", move |conn| {
            collect_rows(conn, &sql, max_rows)
        })
        .await
    }

    async fn explain_query(
        &self,
        deadline: Instant,
        sql: &str,
    ) -> Result<QueryResult, DatabaseError> {
        let sql = explain_statement(sql);
        self.run(deadline, "explain query", move |conn| {
            collect_rows(conn, &sql, EXPLAIN_ROW_CAP)
        })
        .await
    }
}

fn collect_rows(conn: &Connection, sql: &str, max_rows: usize) -> Result<QueryResult, DatabaseError> {
    let mut statement = conn.prepare(sql)?;
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let mut rows = statement.query([])?;
    let mut records = Vec::new();
    while records.len() < max_rows {
        let Some(row) = rows.next()? else {
            break;
        };
        records.push(row_to_map(row, &columns)?);
    }

    Ok(QueryResult {
        columns,
        row_count: records.len(),
        rows: records,
    })
}

fn row_to_map(row: &Row<'_>, columns: &[String]) -> Result<Map<String, Value>, DatabaseError> {
    let mut record = Map::new();
    for (index, name) in columns.iter().enumerate() {
        record.insert(name.clone(), value_to_json(row.get_ref(index)?));
    }
    Ok(record)
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => json!(number),
        ValueRef::Real(number) => json!(number),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn explain_statement(sql: &str) -> String {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("EXPLAIN") {
        trimmed.to_string()
    } else {
        format!("EXPLAIN QUERY PLAN {trimmed}")
    }
}

/// Splits `schema.table` (with optional backtick or double-quote quoting)
/// into its parts, defaulting the schema to `main`.
fn split_qualified_name(name: &str) -> (String, String) {
    let unquote = |part: &str| part.trim_matches(|c| c == '`' || c == '"').to_string();
    match name.rsplit_once('.') {
        Some((schema, table)) if !schema.is_empty() => (unquote(schema), unquote(table)),
        _ => ("main".to_string(), unquote(name)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn fixture() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("fixture.sqlite");
        let conn = Connection::open(&path).expect("open fixture");
        conn.execute_batch(
            "CREATE TABLE users (
                 id INTEGER PRIMARY KEY,
                 name TEXT NOT NULL,
                 score REAL DEFAULT 0.5,
                 avatar BLOB
             );
             INSERT INTO users (name, score, avatar) VALUES
                 ('ada', 1.5, x'0102'),
                 ('grace', 2.0, NULL),
                 ('linus', NULL, NULL);
             CREATE VIEW user_names AS SELECT name FROM users;",
        )
        .expect("seed fixture");
        (dir, path)
    }

    async fn connected(path: PathBuf) -> SqliteAdapter {
        let adapter = SqliteAdapter::new(path, true);
        adapter.connect(deadline()).await.expect("connect");
        adapter
    }

    #[tokio::test]
    async fn calls_before_connect_report_not_connected() {
        let (_dir, path) = fixture();
        let adapter = SqliteAdapter::new(path, true);

        let err = adapter.ping(deadline()).await.expect_err("not connected");
        assert!(matches!(err, DatabaseError::NotConnected));
    }

    #[tokio::test]
    async fn connect_fails_for_missing_file_in_read_only_mode() {
        let dir = tempfile::tempdir().expect("temp dir");
        let adapter = SqliteAdapter::new(dir.path().join("missing.sqlite"), true);

        let err = adapter.connect(deadline()).await.expect_err("missing file");
        assert!(matches!(err, DatabaseError::Sqlite(_)));
    }

    #[tokio::test]
    async fn lists_tables_and_views_in_name_order() {
        let (_dir, path) = fixture();
        let adapter = connected(path).await;

        let tables = adapter.list_tables(deadline()).await.expect("list tables");
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].table_name, "user_names");
        assert_eq!(tables[0].table_type, "VIEW");
        assert_eq!(tables[1].table_name, "users");
        assert_eq!(tables[1].table_type, "BASE TABLE");
        assert_eq!(tables[1].table_schema, "main");
    }

    #[tokio::test]
    async fn describes_columns_with_keys_and_defaults() {
        let (_dir, path) = fixture();
        let adapter = connected(path).await;

        let columns = adapter
            .describe_table(deadline(), "main.\"users\"")
            .await
            .expect("describe");

        assert_eq!(columns.len(), 4);
        assert_eq!(columns[0].column_name, "id");
        assert_eq!(columns[0].column_key, "PRI");
        assert_eq!(columns[1].column_name, "name");
        assert_eq!(columns[1].is_nullable, "NO");
        assert_eq!(columns[2].column_default, "0.5");
        assert_eq!(columns[3].data_type, "BLOB");
    }

    #[tokio::test]
    async fn describe_unknown_table_is_not_found() {
        let (_dir, path) = fixture();
        let adapter = connected(path).await;

        let err = adapter
            .describe_table(deadline(), "missing")
            .await
            .expect_err("unknown table");
        assert!(matches!(err, DatabaseError::TableNotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn execute_maps_values_and_caps_rows() {
        let (_dir, path) = fixture();
        let adapter = connected(path).await;

        let result = adapter
            .execute_query(deadline(), "SELECT id, name, score, avatar FROM users ORDER BY id", 2)
            .await
            .expect("execute");

        assert_eq!(result.columns, vec!["id", "name", "score", "avatar"]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["name"], json!("ada"));
        assert_eq!(result.rows[0]["score"], json!(1.5));
        assert_eq!(result.rows[0]["avatar"], json!("<blob 2 bytes>"));
        assert_eq!(result.rows[1]["avatar"], Value::Null);
    }

    #[tokio::test]
    async fn read_only_connection_refuses_writes() {
        let (_dir, path) = fixture();
        let adapter = connected(path).await;

        let err = adapter
            .execute_query(deadline(), "DELETE FROM users", 10)
            .await
            .expect_err("write must fail");
        assert!(matches!(err, DatabaseError::Sqlite(_)));
    }

    #[tokio::test]
    async fn explain_returns_plan_rows() {
        let (_dir, path) = fixture();
        let adapter = connected(path).await;

        let plan = adapter
            .explain_query(deadline(), "SELECT * FROM users WHERE id = 1")
            .await
            .expect("explain");

        assert!(plan.row_count >= 1);
        assert!(plan.columns.iter().any(|column| column == "detail"));
    }

    #[tokio::test]
    async fn close_drops_connection() {
        let (_dir, path) = fixture();
        let adapter = connected(path).await;

        adapter.close().await.expect("close");
        let err = adapter.ping(deadline()).await.expect_err("closed");
        assert!(matches!(err, DatabaseError::NotConnected));
    }

    #[test]
    fn explain_statement_keeps_existing_explain() {
        assert_eq!(explain_statement("EXPLAIN SELECT 1"), "EXPLAIN SELECT 1");
        assert_eq!(
            explain_statement(" SELECT 1 "),
            "EXPLAIN QUERY PLAN SELECT 1"
        );
    }

    #[test]
    fn splits_qualified_names() {
        assert_eq!(
            split_qualified_name("users"),
            ("main".to_string(), "users".to_string())
        );
        assert_eq!(
            split_qualified_name("`aux`.`users`"),
            ("aux".to_string(), "users".to_string())
        );
    }
}
