//! SQLite executor.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column as _, ConnectOptions, Connection, Row as _, Sqlite, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::debug;

use super::{closed, Executor, Row, Value};
use crate::error::Result;

/// Executor over a single SQLite connection.
pub struct SqliteExecutor {
    conn: Mutex<Option<SqliteConnection>>,
}

impl SqliteExecutor {
    /// Opens a connection. File databases are created if missing.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let conn = options.connect().await?;
        debug!(url, "Opened SQLite connection");
        Ok(Self::from_connection(conn))
    }

    /// Wraps an already open connection.
    #[must_use]
    pub fn from_connection(conn: SqliteConnection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
            Value::Bytes(b) => query.bind(b.clone()),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (i, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());

        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        // Storage class of the value itself, not the declared column type.
        let storage = raw.type_info().name().to_string();
        let value = match storage.as_str() {
            "INTEGER" | "BOOLEAN" => Value::Int(row.try_get_unchecked(i)?),
            "REAL" => Value::Float(row.try_get_unchecked(i)?),
            "BLOB" => Value::Bytes(row.try_get_unchecked(i)?),
            _ => Value::Text(row.try_get_unchecked(i)?),
        };
        values.push(value);
    }

    Ok(Row::new(columns, values))
}

#[async_trait]
impl Executor for SqliteExecutor {
    fn dialect_name(&self) -> &'static str {
        "sqlite"
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        debug!(sql, params = params.len(), "Running query");

        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        debug!(sql, params = params.len(), "Executing statement");

        let result = if params.is_empty() {
            sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql)).await?
        } else {
            bind_params(sqlx::query(sql), params)
                .execute(&mut *conn)
                .await?
        };
        Ok(result.rows_affected())
    }

    fn supports_in_place_alter_column(&self) -> bool {
        false
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await?;
            debug!("Closed SQLite connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    async fn memory() -> SqliteExecutor {
        SqliteExecutor::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_query_decodes_storage_classes() {
        let exec = memory().await;
        exec.execute(
            "CREATE TABLE t (i INTEGER, r REAL, s TEXT, b BLOB, n TEXT)",
            &[],
        )
        .await
        .unwrap();
        exec.execute(
            "INSERT INTO t VALUES (?, ?, ?, ?, ?)",
            &[
                Value::Int(7),
                Value::Float(1.5),
                Value::from("hello"),
                Value::Bytes(vec![1, 2]),
                Value::Null,
            ],
        )
        .await
        .unwrap();

        let rows = exec.query("SELECT * FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get_i64("i"), Some(7));
        assert_eq!(row.get("r"), Some(&Value::Float(1.5)));
        assert_eq!(row.get_str("s"), Some("hello"));
        assert_eq!(row.get("b"), Some(&Value::Bytes(vec![1, 2])));
        assert_eq!(row.get("n"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_rollback_discards_ddl() {
        let exec = memory().await;
        exec.begin().await.unwrap();
        exec.execute("CREATE TABLE gone (id INTEGER)", &[]).await.unwrap();
        exec.rollback().await.unwrap();

        let rows = exec
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[Value::from("gone")],
            )
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_closed_executor_rejects_queries() {
        let exec = memory().await;
        exec.close().await.unwrap();
        assert!(matches!(
            exec.query("SELECT 1", &[]).await,
            Err(SyncError::InvalidState(_))
        ));
        exec.close().await.unwrap();
    }
}
