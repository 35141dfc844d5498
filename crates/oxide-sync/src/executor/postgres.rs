//! PostgreSQL executor.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Column as _, Connection, Postgres, Row as _, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::debug;

use super::{closed, Executor, Row, Value};
use crate::error::{Result, SyncError};

/// Executor over a single PostgreSQL connection.
pub struct PgExecutor {
    conn: Mutex<Option<PgConnection>>,
}

impl PgExecutor {
    /// Opens a connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = PgConnection::connect(url).await?;
        debug!("Opened PostgreSQL connection");
        Ok(Self::from_connection(conn))
    }

    /// Wraps an already open connection.
    #[must_use]
    pub fn from_connection(conn: PgConnection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
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

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (i, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());

        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_string();
        let value = match type_name.as_str() {
            "BOOL" => Value::Bool(row.try_get(i)?),
            "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(i)?)),
            "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(i)?)),
            "INT8" => Value::Int(row.try_get(i)?),
            "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(i)?)),
            "FLOAT8" => Value::Float(row.try_get(i)?),
            "BYTEA" => Value::Bytes(row.try_get(i)?),
            "\"CHAR\"" => Value::Text(char::from(row.try_get::<i8, _>(i)? as u8).to_string()),
            "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" | "CHAR" | "UNKNOWN" => {
                Value::Text(row.try_get(i)?)
            }
            other => {
                return Err(SyncError::InvalidState(format!(
                    "column '{}' has type {other}; cast it to text in the query",
                    column.name()
                )))
            }
        };
        values.push(value);
    }

    Ok(Row::new(columns, values))
}

#[async_trait]
impl Executor for PgExecutor {
    fn dialect_name(&self) -> &'static str {
        "postgresql"
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
        true
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await?;
            debug!("Closed PostgreSQL connection");
        }
        Ok(())
    }
}
