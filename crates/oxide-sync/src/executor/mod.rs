//! Database executors.
//!
//! An [`Executor`] is the only path from the engine to a live database. It
//! accepts statement strings, returns rows as loosely typed [`Row`]s and
//! reports what the engine can do. Each executor owns exactly one
//! connection, so explicit `BEGIN`/`COMMIT` statements always apply to the
//! connection that issued them.

mod postgres;
mod sqlite;

pub use postgres::PgExecutor;
pub use sqlite::SqliteExecutor;

use async_trait::async_trait;

use crate::error::{Result, SyncError};

/// A single parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer.
    Int(i64),
    /// Any floating point number.
    Float(f64),
    /// Text.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the value as a string slice, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an integer. Booleans map to 0/1 and numeric text
    /// is parsed.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the value as a boolean. Accepts integers and the usual
    /// textual spellings.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            Self::Text(s) => match s.to_ascii_lowercase().as_str() {
                "t" | "true" | "yes" | "y" | "1" | "on" => Some(true),
                "f" | "false" | "no" | "n" | "0" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns `true` for SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A result row with named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Builds a row from parallel column and value lists.
    #[must_use]
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Returns the value of a column by name.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }

    /// Returns a text column, treating NULL and non-text as absent.
    #[must_use]
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    /// Returns a text column or fails with an introspection error naming
    /// `table`.
    pub fn require_str(&self, table: &str, column: &str) -> Result<&str> {
        self.get_str(column).ok_or_else(|| {
            SyncError::introspection(table, format!("catalog row lacks text column '{column}'"))
        })
    }

    /// Returns an integer column.
    #[must_use]
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    /// Returns a boolean column.
    #[must_use]
    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(Value::as_bool)
    }

    /// Column names in result order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Connection to a live database.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Dialect name as understood by [`crate::dialect::dialect_for`].
    fn dialect_name(&self) -> &'static str;

    /// Runs a query and returns its rows.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Whether column types can be changed without dropping the column.
    fn supports_in_place_alter_column(&self) -> bool;

    /// Whether DDL statements take part in transactions.
    fn supports_transactional_ddl(&self) -> bool;

    /// Starts a transaction.
    async fn begin(&self) -> Result<()> {
        self.execute("BEGIN", &[]).await.map(|_| ())
    }

    /// Commits the current transaction.
    async fn commit(&self) -> Result<()> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    /// Rolls back the current transaction.
    async fn rollback(&self) -> Result<()> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }

    /// Closes the connection. Further calls fail with
    /// [`SyncError::InvalidState`].
    async fn close(&self) -> Result<()>;
}

/// Opens an executor for a database URL.
pub async fn connect(url: &str) -> Result<Box<dyn Executor>> {
    let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
    match scheme.as_str() {
        "sqlite" => Ok(Box::new(SqliteExecutor::connect(url).await?)),
        "postgres" | "postgresql" => Ok(Box::new(PgExecutor::connect(url).await?)),
        "mysql" | "mariadb" => Err(SyncError::UnsupportedOperation {
            dialect: "mysql",
            operation: "live connections".to_string(),
        }),
        other => Err(SyncError::Config(format!(
            "unsupported database URL scheme '{other}'"
        ))),
    }
}

pub(crate) fn closed() -> SyncError {
    SyncError::InvalidState("connection is closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Text("42".into()).as_i64(), Some(42));
        assert_eq!(Value::Text("t".into()).as_bool(), Some(true));
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert!(Value::Float(1.5).as_str().is_none());
    }

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let row = Row::new(
            vec!["Name".into(), "notnull".into()],
            vec![Value::Text("id".into()), Value::Int(1)],
        );
        assert_eq!(row.get_str("name"), Some("id"));
        assert_eq!(row.get_bool("NOTNULL"), Some(true));
        assert!(row.get("missing").is_none());
        assert!(row.require_str("t", "notnull").is_err());
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        assert!(matches!(
            connect("oracle://db").await,
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            connect("mysql://db").await,
            Err(SyncError::UnsupportedOperation { .. })
        ));
    }
}
