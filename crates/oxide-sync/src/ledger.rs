//! Migration ledger.
//!
//! The ledger is a table recording which migrations have been applied, in
//! application order. Its own shape is a [`Table`] like any other, and it is
//! created or brought up to date through the same diff and DDL machinery
//! the migrations use.
//!
//! A companion lock table guards against concurrent runs: acquiring the
//! lock inserts a fixed row, so a second runner fails on the primary key.

use serde::Serialize;
use tracing::{debug, info};

use crate::ddl::DdlGenerator;
use crate::dialect::{dialect_for, Dialect};
use crate::diff::{DiffOptions, Differ};
use crate::error::{Result, SyncError};
use crate::executor::{Executor, Value};
use crate::introspect::introspector_for;
use crate::schema::{Column, Table, TablePath};

/// Default name of the ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "oxide_sync_migrations";

const LOCK_ROW: i64 = 1;

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Execution order.
    pub id: i64,
    /// Migration name.
    pub name: String,
    /// Migration timestamp.
    pub timestamp: i64,
}

impl LedgerEntry {
    /// Returns the migration identifier, `<timestamp>_<name>`.
    #[must_use]
    pub fn identifier(&self) -> String {
        migration_identifier(self.timestamp, &self.name)
    }
}

/// Formats a migration identifier.
#[must_use]
pub fn migration_identifier(timestamp: i64, name: &str) -> String {
    format!("{timestamp}_{name}")
}

/// Applied-migration bookkeeping for one database.
pub struct Ledger {
    table: TablePath,
    lock: TablePath,
    dialect: Box<dyn Dialect>,
}

impl Ledger {
    /// Creates a ledger stored in `table`, rendering SQL for `dialect`.
    pub fn new(table: impl Into<TablePath>, dialect: &str) -> Result<Self> {
        let table = table.into();
        let lock = TablePath {
            schema: table.schema.clone(),
            name: format!("{}_lock", table.name),
        };
        Ok(Self {
            table,
            lock,
            dialect: dialect_for(dialect)?,
        })
    }

    /// Creates a ledger for the dialect of `executor`.
    pub fn for_executor(executor: &dyn Executor, table: impl Into<TablePath>) -> Result<Self> {
        Self::new(table, executor.dialect_name())
    }

    /// Path of the ledger table.
    #[must_use]
    pub fn table_path(&self) -> &TablePath {
        &self.table
    }

    /// Desired shape of the ledger table.
    #[must_use]
    pub fn ledger_table(&self) -> Table {
        Table::new(self.table.clone())
            .column(Column::new("id", "integer").primary().increment())
            .column(Column::new("name", "varchar").length(255).not_null())
            .column(Column::new("timestamp", "bigint").not_null())
    }

    /// Desired shape of the lock table.
    #[must_use]
    pub fn lock_table(&self) -> Table {
        Table::new(self.lock.clone())
            .column(Column::new("id", "integer").primary())
            .column(Column::new("locked_at", "bigint").not_null())
    }

    /// Returns whether the ledger table exists.
    pub async fn exists(&self, executor: &dyn Executor) -> Result<bool> {
        let introspector = introspector_for(executor.dialect_name())?;
        Ok(introspector
            .introspect_table(executor, &self.table)
            .await?
            .is_some())
    }

    /// Creates or updates the ledger and lock tables.
    pub async fn ensure(&self, executor: &dyn Executor) -> Result<()> {
        let introspector = introspector_for(executor.dialect_name())?;
        let differ = Differ::new(DiffOptions::for_dialect(&self.dialect.capabilities()));
        let generator = DdlGenerator::new(self.dialect.as_ref());

        for desired in [self.ledger_table(), self.lock_table()] {
            let live = introspector.introspect_table(executor, &desired.name).await?;
            let diff = differ.diff_table(Some(&desired), live.as_ref())?;
            if diff.is_empty() {
                continue;
            }
            let plan = generator.generate(diff)?;
            for sql in plan.up_queries() {
                debug!(sql = %sql, "Bootstrapping ledger");
                executor.execute(&sql, &[]).await?;
            }
            info!(table = %desired.name, "Ledger table ready");
        }
        Ok(())
    }

    fn quoted(&self, column: &str) -> String {
        self.dialect.quote_identifier(column)
    }

    /// Records a migration as applied.
    pub async fn record(&self, executor: &dyn Executor, name: &str, timestamp: i64) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
            self.dialect.escape_table_path(&self.table),
            self.quoted("name"),
            self.quoted("timestamp"),
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
        );
        executor
            .execute(&sql, &[Value::from(name), Value::Int(timestamp)])
            .await?;
        Ok(())
    }

    /// Removes a migration record.
    pub async fn remove(&self, executor: &dyn Executor, name: &str, timestamp: i64) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {}",
            self.dialect.escape_table_path(&self.table),
            self.quoted("name"),
            self.dialect.placeholder(1),
            self.quoted("timestamp"),
            self.dialect.placeholder(2),
        );
        let removed = executor
            .execute(&sql, &[Value::from(name), Value::Int(timestamp)])
            .await?;
        if removed == 0 {
            return Err(SyncError::MigrationNotFound(migration_identifier(
                timestamp, name,
            )));
        }
        Ok(())
    }

    /// All applied migrations in execution order.
    pub async fn applied(&self, executor: &dyn Executor) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {}, {}, {} FROM {} ORDER BY {}",
            self.quoted("id"),
            self.quoted("name"),
            self.quoted("timestamp"),
            self.dialect.escape_table_path(&self.table),
            self.quoted("id"),
        );
        let table = self.table.to_string();
        executor
            .query(&sql, &[])
            .await?
            .iter()
            .map(|row| {
                let missing = |column: &str| {
                    SyncError::introspection(&table, format!("ledger row lacks '{column}'"))
                };
                Ok(LedgerEntry {
                    id: row.get_i64("id").ok_or_else(|| missing("id"))?,
                    name: row.require_str(&table, "name")?.to_string(),
                    timestamp: row.get_i64("timestamp").ok_or_else(|| missing("timestamp"))?,
                })
            })
            .collect()
    }

    /// The most recently applied migration.
    pub async fn last(&self, executor: &dyn Executor) -> Result<Option<LedgerEntry>> {
        Ok(self.applied(executor).await?.pop())
    }

    /// Returns whether a migration identifier is recorded.
    pub async fn is_applied(&self, executor: &dyn Executor, identifier: &str) -> Result<bool> {
        Ok(self
            .applied(executor)
            .await?
            .iter()
            .any(|entry| entry.identifier() == identifier))
    }

    /// Takes the migration lock.
    ///
    /// Fails with [`SyncError::LedgerConflict`] if another run holds it.
    pub async fn acquire_lock(&self, executor: &dyn Executor) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
            self.dialect.escape_table_path(&self.lock),
            self.quoted("id"),
            self.quoted("locked_at"),
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
        );
        let now = chrono::Utc::now().timestamp();
        match executor
            .execute(&sql, &[Value::Int(LOCK_ROW), Value::Int(now)])
            .await
        {
            Ok(_) => {
                debug!(lock = %self.lock, "Acquired migration lock");
                Ok(())
            }
            Err(SyncError::Database(sqlx::Error::Database(e))) if e.is_unique_violation() => {
                Err(SyncError::LedgerConflict(format!(
                    "another run holds the lock in {}",
                    self.lock
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Releases the migration lock.
    pub async fn release_lock(&self, executor: &dyn Executor) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.dialect.escape_table_path(&self.lock),
            self.quoted("id"),
            self.dialect.placeholder(1),
        );
        executor.execute(&sql, &[Value::Int(LOCK_ROW)]).await?;
        debug!(lock = %self.lock, "Released migration lock");
        Ok(())
    }
}
