//! Migration units and migration files.
//!
//! A migration is a named, timestamped pair of `up` and `down` procedures.
//! [`SqlMigration`] is the concrete unit produced from a plan: two ordered
//! statement lists, persisted as a TOML file named after the migration
//! identifier.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ddl::Plan;
use crate::error::{Result, SyncError};
use crate::executor::Executor;
use crate::ledger::migration_identifier;

/// A reversible schema migration.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Migration name.
    fn name(&self) -> &str;

    /// Creation timestamp, used for ordering.
    fn timestamp(&self) -> i64;

    /// Identifier recorded in the ledger.
    fn identifier(&self) -> String {
        migration_identifier(self.timestamp(), self.name())
    }

    /// Statements `up` would run, for dry runs. Empty if unknown.
    fn up_queries(&self) -> Vec<String> {
        Vec::new()
    }

    /// Statements `down` would run, for dry runs. Empty if unknown.
    fn down_queries(&self) -> Vec<String> {
        Vec::new()
    }

    /// Applies the migration.
    async fn up(&self, executor: &dyn Executor) -> Result<()>;

    /// Reverts the migration.
    async fn down(&self, executor: &dyn Executor) -> Result<()>;
}

/// A migration made of literal statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlMigration {
    /// Migration name.
    pub name: String,
    /// Creation timestamp in milliseconds.
    pub timestamp: i64,
    /// Forward statements.
    #[serde(default)]
    pub up: Vec<String>,
    /// Reverse statements.
    #[serde(default)]
    pub down: Vec<String>,
    /// Human-readable warnings carried over from the plan.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl SqlMigration {
    /// Creates an empty migration.
    #[must_use]
    pub fn new(name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            timestamp,
            up: Vec::new(),
            down: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Appends a forward statement.
    #[must_use]
    pub fn up_sql(mut self, sql: impl Into<String>) -> Self {
        self.up.push(sql.into());
        self
    }

    /// Appends a reverse statement.
    #[must_use]
    pub fn down_sql(mut self, sql: impl Into<String>) -> Self {
        self.down.push(sql.into());
        self
    }

    /// Builds a migration from a rendered plan.
    #[must_use]
    pub fn from_plan(name: impl Into<String>, timestamp: i64, plan: &Plan) -> Self {
        let warnings = plan
            .warnings
            .iter()
            .map(ToString::to_string)
            .chain(plan.diff_warnings.iter().map(ToString::to_string))
            .collect();
        Self {
            name: name.into(),
            timestamp,
            up: plan.up_queries(),
            down: plan.down_queries(),
            warnings,
        }
    }

    /// File name of this migration, `<timestamp>_<name>.toml`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.toml", migration_identifier(self.timestamp, &self.name))
    }

    /// Renders the migration file.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SyncError::Parse {
            path: PathBuf::from(self.file_name()),
            message: e.to_string(),
        })
    }

    /// Writes the migration file into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        fs::write(&path, self.to_toml()?)?;
        info!(path = %path.display(), "Wrote migration");
        Ok(path)
    }

    /// Loads a migration file.
    ///
    /// The file name must match the identifier declared inside it.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let migration: Self = toml::from_str(&text).map_err(|e| SyncError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let expected = migration_identifier(migration.timestamp, &migration.name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem != expected {
            return Err(SyncError::Parse {
                path: path.to_path_buf(),
                message: format!("file name does not match migration identifier '{expected}'"),
            });
        }
        Ok(migration)
    }

    async fn run_statements(&self, executor: &dyn Executor, statements: &[String]) -> Result<()> {
        let identifier = self.identifier();
        for (position, query) in statements.iter().enumerate() {
            debug!(migration = %identifier, position, sql = %query, "Executing statement");
            executor
                .execute(query, &[])
                .await
                .map_err(|e| SyncError::DdlExecution {
                    migration: identifier.clone(),
                    position,
                    query: query.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn up_queries(&self) -> Vec<String> {
        self.up.clone()
    }

    fn down_queries(&self) -> Vec<String> {
        self.down.clone()
    }

    async fn up(&self, executor: &dyn Executor) -> Result<()> {
        self.run_statements(executor, &self.up).await
    }

    async fn down(&self, executor: &dyn Executor) -> Result<()> {
        self.run_statements(executor, &self.down).await
    }
}

/// Loads migrations from a directory.
pub struct MigrationSource;

impl MigrationSource {
    /// Reads every `*.toml` migration in `dir`, ordered by timestamp.
    ///
    /// A missing directory holds no migrations.
    pub fn load_dir(dir: &Path) -> Result<Vec<SqlMigration>> {
        if !dir.exists() {
            debug!(dir = %dir.display(), "Migration directory does not exist");
            return Ok(Vec::new());
        }

        let mut migrations = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            migrations.push(SqlMigration::load(&path)?);
        }
        migrations.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.name.cmp(&b.name))
        });

        if let Some(pair) = migrations
            .windows(2)
            .find(|w| w[0].timestamp == w[1].timestamp && w[0].name == w[1].name)
        {
            return Err(SyncError::InvalidState(format!(
                "duplicate migration '{}'",
                pair[0].identifier()
            )));
        }

        debug!(dir = %dir.display(), count = migrations.len(), "Loaded migrations");
        Ok(migrations)
    }

    /// Reads a directory into boxed units for the runner.
    pub fn load_units(dir: &Path) -> Result<Vec<Box<dyn Migration>>> {
        Ok(Self::load_dir(dir)?
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn Migration>)
            .collect())
    }
}
