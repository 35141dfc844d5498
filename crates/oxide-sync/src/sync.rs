//! Schema synchronization entry points.
//!
//! [`SchemaSync`] owns one executor and exposes the operations a caller
//! drives: diffing the desired schema against the live database, writing
//! migration files, running and reverting them, and applying a plan
//! directly.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::ddl::{DdlGenerator, Plan};
use crate::dialect::{dialect_for, Dialect, DialectCapabilities};
use crate::diff::{Delta, DiffOptions, Differ};
use crate::error::{Result, SyncError};
use crate::executor::{self, Executor};
use crate::introspect::{introspect_all, introspector_for, Introspector};
use crate::ledger::Ledger;
use crate::migration::{Migration, MigrationSource, SqlMigration};
use crate::runner::{CancellationHandle, MigrationState, RunReport, Runner};
use crate::schema::{Table, TablePath};

/// Identifier used for statements applied by [`SchemaSync::synchronize`].
const SYNCHRONIZE: &str = "synchronize";

/// Outcome of a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Live schema matches the desired schema.
    UpToDate,
    /// There are changes to apply.
    ChangesPending,
}

impl CheckStatus {
    /// Classifies a plan. Detected changes that cannot be migrated still
    /// count as pending.
    #[must_use]
    pub fn from_plan(plan: &Plan) -> Self {
        if plan.is_empty() && plan.diff_warnings.is_empty() {
            Self::UpToDate
        } else {
            Self::ChangesPending
        }
    }

    /// Process exit status: `0` up to date, `2` changes pending.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::UpToDate => 0,
            Self::ChangesPending => 2,
        }
    }
}

/// Reads a desired schema from a JSON array of tables.
pub fn load_desired_schema(path: &Path) -> Result<Vec<Table>> {
    let text = std::fs::read_to_string(path)?;
    let tables: Vec<Table> = serde_json::from_str(&text).map_err(|e| SyncError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    for table in &tables {
        table.validate()?;
    }
    debug!(path = %path.display(), tables = tables.len(), "Loaded desired schema");
    Ok(tables)
}

/// Synchronization context bound to one database connection.
pub struct SchemaSync {
    executor: Box<dyn Executor>,
    dialect: Box<dyn Dialect>,
    introspector: Box<dyn Introspector>,
    config: SyncConfig,
    snapshots: RwLock<HashMap<TablePath, Arc<Table>>>,
}

impl SchemaSync {
    /// Wraps an open executor.
    pub fn new(executor: Box<dyn Executor>, config: SyncConfig) -> Result<Self> {
        let dialect = dialect_for(executor.dialect_name())?;
        let introspector = introspector_for(executor.dialect_name())?;
        Ok(Self {
            executor,
            dialect,
            introspector,
            config,
            snapshots: RwLock::new(HashMap::new()),
        })
    }

    /// Connects to `url` and wraps the connection.
    pub async fn connect(url: &str, config: SyncConfig) -> Result<Self> {
        let executor = executor::connect(url).await?;
        info!(dialect = executor.dialect_name(), "Connected");
        Self::new(executor, config)
    }

    /// The underlying executor.
    #[must_use]
    pub fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    /// The dialect statements are rendered for.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Dialect capabilities narrowed by what the connection reports.
    #[must_use]
    pub fn capabilities(&self) -> DialectCapabilities {
        let mut caps = self.dialect.capabilities();
        caps.in_place_alter_column &= self.executor.supports_in_place_alter_column();
        caps.transactional_ddl &= self.executor.supports_transactional_ddl();
        caps
    }

    fn ledger(&self) -> Result<Ledger> {
        Ledger::for_executor(self.executor(), self.config.ledger_table.as_str())
    }

    /// Last introspected snapshot of a table, if any.
    pub async fn snapshot(&self, path: &TablePath) -> Option<Arc<Table>> {
        self.snapshots.read().await.get(path).cloned()
    }

    async fn introspect(&self, desired: &[Table]) -> Result<Vec<Table>> {
        let ledger = self.ledger()?;
        let ledger_tables: HashSet<TablePath> = [ledger.ledger_table().name, ledger.lock_table().name]
            .into_iter()
            .collect();

        let mut paths: Vec<TablePath> = desired.iter().map(|t| t.name.clone()).collect();
        if self.config.drop_orphans {
            let known: HashSet<TablePath> = paths.iter().cloned().collect();
            let listed = self.introspector.list_tables(self.executor(), None).await?;
            paths.extend(
                listed
                    .into_iter()
                    .filter(|p| !known.contains(p) && !ledger_tables.contains(p)),
            );
        }

        let tables: Vec<Table> =
            introspect_all(self.introspector.as_ref(), self.executor(), &paths)
                .await?
                .into_iter()
                .flatten()
                .collect();

        let mut snapshots = self.snapshots.write().await;
        for path in &paths {
            snapshots.remove(path);
        }
        for table in &tables {
            snapshots.insert(table.name.clone(), Arc::new(table.clone()));
        }
        debug!(requested = paths.len(), found = tables.len(), "Introspected live schema");
        Ok(tables)
    }

    /// Computes the plan that brings the live schema to `desired`.
    ///
    /// Reads the catalog only; nothing is written.
    pub async fn diff_only(&self, desired: &[Table]) -> Result<Plan> {
        let live = self.introspect(desired).await?;
        let caps = self.capabilities();
        let diff = Differ::new(DiffOptions::for_dialect(&caps)).diff_schema(desired, &live)?;
        let plan = DdlGenerator::new(self.dialect())
            .with_capabilities(caps)
            .generate(diff)?;

        for warning in &plan.warnings {
            warn!(warning = %warning, "Unsafe alteration");
        }
        for warning in &plan.diff_warnings {
            warn!(warning = %warning, "Change not migrated");
        }
        info!(
            steps = plan.steps.len(),
            unsafe_changes = plan.has_unsafe_changes(),
            "Plan computed"
        );
        Ok(plan)
    }

    /// Reports whether the live schema matches `desired`.
    pub async fn check(&self, desired: &[Table]) -> Result<CheckStatus> {
        Ok(CheckStatus::from_plan(&self.diff_only(desired).await?))
    }

    /// Writes a migration for the pending changes into `dir`.
    ///
    /// Returns `None` when there is nothing to migrate.
    pub async fn generate_migration(
        &self,
        desired: &[Table],
        name: &str,
        dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let plan = self.diff_only(desired).await?;
        if plan.is_empty() {
            info!("Schema is up to date, no migration generated");
            return Ok(None);
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let migration = SqlMigration::from_plan(name, timestamp, &plan);
        if self.config.dry_run {
            info!(migration = %migration.identifier(), "Would write migration");
            for sql in &migration.up {
                info!(sql = %sql, "Dry run");
            }
            return Ok(None);
        }
        migration.write_to(dir).map(Some)
    }

    /// Loads the migrations in the configured directory.
    pub fn load_migrations(&self) -> Result<Vec<Box<dyn Migration>>> {
        MigrationSource::load_units(&self.config.migrations_dir)
    }

    /// Applies pending migrations.
    pub async fn run_migrations(
        &self,
        units: &[Box<dyn Migration>],
        cancel: &CancellationHandle,
    ) -> Result<RunReport> {
        let runner = Runner::new(self.executor(), self.ledger()?, self.config.runner_config());
        let report = runner.run(units, cancel).await;
        self.snapshots.write().await.clear();
        report
    }

    /// Reverts the most recently applied migration.
    pub async fn revert_last_migration(
        &self,
        units: &[Box<dyn Migration>],
    ) -> Result<Option<String>> {
        let runner = Runner::new(self.executor(), self.ledger()?, self.config.runner_config());
        let reverted = runner.revert_last(units).await;
        self.snapshots.write().await.clear();
        reverted
    }

    /// State of every known migration.
    pub async fn migration_status(
        &self,
        units: &[Box<dyn Migration>],
    ) -> Result<Vec<(String, MigrationState)>> {
        Runner::new(self.executor(), self.ledger()?, self.config.runner_config())
            .status(units)
            .await
    }

    /// Applies the plan for `desired` directly, without writing a
    /// migration or a ledger entry.
    ///
    /// The statements run in one transaction when the engine supports
    /// transactional DDL. Snapshots are replaced only after success.
    pub async fn synchronize(&self, desired: &[Table]) -> Result<Plan> {
        let plan = self.diff_only(desired).await?;
        if plan.is_empty() {
            return Ok(plan);
        }
        if self.config.dry_run {
            for sql in plan.up_queries() {
                info!(sql = %sql, "Dry run");
            }
            return Ok(plan);
        }

        let ledger = self.ledger()?;
        ledger.ensure(self.executor()).await?;
        ledger.acquire_lock(self.executor()).await?;
        let result = self.apply(&plan).await;
        if let Err(e) = ledger.release_lock(self.executor()).await {
            warn!(error = %e, "Failed to release migration lock");
        }
        result?;

        let mut snapshots = self.snapshots.write().await;
        for step in &plan.steps {
            match &step.delta {
                Delta::DropTable(table) => {
                    snapshots.remove(&table.name);
                }
                delta => {
                    let path = delta.table();
                    if let Some(table) = desired.iter().find(|t| &t.name == path) {
                        snapshots.insert(path.clone(), Arc::new(table.clone()));
                    }
                }
            }
        }
        info!(steps = plan.steps.len(), "Schema synchronized");
        Ok(plan)
    }

    async fn apply(&self, plan: &Plan) -> Result<()> {
        let exec = self.executor();
        let transactional = self.capabilities().transactional_ddl;
        if transactional {
            exec.begin().await?;
        }

        for (position, query) in plan.up_queries().into_iter().enumerate() {
            debug!(position, sql = %query, "Executing statement");
            if let Err(e) = exec.execute(&query, &[]).await {
                if transactional {
                    if let Err(rollback) = exec.rollback().await {
                        warn!(error = %rollback, "Rollback failed");
                    }
                }
                return Err(SyncError::DdlExecution {
                    migration: SYNCHRONIZE.to_string(),
                    position,
                    query,
                    message: e.to_string(),
                });
            }
        }

        if transactional {
            exec.commit().await?;
        }
        Ok(())
    }

    /// Closes the connection.
    pub async fn shutdown(self) -> Result<()> {
        self.executor.close().await?;
        info!("Connection closed");
        Ok(())
    }
}
