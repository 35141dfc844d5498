//! Migration runner.
//!
//! Applies pending migrations in ascending timestamp order and reverts
//! applied ones most-recent-first, recording each transition in the
//! [`Ledger`]. Each migration moves `Pending -> Running -> Applied` going
//! forward and `Applied -> Running -> Reverted` going back; `Running` is
//! never persisted, so a crash mid-migration leaves it pending.
//!
//! How failures propagate is decided by the [`TransactionMode`] alone.
//! The runner never retries.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::executor::Executor;
use crate::ledger::{Ledger, LedgerEntry};
use crate::migration::Migration;

/// How migrations are wrapped in transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// One transaction for the whole batch.
    #[default]
    All,
    /// One transaction per migration.
    Each,
    /// No transactions.
    None,
}

impl FromStr for TransactionMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "each" => Ok(Self::Each),
            "none" => Ok(Self::None),
            other => Err(SyncError::Config(format!(
                "unknown transaction mode '{other}' (expected all, each or none)"
            ))),
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Each => "each",
            Self::None => "none",
        })
    }
}

/// Lifecycle state of one migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    /// Not yet applied.
    Pending,
    /// Executing. Never persisted.
    Running,
    /// Recorded in the ledger.
    Applied,
    /// Reverted and removed from the ledger.
    Reverted,
}

/// Runner settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Transaction wrapping.
    pub transaction: TransactionMode,
    /// Log statements instead of executing them.
    pub dry_run: bool,
}

/// Cooperative cancellation flag, checked between migrations.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    /// Creates an untriggered handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The current migration finishes first.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Outcome of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Identifiers applied (or reverted) by this run, in order.
    pub applied: Vec<String>,
    /// Last identifier that completed and remains recorded.
    pub last_applied: Option<String>,
    /// Identifiers that were pending, for dry runs.
    pub pending: Vec<String>,
    /// Whether the run stopped on cancellation.
    pub cancelled: bool,
}

/// Applies and reverts migrations against one executor.
pub struct Runner<'a> {
    executor: &'a dyn Executor,
    ledger: Ledger,
    config: RunnerConfig,
}

impl<'a> Runner<'a> {
    /// Creates a runner.
    #[must_use]
    pub fn new(executor: &'a dyn Executor, ledger: Ledger, config: RunnerConfig) -> Self {
        Self {
            executor,
            ledger,
            config,
        }
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn check_config(&self) -> Result<()> {
        if self.config.transaction == TransactionMode::All
            && !self.executor.supports_transactional_ddl()
        {
            return Err(SyncError::Config(format!(
                "transaction mode 'all' requires transactional DDL, which {} lacks",
                self.executor.dialect_name()
            )));
        }
        Ok(())
    }

    async fn applied_entries(&self) -> Result<Vec<LedgerEntry>> {
        if !self.ledger.exists(self.executor).await? {
            return Ok(Vec::new());
        }
        self.ledger.applied(self.executor).await
    }

    /// Reports the state of every known migration.
    pub async fn status(
        &self,
        units: &[Box<dyn Migration>],
    ) -> Result<Vec<(String, MigrationState)>> {
        let applied: HashSet<String> = self
            .applied_entries()
            .await?
            .iter()
            .map(LedgerEntry::identifier)
            .collect();
        Ok(sorted(units)
            .into_iter()
            .map(|unit| {
                let id = unit.identifier();
                let state = if applied.contains(&id) {
                    MigrationState::Applied
                } else {
                    MigrationState::Pending
                };
                (id, state)
            })
            .collect())
    }

    /// Applies all pending migrations.
    pub async fn run(
        &self,
        units: &[Box<dyn Migration>],
        cancel: &CancellationHandle,
    ) -> Result<RunReport> {
        self.check_config()?;

        let entries = self.applied_entries().await?;
        let applied: HashSet<String> = entries.iter().map(LedgerEntry::identifier).collect();
        let previous = entries.last().map(LedgerEntry::identifier);
        let pending: Vec<&dyn Migration> = sorted(units)
            .into_iter()
            .filter(|unit| !applied.contains(&unit.identifier()))
            .collect();

        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(RunReport {
                last_applied: previous,
                ..RunReport::default()
            });
        }

        if self.config.dry_run {
            let mut report = RunReport {
                last_applied: previous,
                ..RunReport::default()
            };
            for unit in pending {
                info!(migration = %unit.identifier(), "Would apply migration");
                for sql in unit.up_queries() {
                    info!(sql = %sql, "Dry run");
                }
                report.pending.push(unit.identifier());
            }
            return Ok(report);
        }

        self.ledger.ensure(self.executor).await?;
        self.ledger.acquire_lock(self.executor).await?;
        let result = self.apply_pending(&pending, previous, cancel).await;
        if let Err(e) = self.ledger.release_lock(self.executor).await {
            warn!(error = %e, "Failed to release migration lock");
        }
        result
    }

    async fn apply_pending(
        &self,
        pending: &[&dyn Migration],
        previous: Option<String>,
        cancel: &CancellationHandle,
    ) -> Result<RunReport> {
        let mode = self.config.transaction;
        let mut report = RunReport {
            last_applied: previous.clone(),
            ..RunReport::default()
        };
        info!(count = pending.len(), mode = %mode, "Applying migrations");

        if mode == TransactionMode::All {
            self.executor.begin().await?;
        }

        for unit in pending {
            if cancel.is_cancelled() {
                info!(migration = %unit.identifier(), "Run cancelled");
                report.cancelled = true;
                break;
            }

            let step = self.apply_one(*unit, mode).await;
            if let Err(e) = step {
                if mode == TransactionMode::All {
                    self.rollback().await;
                    return Err(e);
                }
                return Err(SyncError::PartialRun {
                    last_applied: report.last_applied,
                    source: Box::new(e),
                });
            }
            report.applied.push(unit.identifier());
            report.last_applied = Some(unit.identifier());
        }

        if mode == TransactionMode::All {
            if report.cancelled {
                self.rollback().await;
                report.applied.clear();
                report.last_applied = previous;
            } else {
                self.executor.commit().await?;
            }
        }

        info!(
            applied = report.applied.len(),
            cancelled = report.cancelled,
            "Migration run finished"
        );
        Ok(report)
    }

    async fn apply_one(&self, unit: &dyn Migration, mode: TransactionMode) -> Result<()> {
        let id = unit.identifier();
        debug!(migration = %id, from = ?MigrationState::Pending, to = ?MigrationState::Running, "Migration state");

        if mode == TransactionMode::Each {
            self.executor.begin().await?;
        }
        let outcome = async {
            unit.up(self.executor).await?;
            self.ledger
                .record(self.executor, unit.name(), unit.timestamp())
                .await
        }
        .await;

        match outcome {
            Ok(()) => {
                if mode == TransactionMode::Each {
                    self.executor.commit().await?;
                }
                debug!(migration = %id, from = ?MigrationState::Running, to = ?MigrationState::Applied, "Migration state");
                info!(migration = %id, "Applied migration");
                Ok(())
            }
            Err(e) => {
                if mode == TransactionMode::Each {
                    self.rollback().await;
                }
                debug!(migration = %id, from = ?MigrationState::Running, to = ?MigrationState::Pending, "Migration state");
                Err(e)
            }
        }
    }

    async fn rollback(&self) {
        if let Err(e) = self.executor.rollback().await {
            warn!(error = %e, "Rollback failed");
        }
    }

    /// Reverts the most recently applied migration.
    pub async fn revert_last(&self, units: &[Box<dyn Migration>]) -> Result<Option<String>> {
        Ok(self.revert(units, 1).await?.applied.into_iter().next())
    }

    /// Reverts up to `count` migrations, most recent first.
    ///
    /// Every ledger entry to revert must have a matching unit, otherwise
    /// nothing is reverted and [`SyncError::MigrationNotFound`] is returned.
    pub async fn revert(&self, units: &[Box<dyn Migration>], count: usize) -> Result<RunReport> {
        self.check_config()?;

        let entries = self.applied_entries().await?;
        let mut targets = Vec::new();
        for entry in entries.iter().rev().take(count) {
            let id = entry.identifier();
            let unit = units
                .iter()
                .find(|u| u.identifier() == id)
                .ok_or_else(|| SyncError::MigrationNotFound(id.clone()))?;
            targets.push(unit.as_ref());
        }
        let remaining = |reverted: usize| {
            entries
                .len()
                .checked_sub(reverted + 1)
                .and_then(|i| entries.get(i))
                .map(LedgerEntry::identifier)
        };

        if targets.is_empty() {
            info!("No migrations to revert");
            return Ok(RunReport {
                last_applied: remaining(0),
                ..RunReport::default()
            });
        }

        if self.config.dry_run {
            let mut report = RunReport {
                last_applied: remaining(0),
                ..RunReport::default()
            };
            for unit in targets {
                info!(migration = %unit.identifier(), "Would revert migration");
                for sql in unit.down_queries() {
                    info!(sql = %sql, "Dry run");
                }
                report.pending.push(unit.identifier());
            }
            return Ok(report);
        }

        self.ledger.acquire_lock(self.executor).await?;
        let result = self.revert_targets(&targets, remaining).await;
        if let Err(e) = self.ledger.release_lock(self.executor).await {
            warn!(error = %e, "Failed to release migration lock");
        }
        result
    }

    async fn revert_targets(
        &self,
        targets: &[&dyn Migration],
        remaining: impl Fn(usize) -> Option<String>,
    ) -> Result<RunReport> {
        let mode = self.config.transaction;
        let mut report = RunReport {
            last_applied: remaining(0),
            ..RunReport::default()
        };

        if mode == TransactionMode::All {
            self.executor.begin().await?;
        }

        for unit in targets {
            let id = unit.identifier();
            debug!(migration = %id, from = ?MigrationState::Applied, to = ?MigrationState::Running, "Migration state");
            if mode == TransactionMode::Each {
                self.executor.begin().await?;
            }

            let outcome = async {
                unit.down(self.executor).await?;
                self.ledger
                    .remove(self.executor, unit.name(), unit.timestamp())
                    .await
            }
            .await;

            if let Err(e) = outcome {
                if mode != TransactionMode::None {
                    self.rollback().await;
                }
                debug!(migration = %id, from = ?MigrationState::Running, to = ?MigrationState::Applied, "Migration state");
                if mode == TransactionMode::All {
                    return Err(e);
                }
                return Err(SyncError::PartialRun {
                    last_applied: report.last_applied,
                    source: Box::new(e),
                });
            }

            if mode == TransactionMode::Each {
                self.executor.commit().await?;
            }
            debug!(migration = %id, from = ?MigrationState::Running, to = ?MigrationState::Reverted, "Migration state");
            info!(migration = %id, "Reverted migration");
            report.applied.push(id);
            report.last_applied = remaining(report.applied.len());
        }

        if mode == TransactionMode::All {
            self.executor.commit().await?;
        }
        Ok(report)
    }
}

fn sorted(units: &[Box<dyn Migration>]) -> Vec<&dyn Migration> {
    let mut sorted: Vec<&dyn Migration> = units.iter().map(AsRef::as_ref).collect();
    sorted.sort_by(|a, b| {
        a.timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.name().cmp(b.name()))
    });
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SqliteExecutor;
    use crate::ledger::DEFAULT_LEDGER_TABLE;
    use crate::migration::SqlMigration;

    fn units() -> Vec<Box<dyn Migration>> {
        vec![
            Box::new(
                SqlMigration::new("add_body", 2)
                    .up_sql("ALTER TABLE \"post\" ADD COLUMN \"body\" text")
                    .down_sql("ALTER TABLE \"post\" DROP COLUMN \"body\""),
            ),
            Box::new(
                SqlMigration::new("create_post", 1)
                    .up_sql("CREATE TABLE \"post\" (\"id\" integer PRIMARY KEY)")
                    .down_sql("DROP TABLE \"post\""),
            ),
        ]
    }

    async fn runner(exec: &SqliteExecutor, config: RunnerConfig) -> Runner<'_> {
        let ledger = Ledger::for_executor(exec, DEFAULT_LEDGER_TABLE).unwrap();
        Runner::new(exec, ledger, config)
    }

    #[test]
    fn test_transaction_mode_parsing() {
        assert_eq!("each".parse::<TransactionMode>().unwrap(), TransactionMode::Each);
        assert_eq!(" ALL ".parse::<TransactionMode>().unwrap(), TransactionMode::All);
        assert!(matches!(
            "some".parse::<TransactionMode>(),
            Err(SyncError::Config(_))
        ));
        assert_eq!(TransactionMode::None.to_string(), "none");
    }

    #[tokio::test]
    async fn test_run_applies_in_timestamp_order() {
        let exec = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        let runner = runner(&exec, RunnerConfig::default()).await;
        let units = units();

        let report = runner.run(&units, &CancellationHandle::new()).await.unwrap();
        assert_eq!(report.applied, vec!["1_create_post", "2_add_body"]);
        assert_eq!(report.last_applied.as_deref(), Some("2_add_body"));

        let again = runner.run(&units, &CancellationHandle::new()).await.unwrap();
        assert!(again.applied.is_empty());
        assert_eq!(again.last_applied.as_deref(), Some("2_add_body"));
    }

    #[tokio::test]
    async fn test_revert_last_then_status() {
        let exec = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        let runner = runner(&exec, RunnerConfig::default()).await;
        let units = units();
        runner.run(&units, &CancellationHandle::new()).await.unwrap();

        let reverted = runner.revert_last(&units).await.unwrap();
        assert_eq!(reverted.as_deref(), Some("2_add_body"));

        let status = runner.status(&units).await.unwrap();
        assert_eq!(
            status,
            vec![
                ("1_create_post".to_string(), MigrationState::Applied),
                ("2_add_body".to_string(), MigrationState::Pending),
            ]
        );
    }

    #[tokio::test]
    async fn test_revert_unknown_migration() {
        let exec = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        let runner = runner(&exec, RunnerConfig::default()).await;
        runner.run(&units(), &CancellationHandle::new()).await.unwrap();

        let only_first: Vec<Box<dyn Migration>> = vec![Box::new(SqlMigration::new("create_post", 1))];
        assert!(matches!(
            runner.revert_last(&only_first).await,
            Err(SyncError::MigrationNotFound(id)) if id == "2_add_body"
        ));
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let exec = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        let config = RunnerConfig {
            dry_run: true,
            ..RunnerConfig::default()
        };
        let runner = runner(&exec, config).await;

        let report = runner.run(&units(), &CancellationHandle::new()).await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.pending, vec!["1_create_post", "2_add_body"]);
        assert!(!runner.ledger().exists(&exec).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let exec = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        let config = RunnerConfig {
            transaction: TransactionMode::Each,
            ..RunnerConfig::default()
        };
        let runner = runner(&exec, config).await;
        let cancel = CancellationHandle::new();
        cancel.cancel();

        let report = runner.run(&units(), &cancel).await.unwrap();
        assert!(report.cancelled);
        assert!(report.applied.is_empty());
        // Lock released even though nothing ran.
        runner.ledger().acquire_lock(&exec).await.unwrap();
    }
}
