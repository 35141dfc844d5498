//! DDL query generation.
//!
//! Turns ordered [`Delta`]s into concrete `up` and `down` statements for a
//! dialect. Column alterations are classified by the [`AlterationPolicy`]
//! before anything is rendered, so the generated statement is always the
//! right one; rendered SQL is never rewritten afterwards.
//!
//! `down` statements of a plan are the inverse of its `up` statements: the
//! per-delta inverses, in reverse delta order. For destructive changes the
//! inverse restores structure but not data, and a warning is attached.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dialect::{Conversion, Dialect, DialectCapabilities};
use crate::diff::{Delta, DiffWarning, SchemaDiff};
use crate::error::{Result, SyncError};
use crate::policy::{Alteration, AlterationPolicy, Destructive};
use crate::schema::{Column, Generation, Index, PartitionStrategy, Table, TablePath};

/// Direction a statement runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Forward migration.
    Up,
    /// Reverse migration.
    Down,
}

/// Why a planned change may lose data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsafeReason {
    /// Values are truncated to a shorter length.
    Truncate(u64),
    /// The column is dropped and re-added.
    Rebuild,
    /// A column is dropped.
    DropColumn,
    /// A table is dropped.
    DropTable,
    /// A partition (and its rows) is dropped.
    DropPartition,
    /// The reverse of a widening truncates back to the old length.
    NarrowingRevert(u64),
    /// The reverse of a retype has no data-preserving guarantee.
    UnguardedRevert,
}

/// A destructive or lossy step in a plan. Not an error: callers decide
/// whether to proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsafeAlterationWarning {
    /// Affected table.
    pub table: TablePath,
    /// Affected column, if the change is column-scoped.
    pub column: Option<String>,
    /// Direction in which data may be lost.
    pub direction: Direction,
    /// What makes the step unsafe.
    pub reason: UnsafeReason,
}

impl fmt::Display for UnsafeAlterationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.column {
            Some(column) => format!("{}.{}", self.table, column),
            None => self.table.to_string(),
        };
        let direction = match self.direction {
            Direction::Up => "up",
            Direction::Down => "down",
        };
        match self.reason {
            UnsafeReason::Truncate(length) => {
                write!(f, "[{direction}] {target}: values truncated to {length} characters")
            }
            UnsafeReason::Rebuild => {
                write!(f, "[{direction}] {target}: column dropped and re-created, data is lost")
            }
            UnsafeReason::DropColumn => write!(f, "[{direction}] {target}: column dropped"),
            UnsafeReason::DropTable => write!(f, "[{direction}] {target}: table dropped"),
            UnsafeReason::DropPartition => {
                write!(f, "[{direction}] {target}: partition dropped with its rows")
            }
            UnsafeReason::NarrowingRevert(length) => write!(
                f,
                "[{direction}] {target}: revert narrows back to {length} characters"
            ),
            UnsafeReason::UnguardedRevert => write!(
                f,
                "[{direction}] {target}: revert retypes without a data-preserving cast"
            ),
        }
    }
}

/// A delta with its classification and rendered statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDelta {
    /// The structural change.
    pub delta: Delta,
    /// Classification, for column alterations.
    pub alteration: Option<Alteration>,
    /// Forward statements, in execution order.
    pub up: Vec<String>,
    /// Reverse statements, in execution order.
    pub down: Vec<String>,
}

/// Rendered migration plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Planned deltas, in execution order.
    pub steps: Vec<PlannedDelta>,
    /// Destructive or lossy steps.
    pub warnings: Vec<UnsafeAlterationWarning>,
    /// Changes detected but not migrated.
    pub diff_warnings: Vec<DiffWarning>,
}

impl Plan {
    /// Returns `true` if there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All forward statements in execution order.
    #[must_use]
    pub fn up_queries(&self) -> Vec<String> {
        self.steps.iter().flat_map(|s| s.up.iter().cloned()).collect()
    }

    /// All reverse statements: per-step inverses in reverse step order.
    #[must_use]
    pub fn down_queries(&self) -> Vec<String> {
        self.steps
            .iter()
            .rev()
            .flat_map(|s| s.down.iter().cloned())
            .collect()
    }

    /// Returns `true` if applying the plan forward may lose data.
    #[must_use]
    pub fn has_unsafe_changes(&self) -> bool {
        self.warnings.iter().any(|w| w.direction == Direction::Up)
    }
}

/// Renders deltas for one dialect.
pub struct DdlGenerator<'a> {
    dialect: &'a dyn Dialect,
    caps: DialectCapabilities,
}

impl<'a> DdlGenerator<'a> {
    /// Creates a generator for a dialect.
    #[must_use]
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            caps: dialect.capabilities(),
            dialect,
        }
    }

    /// Overrides the capability table, e.g. with what a live connection
    /// reports.
    #[must_use]
    pub fn with_capabilities(mut self, caps: DialectCapabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Renders a whole diff into a plan.
    ///
    /// Fails with [`SyncError::UnsupportedOperation`] before producing any
    /// statement if a delta cannot be expressed in this dialect.
    pub fn generate(&self, diff: SchemaDiff) -> Result<Plan> {
        let mut plan = Plan {
            diff_warnings: diff.warnings,
            ..Plan::default()
        };
        for delta in diff.deltas {
            let step = self.render(delta, &mut plan.warnings)?;
            debug!(
                delta = %step.delta.description(),
                alteration = ?step.alteration,
                up = step.up.len(),
                down = step.down.len(),
                "Planned delta"
            );
            plan.steps.push(step);
        }
        Ok(plan)
    }

    fn unsupported(&self, operation: impl Into<String>) -> SyncError {
        SyncError::UnsupportedOperation {
            dialect: self.dialect.name(),
            operation: operation.into(),
        }
    }

    fn require(&self, supported: bool, operation: impl FnOnce() -> String) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(self.unsupported(operation()))
        }
    }

    fn check_index(&self, index: &Index) -> Result<()> {
        self.require(self.caps.supports_index_method(&index.method), || {
            format!("index method '{}' (index {})", index.method.as_str(), index.name)
        })?;
        self.require(
            index.where_clause.is_none() || self.caps.partial_indexes,
            || format!("partial index {}", index.name),
        )
    }

    fn check_partitioning(&self, strategy: PartitionStrategy) -> Result<()> {
        self.require(self.caps.partitioning, || "table partitioning".to_string())?;
        self.require(
            strategy != PartitionStrategy::Hash || self.caps.hash_partitioning,
            || "hash partitioning".to_string(),
        )
    }

    fn check_table(&self, table: &Table) -> Result<()> {
        for index in &table.indices {
            self.check_index(index)?;
        }
        if !table.exclusions.is_empty() {
            self.require(self.caps.exclusion_constraints, || {
                format!("exclusion constraints (table {})", table.name)
            })?;
        }
        if let Some(ref spec) = table.partition {
            self.check_partitioning(spec.strategy)?;
        }
        Ok(())
    }

    fn check_constraint(&self, what: &str, name: &str, table: &TablePath) -> Result<()> {
        self.require(self.caps.add_constraint, || {
            format!("altering {what} {name} on existing table {table}")
        })
    }

    /// Renders a single delta, appending any unsafe-change warnings.
    pub fn render(
        &self,
        delta: Delta,
        warnings: &mut Vec<UnsafeAlterationWarning>,
    ) -> Result<PlannedDelta> {
        let d = self.dialect;
        let mut alteration = None;

        let (up, down) = match &delta {
            Delta::AddTable(table) => {
                self.check_table(table)?;
                (d.create_table(table), d.drop_table(&table.name))
            }
            Delta::DropTable(table) => {
                self.check_table(table)?;
                warnings.push(warning(&table.name, None, Direction::Up, UnsafeReason::DropTable));
                (d.drop_table(&table.name), d.create_table(table))
            }
            Delta::AddColumn { table, column } => {
                warnings.push(warning(
                    table,
                    Some(column),
                    Direction::Down,
                    UnsafeReason::DropColumn,
                ));
                (d.add_column(table, column), d.drop_column(table, column))
            }
            Delta::DropColumn { table, column } => {
                warnings.push(warning(
                    table,
                    Some(column),
                    Direction::Up,
                    UnsafeReason::DropColumn,
                ));
                (d.drop_column(table, column), d.add_column(table, column))
            }
            Delta::AlterColumn { table, old, new } => {
                let class = AlterationPolicy::classify(old, new, &self.caps);
                alteration = Some(class);
                self.render_alter(table, old, new, class, warnings)
            }
            Delta::AddIndex { table, index } => {
                self.check_index(index)?;
                (d.create_index(table, index), d.drop_index(table, index))
            }
            Delta::DropIndex { table, index } => {
                self.check_index(index)?;
                (d.drop_index(table, index), d.create_index(table, index))
            }
            Delta::AddForeignKey { table, foreign_key } => {
                self.check_constraint("foreign key", &foreign_key.name, table)?;
                (
                    d.add_foreign_key(table, foreign_key),
                    d.drop_foreign_key(table, foreign_key),
                )
            }
            Delta::DropForeignKey { table, foreign_key } => {
                self.check_constraint("foreign key", &foreign_key.name, table)?;
                (
                    d.drop_foreign_key(table, foreign_key),
                    d.add_foreign_key(table, foreign_key),
                )
            }
            Delta::AddUnique { table, unique } => {
                self.check_constraint("unique constraint", &unique.name, table)?;
                (d.add_unique(table, unique), d.drop_unique(table, unique))
            }
            Delta::DropUnique { table, unique } => {
                self.check_constraint("unique constraint", &unique.name, table)?;
                (d.drop_unique(table, unique), d.add_unique(table, unique))
            }
            Delta::AddCheck { table, check } => {
                self.check_constraint("check constraint", &check.name, table)?;
                (d.add_check(table, check), d.drop_check(table, check))
            }
            Delta::DropCheck { table, check } => {
                self.check_constraint("check constraint", &check.name, table)?;
                (d.drop_check(table, check), d.add_check(table, check))
            }
            Delta::AddExclusion { table, exclusion } => {
                self.require(self.caps.exclusion_constraints, || {
                    "exclusion constraints".to_string()
                })?;
                self.check_constraint("exclusion constraint", &exclusion.name, table)?;
                (
                    d.add_exclusion(table, exclusion),
                    d.drop_exclusion(table, exclusion),
                )
            }
            Delta::DropExclusion { table, exclusion } => {
                self.require(self.caps.exclusion_constraints, || {
                    "exclusion constraints".to_string()
                })?;
                self.check_constraint("exclusion constraint", &exclusion.name, table)?;
                (
                    d.drop_exclusion(table, exclusion),
                    d.add_exclusion(table, exclusion),
                )
            }
            Delta::AddPartition {
                table,
                strategy,
                partition,
            } => {
                self.check_partitioning(*strategy)?;
                (
                    d.create_partition(table, *strategy, partition),
                    d.drop_partition(table, partition),
                )
            }
            Delta::DropPartition {
                table,
                strategy,
                partition,
            } => {
                self.check_partitioning(*strategy)?;
                warnings.push(warning(table, None, Direction::Up, UnsafeReason::DropPartition));
                (
                    d.drop_partition(table, partition),
                    d.create_partition(table, *strategy, partition),
                )
            }
            Delta::RebuildTable { old, new } => {
                self.check_table(new)?;
                self.check_table(old)?;
                alteration = Some(Alteration::Destructive(Destructive::Rebuild));
                (
                    self.render_rebuild(old, new, Direction::Up, warnings),
                    self.render_rebuild(new, old, Direction::Down, warnings),
                )
            }
        };

        Ok(PlannedDelta {
            delta,
            alteration,
            up,
            down,
        })
    }

    fn render_alter(
        &self,
        table: &TablePath,
        old: &Column,
        new: &Column,
        class: Alteration,
        warnings: &mut Vec<UnsafeAlterationWarning>,
    ) -> (Vec<String>, Vec<String>) {
        let d = self.dialect;
        match class {
            Alteration::InPlace => (
                d.alter_column(table, old, new, Conversion::None),
                d.alter_column(table, new, old, Conversion::None),
            ),
            Alteration::SafeWiden => {
                let up = d.alter_column(table, old, new, Conversion::None);
                let down = match old.numeric_length() {
                    Some(length) if new.numeric_length().map_or(true, |l| l > length) => {
                        warnings.push(warning(
                            table,
                            Some(new),
                            Direction::Down,
                            UnsafeReason::NarrowingRevert(length),
                        ));
                        d.alter_column(table, new, old, Conversion::Truncate(length))
                    }
                    _ => d.alter_column(table, new, old, Conversion::None),
                };
                (up, down)
            }
            Alteration::SafeRetype => {
                let up = d.alter_column(table, old, new, Conversion::Cast);
                let down = if AlterationPolicy::has_known_bound(old) {
                    d.alter_column(table, new, old, Conversion::Cast)
                } else {
                    warnings.push(warning(
                        table,
                        Some(new),
                        Direction::Down,
                        UnsafeReason::UnguardedRevert,
                    ));
                    d.alter_column(table, new, old, Conversion::None)
                };
                (up, down)
            }
            Alteration::Destructive(Destructive::Truncate { length }) => {
                warnings.push(warning(
                    table,
                    Some(new),
                    Direction::Up,
                    UnsafeReason::Truncate(length),
                ));
                (
                    d.alter_column(table, old, new, Conversion::Truncate(length)),
                    d.alter_column(table, new, old, Conversion::None),
                )
            }
            Alteration::Destructive(Destructive::Rebuild) => {
                warnings.push(warning(table, Some(new), Direction::Up, UnsafeReason::Rebuild));
                warnings.push(warning(table, Some(old), Direction::Down, UnsafeReason::Rebuild));
                let mut up = d.drop_column(table, old);
                up.extend(self.readd_column(table, new));
                let mut down = d.drop_column(table, new);
                down.extend(self.readd_column(table, old));
                (up, down)
            }
        }
    }

    /// Re-adds a dropped column. Where columns can be altered, a `NOT NULL`
    /// column without a value source is filled with a transitional default
    /// that is removed right after.
    fn readd_column(&self, table: &TablePath, column: &Column) -> Vec<String> {
        let d = self.dialect;
        if !self.caps.in_place_alter_column || !needs_filler(column) {
            return d.readd_column(table, column);
        }
        let filled = Column {
            default: Some(d.transitional_value(column)),
            ..column.clone()
        };
        let mut statements = d.readd_column(table, &filled);
        statements.extend(d.alter_column(table, &filled, column, Conversion::None));
        statements
    }

    /// Renders the rebuild of `from` into the shape of `to`.
    ///
    /// Unchanged columns are copied as they are. A changed column is copied
    /// with the conversion an in-place alteration would use; when no such
    /// conversion exists its values are lost and it takes its default.
    fn render_rebuild(
        &self,
        from: &Table,
        to: &Table,
        direction: Direction,
        warnings: &mut Vec<UnsafeAlterationWarning>,
    ) -> Vec<String> {
        let d = self.dialect;
        let carry = DialectCapabilities {
            in_place_alter_column: true,
            ..self.caps
        };

        let mut columns = Vec::new();
        for column in to.columns.iter().filter(|c| c.generated.is_none()) {
            let Some(source) = from.find_column(&column.name) else {
                continue;
            };
            let conversion = if source.same_type(column) {
                Some(Conversion::None)
            } else {
                match AlterationPolicy::classify(source, column, &carry) {
                    Alteration::InPlace => Some(Conversion::None),
                    Alteration::SafeWiden | Alteration::SafeRetype => Some(Conversion::Cast),
                    Alteration::Destructive(Destructive::Truncate { length }) => {
                        let reason = match direction {
                            Direction::Up => UnsafeReason::Truncate(length),
                            Direction::Down => UnsafeReason::NarrowingRevert(length),
                        };
                        warnings.push(warning(&to.name, Some(column), direction, reason));
                        Some(Conversion::Truncate(length))
                    }
                    Alteration::Destructive(Destructive::Rebuild) => {
                        warnings.push(warning(
                            &to.name,
                            Some(column),
                            direction,
                            UnsafeReason::Rebuild,
                        ));
                        None
                    }
                }
            };
            match conversion {
                Some(conversion) => columns.push((
                    column.name.clone(),
                    d.carry_expression(source, column, conversion),
                )),
                None if needs_filler(column) => {
                    columns.push((column.name.clone(), d.transitional_value(column)));
                }
                None => {}
            }
        }

        for column in from
            .columns
            .iter()
            .filter(|c| to.find_column(&c.name).is_none())
        {
            warnings.push(warning(
                &to.name,
                Some(column),
                direction,
                UnsafeReason::DropColumn,
            ));
        }

        debug!(
            table = %to.name,
            carried = columns.len(),
            columns = to.columns.len(),
            "Planned table rebuild"
        );
        d.rebuild_table(from, to, &columns)
    }
}

/// Whether re-creating `column` needs a value to fill existing rows.
fn needs_filler(column: &Column) -> bool {
    !column.is_nullable()
        && !column.primary
        && column.default.is_none()
        && column.generated.is_none()
        && column.generation == Generation::None
}

fn warning(
    table: &TablePath,
    column: Option<&Column>,
    direction: Direction,
    reason: UnsafeReason,
) -> UnsafeAlterationWarning {
    UnsafeAlterationWarning {
        table: table.clone(),
        column: column.map(|c| c.name.clone()),
        direction,
        reason,
    }
}
