//! Schema diff engine.
//!
//! Compares a desired [`Table`] with the live one (or the absence of either)
//! and produces an ordered list of [`Delta`]s that transforms the live shape
//! into the desired shape. Diffing is a pure computation over owned
//! snapshots; it never touches the database.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dialect::DialectCapabilities;
use crate::error::Result;
use crate::policy::{Alteration, AlterationPolicy, Destructive};
use crate::schema::{
    Check, Column, Exclusion, ForeignKey, Index, PartitionDefinition, PartitionStrategy, Table,
    TablePath, Unique,
};

// ================================================================
// Public types
// ================================================================

/// One atomic structural difference between desired and live schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delta {
    /// Create a table with all its sub-objects.
    AddTable(Table),
    /// Drop a table. Carries the live definition so it can be recreated.
    DropTable(Table),
    /// Add a column.
    AddColumn {
        /// Owning table.
        table: TablePath,
        /// Column to add.
        column: Column,
    },
    /// Drop a column.
    DropColumn {
        /// Owning table.
        table: TablePath,
        /// Live column definition.
        column: Column,
    },
    /// Change one or more attributes of a column.
    AlterColumn {
        /// Owning table.
        table: TablePath,
        /// Live definition.
        old: Column,
        /// Desired definition.
        new: Column,
    },
    /// Create an index.
    AddIndex {
        /// Owning table.
        table: TablePath,
        /// Index to create.
        index: Index,
    },
    /// Drop an index.
    DropIndex {
        /// Owning table.
        table: TablePath,
        /// Live index.
        index: Index,
    },
    /// Add a foreign key.
    AddForeignKey {
        /// Owning table.
        table: TablePath,
        /// Constraint to add.
        foreign_key: ForeignKey,
    },
    /// Drop a foreign key.
    DropForeignKey {
        /// Owning table.
        table: TablePath,
        /// Live constraint.
        foreign_key: ForeignKey,
    },
    /// Add a unique constraint.
    AddUnique {
        /// Owning table.
        table: TablePath,
        /// Constraint to add.
        unique: Unique,
    },
    /// Drop a unique constraint.
    DropUnique {
        /// Owning table.
        table: TablePath,
        /// Live constraint.
        unique: Unique,
    },
    /// Add a check constraint.
    AddCheck {
        /// Owning table.
        table: TablePath,
        /// Constraint to add.
        check: Check,
    },
    /// Drop a check constraint.
    DropCheck {
        /// Owning table.
        table: TablePath,
        /// Live constraint.
        check: Check,
    },
    /// Add an exclusion constraint.
    AddExclusion {
        /// Owning table.
        table: TablePath,
        /// Constraint to add.
        exclusion: Exclusion,
    },
    /// Drop an exclusion constraint.
    DropExclusion {
        /// Owning table.
        table: TablePath,
        /// Live constraint.
        exclusion: Exclusion,
    },
    /// Add a partition to a partitioned table.
    AddPartition {
        /// Partitioned table.
        table: TablePath,
        /// Partitioning strategy of the table.
        strategy: PartitionStrategy,
        /// Partition to create.
        partition: PartitionDefinition,
    },
    /// Drop a partition of a partitioned table.
    DropPartition {
        /// Partitioned table.
        table: TablePath,
        /// Partitioning strategy of the table.
        strategy: PartitionStrategy,
        /// Live partition.
        partition: PartitionDefinition,
    },
    /// Recreate a table in its desired shape and copy the rows across.
    /// Used for column changes on engines that cannot alter a column.
    RebuildTable {
        /// Live definition.
        old: Table,
        /// Desired definition.
        new: Table,
    },
}

impl Delta {
    /// Returns the table this delta applies to.
    #[must_use]
    pub fn table(&self) -> &TablePath {
        match self {
            Self::AddTable(t) | Self::DropTable(t) => &t.name,
            Self::RebuildTable { new, .. } => &new.name,
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::AddIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::DropForeignKey { table, .. }
            | Self::AddUnique { table, .. }
            | Self::DropUnique { table, .. }
            | Self::AddCheck { table, .. }
            | Self::DropCheck { table, .. }
            | Self::AddExclusion { table, .. }
            | Self::DropExclusion { table, .. }
            | Self::AddPartition { table, .. }
            | Self::DropPartition { table, .. } => table,
        }
    }

    /// Execution phase. Deltas are emitted in ascending phase order so that
    /// dependent objects are dropped before what they depend on and created
    /// after it.
    const fn phase(&self) -> u8 {
        match self {
            Self::DropForeignKey { .. } => 0,
            Self::DropIndex { .. }
            | Self::DropUnique { .. }
            | Self::DropCheck { .. }
            | Self::DropExclusion { .. } => 1,
            Self::DropPartition { .. } => 2,
            Self::DropColumn { .. } => 3,
            Self::DropTable(_) => 4,
            Self::AlterColumn { .. } | Self::RebuildTable { .. } => 5,
            Self::AddColumn { .. } => 6,
            Self::AddTable(_) => 7,
            Self::AddPartition { .. } => 8,
            Self::AddIndex { .. }
            | Self::AddUnique { .. }
            | Self::AddCheck { .. }
            | Self::AddExclusion { .. } => 9,
            Self::AddForeignKey { .. } => 10,
        }
    }

    /// Returns a short human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::AddTable(t) => format!("Create table {}", t.name),
            Self::DropTable(t) => format!("Drop table {}", t.name),
            Self::AddColumn { table, column } => format!("Add column {}.{}", table, column.name),
            Self::DropColumn { table, column } => {
                format!("Drop column {}.{}", table, column.name)
            }
            Self::AlterColumn { table, new, .. } => format!("Alter column {}.{}", table, new.name),
            Self::AddIndex { table, index } => format!("Create index {} on {}", index.name, table),
            Self::DropIndex { table, index } => format!("Drop index {} on {}", index.name, table),
            Self::AddForeignKey { table, foreign_key } => {
                format!("Add foreign key {} on {}", foreign_key.name, table)
            }
            Self::DropForeignKey { table, foreign_key } => {
                format!("Drop foreign key {} on {}", foreign_key.name, table)
            }
            Self::AddUnique { table, unique } => {
                format!("Add unique constraint {} on {}", unique.name, table)
            }
            Self::DropUnique { table, unique } => {
                format!("Drop unique constraint {} on {}", unique.name, table)
            }
            Self::AddCheck { table, check } => {
                format!("Add check constraint {} on {}", check.name, table)
            }
            Self::DropCheck { table, check } => {
                format!("Drop check constraint {} on {}", check.name, table)
            }
            Self::AddExclusion { table, exclusion } => {
                format!("Add exclusion constraint {} on {}", exclusion.name, table)
            }
            Self::DropExclusion { table, exclusion } => {
                format!("Drop exclusion constraint {} on {}", exclusion.name, table)
            }
            Self::AddPartition {
                table, partition, ..
            } => format!("Add partition {} of {}", partition.name, table),
            Self::DropPartition {
                table, partition, ..
            } => format!("Drop partition {} of {}", partition.name, table),
            Self::RebuildTable { new, .. } => format!("Rebuild table {}", new.name),
        }
    }
}

/// Changes the diff engine detected but does not translate into DDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffWarning {
    /// The set of primary key columns changed. Requires manual intervention.
    PrimaryKeyChange {
        /// Table name.
        table: TablePath,
        /// Live primary key columns.
        old_columns: Vec<String>,
        /// Desired primary key columns.
        new_columns: Vec<String>,
    },
    /// The partition key (or partitioned-ness) of a table changed. A table
    /// cannot be repartitioned in place.
    PartitionKeyChange {
        /// Table name.
        table: TablePath,
    },
}

impl fmt::Display for DiffWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryKeyChange {
                table,
                old_columns,
                new_columns,
            } => write!(
                f,
                "primary key of {table} changed from ({}) to ({}); not migrated automatically",
                old_columns.join(", "),
                new_columns.join(", ")
            ),
            Self::PartitionKeyChange { table } => write!(
                f,
                "partitioning of {table} changed; the table must be rebuilt manually"
            ),
        }
    }
}

/// Result of comparing desired and live schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Deltas, in execution order.
    pub deltas: Vec<Delta>,
    /// Informational warnings.
    pub warnings: Vec<DiffWarning>,
}

impl SchemaDiff {
    /// Returns `true` if there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Number of deltas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deltas.len()
    }
}

/// Controls how sub-objects are matched between snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Match indices by name as well as by structure.
    pub index_names_significant: bool,
    /// Match constraints by name as well as by structure.
    pub constraint_names_significant: bool,
    /// Capabilities of the target engine. With them, column changes that
    /// must be rebuilt also recreate the objects depending on the column.
    /// Without them every column change is assumed to alter in place.
    pub capabilities: Option<DialectCapabilities>,
}

impl DiffOptions {
    /// Derives matching rules from a dialect's capabilities.
    #[must_use]
    pub const fn for_dialect(caps: &DialectCapabilities) -> Self {
        Self {
            index_names_significant: caps.index_names_significant,
            constraint_names_significant: caps.constraint_names_significant,
            capabilities: Some(*caps),
        }
    }
}

// ================================================================
// Differ
// ================================================================

/// Computes deltas between desired and live tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct Differ {
    options: DiffOptions,
}

impl Differ {
    /// Creates a differ with the given matching rules.
    #[must_use]
    pub const fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    /// Diffs a single table. Either side may be absent.
    pub fn diff_table(&self, desired: Option<&Table>, live: Option<&Table>) -> Result<SchemaDiff> {
        let mut diff = self.collect_table(desired, live)?;
        let pairs: Vec<(&Table, &Table)> = desired.zip(live).into_iter().collect();
        diff.deltas = order_deltas(self.plan_rebuilds(diff.deltas, &pairs));
        Ok(diff)
    }

    /// Diffs a set of tables. Tables are paired by qualified name; live
    /// tables without a desired counterpart are dropped.
    pub fn diff_schema(&self, desired: &[Table], live: &[Table]) -> Result<SchemaDiff> {
        let live_by_path: HashMap<&TablePath, &Table> =
            live.iter().map(|t| (&t.name, t)).collect();
        let desired_paths: HashSet<&TablePath> = desired.iter().map(|t| &t.name).collect();

        let mut diff = SchemaDiff::default();
        let mut pairs = Vec::new();
        for table in desired {
            let existing = live_by_path.get(&table.name).copied();
            let part = self.collect_table(Some(table), existing)?;
            diff.deltas.extend(part.deltas);
            diff.warnings.extend(part.warnings);
            if let Some(existing) = existing {
                pairs.push((table, existing));
            }
        }
        for table in live.iter().filter(|t| !desired_paths.contains(&t.name)) {
            let part = self.collect_table(None, Some(table))?;
            diff.deltas.extend(part.deltas);
        }

        diff.deltas = order_deltas(self.plan_rebuilds(diff.deltas, &pairs));
        debug!(deltas = diff.deltas.len(), warnings = diff.warnings.len(), "Schema diff computed");
        Ok(diff)
    }

    fn collect_table(&self, desired: Option<&Table>, live: Option<&Table>) -> Result<SchemaDiff> {
        let (desired, live) = match (desired, live) {
            (None, None) => return Ok(SchemaDiff::default()),
            (Some(desired), None) => {
                desired.validate()?;
                return Ok(SchemaDiff {
                    deltas: vec![Delta::AddTable(desired.clone())],
                    warnings: Vec::new(),
                });
            }
            (None, Some(live)) => {
                return Ok(SchemaDiff {
                    deltas: vec![Delta::DropTable(live.clone())],
                    warnings: Vec::new(),
                });
            }
            (Some(desired), Some(live)) => (desired, live),
        };
        desired.validate()?;

        let mut diff = SchemaDiff::default();
        let path = &desired.name;

        self.diff_columns(path, desired, live, &mut diff);

        let (added, dropped) = match_objects(
            &desired.indices,
            &live.indices,
            self.options.index_names_significant,
            |i| &i.name,
            Index::same_structure,
        );
        diff.deltas.extend(dropped.into_iter().map(|index| Delta::DropIndex {
            table: path.clone(),
            index: index.clone(),
        }));
        diff.deltas.extend(added.into_iter().map(|index| Delta::AddIndex {
            table: path.clone(),
            index: index.clone(),
        }));

        let names = self.options.constraint_names_significant;

        let (added, dropped) = match_objects(
            &desired.foreign_keys,
            &live.foreign_keys,
            names,
            |fk| &fk.name,
            ForeignKey::same_structure,
        );
        diff.deltas.extend(dropped.into_iter().map(|fk| Delta::DropForeignKey {
            table: path.clone(),
            foreign_key: fk.clone(),
        }));
        diff.deltas.extend(added.into_iter().map(|fk| Delta::AddForeignKey {
            table: path.clone(),
            foreign_key: fk.clone(),
        }));

        let (added, dropped) = match_objects(
            &desired.uniques,
            &live.uniques,
            names,
            |u| &u.name,
            Unique::same_structure,
        );
        diff.deltas.extend(dropped.into_iter().map(|u| Delta::DropUnique {
            table: path.clone(),
            unique: u.clone(),
        }));
        diff.deltas.extend(added.into_iter().map(|u| Delta::AddUnique {
            table: path.clone(),
            unique: u.clone(),
        }));

        let (added, dropped) = match_objects(
            &desired.checks,
            &live.checks,
            names,
            |c| &c.name,
            Check::same_structure,
        );
        diff.deltas.extend(dropped.into_iter().map(|c| Delta::DropCheck {
            table: path.clone(),
            check: c.clone(),
        }));
        diff.deltas.extend(added.into_iter().map(|c| Delta::AddCheck {
            table: path.clone(),
            check: c.clone(),
        }));

        let (added, dropped) = match_objects(
            &desired.exclusions,
            &live.exclusions,
            names,
            |e| &e.name,
            Exclusion::same_structure,
        );
        diff.deltas.extend(dropped.into_iter().map(|e| Delta::DropExclusion {
            table: path.clone(),
            exclusion: e.clone(),
        }));
        diff.deltas.extend(added.into_iter().map(|e| Delta::AddExclusion {
            table: path.clone(),
            exclusion: e.clone(),
        }));

        diff_partitions(path, desired, live, &mut diff);

        Ok(diff)
    }

    /// Adjusts the deltas for column changes that have to be rebuilt.
    ///
    /// On engines without in-place column alteration, every table with a
    /// changed column is rebuilt as a whole. Otherwise the column is dropped
    /// and re-added, so foreign keys, indices and unique constraints that
    /// cover it are dropped first and recreated last. Foreign keys in other
    /// tables that reference a rebuilt column are treated the same way on
    /// every engine. `pairs` holds the (desired, live) tables present on
    /// both sides.
    fn plan_rebuilds(&self, mut deltas: Vec<Delta>, pairs: &[(&Table, &Table)]) -> Vec<Delta> {
        const REBUILD: Alteration = Alteration::Destructive(Destructive::Rebuild);

        let Some(caps) = self.options.capabilities else {
            return deltas;
        };
        let rebuilt: Vec<(TablePath, String)> = deltas
            .iter()
            .filter_map(|delta| match delta {
                Delta::AlterColumn { table, old, new }
                    if AlterationPolicy::classify(old, new, &caps) == REBUILD =>
                {
                    Some((table.clone(), new.name.clone()))
                }
                _ => None,
            })
            .collect();
        if rebuilt.is_empty() {
            return deltas;
        }

        let whole_tables: HashSet<TablePath> = if caps.in_place_alter_column {
            HashSet::new()
        } else {
            rebuilt.iter().map(|(table, _)| table.clone()).collect()
        };
        if !whole_tables.is_empty() {
            deltas.retain(|delta| {
                matches!(delta, Delta::AddPartition { .. } | Delta::DropPartition { .. })
                    || !whole_tables.contains(delta.table())
            });
            for (desired, live) in pairs.iter().filter(|(d, _)| whole_tables.contains(&d.name)) {
                debug!(table = %desired.name, "Column change rebuilds the table");
                deltas.push(Delta::RebuildTable {
                    old: (*live).clone(),
                    new: (*desired).clone(),
                });
            }
        }

        let covers = |table: &TablePath, columns: &[String]| {
            rebuilt
                .iter()
                .any(|(t, c)| t == table && columns.contains(c))
        };
        let references = |fk: &ForeignKey| {
            rebuilt.iter().any(|(t, c)| {
                refers_to(&fk.referenced_table, t) && fk.referenced_columns.contains(c)
            })
        };

        let mut extra = Vec::new();
        for (desired, live) in pairs {
            let path = &desired.name;
            if whole_tables.contains(path) {
                continue;
            }
            let own_columns = caps.in_place_alter_column;
            let touched = |fk: &ForeignKey| {
                references(fk) || (own_columns && covers(path, &fk.columns))
            };

            for fk in live.foreign_keys.iter().filter(|fk| touched(fk)) {
                if !has_delta(&deltas, path, |d| {
                    matches!(d, Delta::DropForeignKey { foreign_key, .. } if foreign_key.name == fk.name)
                }) {
                    extra.push(Delta::DropForeignKey {
                        table: path.clone(),
                        foreign_key: fk.clone(),
                    });
                }
            }
            for fk in desired.foreign_keys.iter().filter(|fk| touched(fk)) {
                if !has_delta(&deltas, path, |d| {
                    matches!(d, Delta::AddForeignKey { foreign_key, .. } if foreign_key.name == fk.name)
                }) {
                    extra.push(Delta::AddForeignKey {
                        table: path.clone(),
                        foreign_key: fk.clone(),
                    });
                }
            }
            if !own_columns {
                continue;
            }

            for index in live.indices.iter().filter(|i| covers(path, &i.columns)) {
                if !has_delta(&deltas, path, |d| {
                    matches!(d, Delta::DropIndex { index: other, .. } if other.name == index.name)
                }) {
                    extra.push(Delta::DropIndex {
                        table: path.clone(),
                        index: index.clone(),
                    });
                }
            }
            for index in desired.indices.iter().filter(|i| covers(path, &i.columns)) {
                if !has_delta(&deltas, path, |d| {
                    matches!(d, Delta::AddIndex { index: other, .. } if other.name == index.name)
                }) {
                    extra.push(Delta::AddIndex {
                        table: path.clone(),
                        index: index.clone(),
                    });
                }
            }
            for unique in live.uniques.iter().filter(|u| covers(path, &u.columns)) {
                if !has_delta(&deltas, path, |d| {
                    matches!(d, Delta::DropUnique { unique: other, .. } if other.name == unique.name)
                }) {
                    extra.push(Delta::DropUnique {
                        table: path.clone(),
                        unique: unique.clone(),
                    });
                }
            }
            for unique in desired.uniques.iter().filter(|u| covers(path, &u.columns)) {
                if !has_delta(&deltas, path, |d| {
                    matches!(d, Delta::AddUnique { unique: other, .. } if other.name == unique.name)
                }) {
                    extra.push(Delta::AddUnique {
                        table: path.clone(),
                        unique: unique.clone(),
                    });
                }
            }
        }

        debug!(
            columns = rebuilt.len(),
            tables = whole_tables.len(),
            dependents = extra.len(),
            "Planned column rebuilds"
        );
        deltas.extend(extra);
        deltas
    }

    fn diff_columns(&self, path: &TablePath, desired: &Table, live: &Table, diff: &mut SchemaDiff) {
        let live_columns: HashMap<&str, &Column> =
            live.columns.iter().map(|c| (c.name.as_str(), c)).collect();
        let desired_columns: HashSet<&str> =
            desired.columns.iter().map(|c| c.name.as_str()).collect();

        for column in &desired.columns {
            match live_columns.get(column.name.as_str()) {
                None => diff.deltas.push(Delta::AddColumn {
                    table: path.clone(),
                    column: column.clone(),
                }),
                Some(old) if !old.same_definition(column) => {
                    diff.deltas.push(Delta::AlterColumn {
                        table: path.clone(),
                        old: (*old).clone(),
                        new: column.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        for column in live
            .columns
            .iter()
            .filter(|c| !desired_columns.contains(c.name.as_str()))
        {
            diff.deltas.push(Delta::DropColumn {
                table: path.clone(),
                column: column.clone(),
            });
        }

        let old_pk = live.primary_key();
        let new_pk = desired.primary_key();
        if old_pk != new_pk {
            diff.warnings.push(DiffWarning::PrimaryKeyChange {
                table: path.clone(),
                old_columns: old_pk.into_iter().map(String::from).collect(),
                new_columns: new_pk.into_iter().map(String::from).collect(),
            });
        }
    }
}

fn has_delta(deltas: &[Delta], table: &TablePath, found: impl Fn(&Delta) -> bool) -> bool {
    deltas.iter().any(|d| d.table() == table && found(d))
}

fn diff_partitions(path: &TablePath, desired: &Table, live: &Table, diff: &mut SchemaDiff) {
    let (desired_spec, live_spec) = match (&desired.partition, &live.partition) {
        (None, None) => return,
        (Some(d), Some(l)) if d.same_key(l) => (d, l),
        _ => {
            diff.warnings.push(DiffWarning::PartitionKeyChange {
                table: path.clone(),
            });
            return;
        }
    };

    let live_parts: HashMap<&str, &PartitionDefinition> = live_spec
        .partitions
        .iter()
        .map(|p| (p.name.as_str(), p))
        .collect();
    let desired_names: HashSet<&str> = desired_spec
        .partitions
        .iter()
        .map(|p| p.name.as_str())
        .collect();

    for partition in live_spec
        .partitions
        .iter()
        .filter(|p| !desired_names.contains(p.name.as_str()))
    {
        diff.deltas.push(Delta::DropPartition {
            table: path.clone(),
            strategy: live_spec.strategy,
            partition: partition.clone(),
        });
    }

    for partition in &desired_spec.partitions {
        match live_parts.get(partition.name.as_str()) {
            Some(existing) if *existing == partition => {}
            Some(existing) => {
                diff.deltas.push(Delta::DropPartition {
                    table: path.clone(),
                    strategy: live_spec.strategy,
                    partition: (*existing).clone(),
                });
                diff.deltas.push(Delta::AddPartition {
                    table: path.clone(),
                    strategy: desired_spec.strategy,
                    partition: partition.clone(),
                });
            }
            None => diff.deltas.push(Delta::AddPartition {
                table: path.clone(),
                strategy: desired_spec.strategy,
                partition: partition.clone(),
            }),
        }
    }
}

/// Pairs desired and live objects. Returns `(added, dropped)`.
///
/// Pass one pairs objects with equal name and structure. When names are not
/// significant, pass two pairs the leftovers by structure alone, so a
/// renamed but otherwise identical object is a no-op. An object whose name
/// matches but whose structure differs is dropped and re-added.
fn match_objects<'a, T>(
    desired: &'a [T],
    live: &'a [T],
    names_significant: bool,
    name: impl Fn(&T) -> &String,
    same_structure: impl Fn(&T, &T) -> bool,
) -> (Vec<&'a T>, Vec<&'a T>) {
    let mut live_taken = vec![false; live.len()];
    let mut desired_taken = vec![false; desired.len()];

    for (i, d) in desired.iter().enumerate() {
        if let Some(j) = (0..live.len())
            .find(|&j| !live_taken[j] && name(&live[j]) == name(d) && same_structure(d, &live[j]))
        {
            live_taken[j] = true;
            desired_taken[i] = true;
        }
    }

    if !names_significant {
        for (i, d) in desired.iter().enumerate() {
            if desired_taken[i] {
                continue;
            }
            if let Some(j) = (0..live.len()).find(|&j| !live_taken[j] && same_structure(d, &live[j]))
            {
                live_taken[j] = true;
                desired_taken[i] = true;
            }
        }
    }

    let added = desired
        .iter()
        .zip(&desired_taken)
        .filter(|(_, taken)| !**taken)
        .map(|(d, _)| d)
        .collect();
    let dropped = live
        .iter()
        .zip(&live_taken)
        .filter(|(_, taken)| !**taken)
        .map(|(l, _)| l)
        .collect();
    (added, dropped)
}

// ================================================================
// Ordering
// ================================================================

fn refers_to(reference: &TablePath, table: &TablePath) -> bool {
    reference.name == table.name
        && match (&reference.schema, &table.schema) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
}

/// Orders tables so that referenced tables come before referencing ones.
/// Tables caught in a reference cycle keep their input order.
fn topological(tables: Vec<Table>) -> Vec<Table> {
    let mut remaining = tables;
    let mut ordered: Vec<Table> = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|candidate| {
            candidate.dependencies().iter().all(|dep| {
                !remaining
                    .iter()
                    .any(|other| other.name != candidate.name && refers_to(dep, &other.name))
            })
        });
        let next = remaining.remove(ready.unwrap_or(0));
        ordered.push(next);
    }
    ordered
}

/// Sorts deltas into execution order.
fn order_deltas(deltas: Vec<Delta>) -> Vec<Delta> {
    let mut added = Vec::new();
    let mut dropped = Vec::new();
    let mut rest = Vec::new();
    for delta in deltas {
        match delta {
            Delta::AddTable(t) => added.push(t),
            Delta::DropTable(t) => dropped.push(t),
            other => rest.push(other),
        }
    }

    rest.extend(topological(added).into_iter().map(Delta::AddTable));
    rest.extend(topological(dropped).into_iter().rev().map(Delta::DropTable));
    rest.sort_by_key(Delta::phase);
    rest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Dialect, PostgresDialect, SqliteDialect};
    use crate::error::SyncError;
    use crate::schema::{IndexMethod, PartitionBound, PartitionSpec};

    fn post() -> Table {
        Table::new("post")
            .column(Column::new("id", "integer").primary().increment())
            .column(Column::new("title", "varchar").length(50).not_null())
            .column(Column::new("author_id", "integer"))
            .index(Index::new("idx_post_title", vec!["title".into()]))
            .foreign_key(ForeignKey::new(
                "fk_post_author",
                vec!["author_id".into()],
                "author",
                vec!["id".into()],
            ))
    }

    #[test]
    fn test_identical_tables_produce_nothing() {
        let table = post();
        let diff = Differ::default()
            .diff_table(Some(&table.clone()), Some(&table))
            .unwrap();
        assert!(diff.is_empty());
        assert!(diff.warnings.is_empty());
    }

    #[test]
    fn test_missing_live_table_is_single_add() {
        let table = post();
        let diff = Differ::default().diff_table(Some(&table), None).unwrap();
        assert_eq!(diff.deltas, vec![Delta::AddTable(table)]);
    }

    #[test]
    fn test_missing_desired_table_is_single_drop() {
        let table = post();
        let diff = Differ::default().diff_table(None, Some(&table)).unwrap();
        assert_eq!(diff.deltas, vec![Delta::DropTable(table)]);
    }

    #[test]
    fn test_multiple_field_changes_yield_one_alter() {
        let live = post();
        let mut desired = post();
        desired.columns[1] = Column::new("title", "text").default("''");
        let diff = Differ::default().diff_table(Some(&desired), Some(&live)).unwrap();
        assert_eq!(diff.len(), 1);
        assert!(matches!(
            &diff.deltas[0],
            Delta::AlterColumn { old, new, .. } if old.name == "title" && new.data_type == "text"
        ));
    }

    #[test]
    fn test_add_and_drop_columns() {
        let live = post();
        let desired = Table::new("post")
            .column(Column::new("id", "integer").primary().increment())
            .column(Column::new("title", "varchar").length(50).not_null())
            .column(Column::new("body", "text"))
            .index(Index::new("idx_post_title", vec!["title".into()]));
        let diff = Differ::default().diff_table(Some(&desired), Some(&live)).unwrap();
        let kinds: Vec<String> = diff.deltas.iter().map(Delta::description).collect();
        assert_eq!(
            kinds,
            vec![
                "Drop foreign key fk_post_author on post",
                "Drop column post.author_id",
                "Add column post.body",
            ]
        );
    }

    #[test]
    fn test_renamed_index_is_noop() {
        let live = post();
        let mut desired = post();
        desired.indices[0].name = "post_title_idx".into();
        let diff = Differ::default().diff_table(Some(&desired), Some(&live)).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_renamed_index_with_significant_names() {
        let live = post();
        let mut desired = post();
        desired.indices[0].name = "post_title_idx".into();
        let differ = Differ::new(DiffOptions {
            index_names_significant: true,
            constraint_names_significant: true,
            ..DiffOptions::default()
        });
        let diff = differ.diff_table(Some(&desired), Some(&live)).unwrap();
        assert_eq!(diff.len(), 2);
        assert!(matches!(diff.deltas[0], Delta::DropIndex { .. }));
        assert!(matches!(diff.deltas[1], Delta::AddIndex { .. }));
    }

    #[test]
    fn test_same_name_different_structure_is_recreated() {
        let live = post();
        let mut desired = post();
        desired.indices[0] = Index::new("idx_post_title", vec!["title".into()])
            .method(IndexMethod::Hash);
        let diff = Differ::default().diff_table(Some(&desired), Some(&live)).unwrap();
        assert_eq!(diff.len(), 2);
        assert!(matches!(&diff.deltas[0], Delta::DropIndex { index, .. } if index.method == IndexMethod::BTree));
        assert!(matches!(&diff.deltas[1], Delta::AddIndex { index, .. } if index.method == IndexMethod::Hash));
    }

    #[test]
    fn test_foreign_key_dropped_before_column() {
        let live = post();
        let desired = Table::new("post")
            .column(Column::new("id", "integer").primary().increment())
            .column(Column::new("title", "varchar").length(50).not_null())
            .index(Index::new("idx_post_title", vec!["title".into()]));
        let diff = Differ::default().diff_table(Some(&desired), Some(&live)).unwrap();
        let fk_pos = diff
            .deltas
            .iter()
            .position(|d| matches!(d, Delta::DropForeignKey { .. }))
            .unwrap();
        let col_pos = diff
            .deltas
            .iter()
            .position(|d| matches!(d, Delta::DropColumn { column, .. } if column.name == "author_id"))
            .unwrap();
        assert!(fk_pos < col_pos);
    }

    #[test]
    fn test_foreign_key_added_after_column() {
        let live = Table::new("post").column(Column::new("id", "integer").primary());
        let desired = live
            .clone()
            .column(Column::new("author_id", "integer"))
            .foreign_key(ForeignKey::new(
                "fk_post_author",
                vec!["author_id".into()],
                "author",
                vec!["id".into()],
            ));
        let diff = Differ::default().diff_table(Some(&desired), Some(&live)).unwrap();
        assert!(matches!(diff.deltas[0], Delta::AddColumn { .. }));
        assert!(matches!(diff.deltas[1], Delta::AddForeignKey { .. }));
    }

    #[test]
    fn test_column_rebuild_recreates_covering_index() {
        let live = post();
        let mut desired = post();
        desired.columns[1] = Column::new("title", "integer").not_null();
        let differ = Differ::new(DiffOptions::for_dialect(&PostgresDialect::new().capabilities()));
        let diff = differ.diff_table(Some(&desired), Some(&live)).unwrap();
        let kinds: Vec<String> = diff.deltas.iter().map(Delta::description).collect();
        assert_eq!(
            kinds,
            vec![
                "Drop index idx_post_title on post",
                "Alter column post.title",
                "Create index idx_post_title on post",
            ]
        );

        // A widening keeps the column, so nothing around it moves.
        desired.columns[1] = Column::new("title", "varchar").length(80).not_null();
        let diff = differ.diff_table(Some(&desired), Some(&live)).unwrap();
        assert_eq!(diff.len(), 1);
    }

    #[test]
    fn test_column_change_rebuilds_table_without_in_place_alter() {
        let live = post();
        let mut desired = post().column(Column::new("body", "text"));
        desired.columns[1] = Column::new("title", "varchar").length(100).not_null();
        let differ = Differ::new(DiffOptions::for_dialect(&SqliteDialect::new().capabilities()));
        let diff = differ.diff_table(Some(&desired), Some(&live)).unwrap();
        assert_eq!(
            diff.deltas,
            vec![Delta::RebuildTable {
                old: live.clone(),
                new: desired,
            }]
        );

        // Without a column change other deltas stay as they are.
        let desired = post().column(Column::new("body", "text"));
        let diff = differ.diff_table(Some(&desired), Some(&live)).unwrap();
        assert!(matches!(diff.deltas.as_slice(), [Delta::AddColumn { .. }]));
    }

    #[test]
    fn test_referencing_foreign_keys_follow_rebuilt_column() {
        let author = |id_type: &str| {
            Table::new("author").column(Column::new("id", id_type).primary())
        };
        let mut desired_post = post();
        desired_post.columns[2] = Column::new("author_id", "uuid");
        let differ = Differ::new(DiffOptions::for_dialect(&PostgresDialect::new().capabilities()));
        let diff = differ
            .diff_schema(&[author("uuid"), desired_post], &[author("integer"), post()])
            .unwrap();

        let drops = diff
            .deltas
            .iter()
            .filter(|d| matches!(d, Delta::DropForeignKey { .. }))
            .count();
        assert_eq!(drops, 1);
        assert!(matches!(diff.deltas.first(), Some(Delta::DropForeignKey { .. })));
        assert!(matches!(diff.deltas.last(), Some(Delta::AddForeignKey { .. })));
    }

    #[test]
    fn test_schema_creates_in_dependency_order() {
        let author = Table::new("author").column(Column::new("id", "integer").primary());
        let desired = vec![post(), author.clone()];
        let diff = Differ::default().diff_schema(&desired, &[]).unwrap();
        let order: Vec<&str> = diff.deltas.iter().map(|d| d.table().name.as_str()).collect();
        assert_eq!(order, vec!["author", "post"]);

        let diff = Differ::default().diff_schema(&[], &desired).unwrap();
        let order: Vec<&str> = diff.deltas.iter().map(|d| d.table().name.as_str()).collect();
        assert_eq!(order, vec!["post", "author"]);
    }

    #[test]
    fn test_primary_key_change_warns() {
        let live = Table::new("t").column(Column::new("a", "integer").primary());
        let desired = Table::new("t").column(Column::new("a", "integer").not_null());
        let diff = Differ::default().diff_table(Some(&desired), Some(&live)).unwrap();
        assert!(diff.is_empty());
        assert_eq!(diff.warnings.len(), 1);
        assert!(matches!(diff.warnings[0], DiffWarning::PrimaryKeyChange { .. }));
    }

    #[test]
    fn test_malformed_partition_is_ambiguous() {
        let mut spec = PartitionSpec::by_columns(PartitionStrategy::Range, vec!["a".into()]);
        spec.expression = Some("a + 1".into());
        let desired = Table::new("t")
            .column(Column::new("a", "integer"))
            .partition_by(spec);
        let result = Differ::default().diff_table(Some(&desired), None);
        assert!(matches!(result, Err(SyncError::DiffAmbiguity(_))));
    }

    #[test]
    fn test_partition_changes() {
        let range = |name: &str, from: &str, to: &str| {
            PartitionDefinition::new(
                name,
                PartitionBound::Range {
                    from: vec![from.into()],
                    to: vec![to.into()],
                },
            )
        };
        let live = Table::new("event").column(Column::new("day", "date")).partition_by(
            PartitionSpec::by_columns(PartitionStrategy::Range, vec!["day".into()])
                .partition(range("p1", "'2024-01-01'", "'2025-01-01'"))
                .partition(range("p2", "'2025-01-01'", "'2026-01-01'")),
        );
        let desired = Table::new("event").column(Column::new("day", "date")).partition_by(
            PartitionSpec::by_columns(PartitionStrategy::Range, vec!["day".into()])
                .partition(range("p2", "'2025-01-01'", "'2026-01-01'"))
                .partition(range("p3", "'2026-01-01'", "'2027-01-01'")),
        );
        let diff = Differ::default().diff_table(Some(&desired), Some(&live)).unwrap();
        assert_eq!(diff.len(), 2);
        assert!(matches!(&diff.deltas[0], Delta::DropPartition { partition, .. } if partition.name == "p1"));
        assert!(matches!(&diff.deltas[1], Delta::AddPartition { partition, .. } if partition.name == "p3"));

        let unpartitioned = Table::new("event").column(Column::new("day", "date"));
        let diff = Differ::default()
            .diff_table(Some(&desired), Some(&unpartitioned))
            .unwrap();
        assert!(diff.is_empty());
        assert_eq!(
            diff.warnings,
            vec![DiffWarning::PartitionKeyChange {
                table: TablePath::new("event")
            }]
        );
    }
}
