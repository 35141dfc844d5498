//! MySQL dialect.
//!
//! Generation only: there is no MySQL executor or introspector in this
//! crate. Column alterations use `MODIFY COLUMN`, which restates the whole
//! column definition, and shrinking a string column truncates the data with
//! an explicit `UPDATE` first.

use super::{Conversion, Dialect, DialectCapabilities};
use crate::schema::{
    Check, Column, ForeignKey, Generation, Index, IndexMethod, PartitionBound,
    PartitionDefinition, PartitionSpec, PartitionStrategy, Table, TablePath, Unique,
};

/// MySQL dialect for DDL generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn partition_definition(&self, partition: &PartitionDefinition) -> String {
        let mut sql = format!("PARTITION {}", self.quote_identifier(&partition.name));
        let bound = self.partition_bound(&partition.bound);
        if !bound.is_empty() {
            sql.push(' ');
            sql.push_str(&bound);
        }
        if let Some(ref tablespace) = partition.tablespace {
            sql.push_str(&format!(" TABLESPACE {}", self.quote_identifier(tablespace)));
        }
        sql
    }
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            in_place_alter_column: true,
            transactional_ddl: false,
            add_constraint: true,
            exclusion_constraints: false,
            partial_indexes: false,
            partitioning: true,
            hash_partitioning: true,
            index_methods: &[IndexMethod::BTree, IndexMethod::Hash],
            index_names_significant: true,
            constraint_names_significant: true,
        }
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn increment_keyword(&self) -> &'static str {
        " AUTO_INCREMENT"
    }

    fn generation_clause(&self, column: &Column) -> Option<String> {
        match column.generation {
            Generation::Uuid if column.default.is_none() => Some("DEFAULT (uuid())".to_string()),
            _ => None,
        }
    }

    fn table_options(&self, table: &Table) -> Option<String> {
        let mut options = Vec::new();
        if let Some(ref engine) = table.engine {
            options.push(format!("ENGINE={engine}"));
        }
        if let Some(ref comment) = table.comment {
            options.push(format!("COMMENT={}", self.quote_literal(comment)));
        }
        (!options.is_empty()).then(|| options.join(" "))
    }

    fn table_comments(&self, _table: &Table) -> Vec<String> {
        Vec::new()
    }

    fn alter_column(
        &self,
        table: &TablePath,
        _old: &Column,
        new: &Column,
        conversion: Conversion,
    ) -> Vec<String> {
        let mut statements = Vec::new();
        if let Conversion::Truncate(length) = conversion {
            let column = self.quote_identifier(&new.name);
            statements.push(format!(
                "UPDATE {} SET {column} = LEFT({column}, {length})",
                self.escape_table_path(table)
            ));
        }
        statements.push(format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.escape_table_path(table),
            self.column_definition(new, false)
        ));
        statements
    }

    fn create_index(&self, table: &TablePath, index: &Index) -> Vec<String> {
        let mut sql = String::from("CREATE ");
        if index.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");
        sql.push_str(&self.quote_identifier(&index.name));
        if index.method != IndexMethod::BTree {
            sql.push_str(&format!(" USING {}", index.method.as_str().to_ascii_uppercase()));
        }
        sql.push_str(" ON ");
        sql.push_str(&self.escape_table_path(table));
        let cols: Vec<String> = index
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        sql.push_str(&format!(" ({})", cols.join(", ")));
        vec![sql]
    }

    fn drop_index(&self, table: &TablePath, index: &Index) -> Vec<String> {
        vec![format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(&index.name),
            self.escape_table_path(table)
        )]
    }

    fn drop_foreign_key(&self, table: &TablePath, fk: &ForeignKey) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.escape_table_path(table),
            self.quote_identifier(&fk.name)
        )]
    }

    fn drop_unique(&self, table: &TablePath, unique: &Unique) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP INDEX {}",
            self.escape_table_path(table),
            self.quote_identifier(&unique.name)
        )]
    }

    fn drop_check(&self, table: &TablePath, check: &Check) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP CHECK {}",
            self.escape_table_path(table),
            self.quote_identifier(&check.name)
        )]
    }

    fn inline_partitions(&self) -> bool {
        true
    }

    fn partition_clause(&self, spec: &PartitionSpec) -> String {
        let mut sql = match spec.expression {
            Some(ref expression) if spec.columns.is_empty() => {
                format!("PARTITION BY {} ({expression})", spec.strategy.as_str())
            }
            _ => {
                let cols: Vec<String> = spec
                    .columns
                    .iter()
                    .map(|c| self.quote_identifier(c))
                    .collect();
                match spec.strategy {
                    PartitionStrategy::Hash => format!("PARTITION BY HASH ({})", cols.join(", ")),
                    strategy => format!(
                        "PARTITION BY {} COLUMNS({})",
                        strategy.as_str(),
                        cols.join(", ")
                    ),
                }
            }
        };
        if !spec.partitions.is_empty() {
            let parts: Vec<String> = spec
                .partitions
                .iter()
                .map(|p| self.partition_definition(p))
                .collect();
            sql.push_str(&format!(" ({})", parts.join(", ")));
        }
        sql
    }

    fn partition_bound(&self, bound: &PartitionBound) -> String {
        match bound {
            PartitionBound::Range { to, .. } => format!("VALUES LESS THAN ({})", to.join(", ")),
            PartitionBound::List { values } => format!("VALUES IN ({})", values.join(", ")),
            PartitionBound::Hash { .. } => String::new(),
            PartitionBound::Default => "VALUES LESS THAN (MAXVALUE)".to_string(),
        }
    }

    fn create_partition(
        &self,
        table: &TablePath,
        _strategy: PartitionStrategy,
        partition: &PartitionDefinition,
    ) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD PARTITION ({})",
            self.escape_table_path(table),
            self.partition_definition(partition)
        )]
    }

    fn drop_partition(&self, table: &TablePath, partition: &PartitionDefinition) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP PARTITION {}",
            self.escape_table_path(table),
            self.quote_identifier(&partition.name)
        )]
    }
}
