//! SQLite dialect.
//!
//! SQLite cannot alter a column or add a constraint to an existing table,
//! so column changes are always rebuilt and constraints only ever appear
//! inside `CREATE TABLE`.

use super::{Dialect, DialectCapabilities};
use crate::schema::{Column, IndexMethod, Table};

/// SQLite dialect for DDL generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            in_place_alter_column: false,
            transactional_ddl: true,
            add_constraint: false,
            exclusion_constraints: false,
            partial_indexes: true,
            partitioning: false,
            hash_partitioning: false,
            index_methods: &[IndexMethod::BTree],
            index_names_significant: false,
            constraint_names_significant: false,
        }
    }

    fn increment_keyword(&self) -> &'static str {
        " AUTOINCREMENT"
    }

    fn generation_clause(&self, _column: &Column) -> Option<String> {
        None
    }

    fn table_comments(&self, _table: &Table) -> Vec<String> {
        Vec::new()
    }
}
