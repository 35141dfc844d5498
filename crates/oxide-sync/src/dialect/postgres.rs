//! PostgreSQL dialect.

use super::{Dialect, DialectCapabilities};
use crate::schema::{Column, Generation, IndexMethod};

const INDEX_METHODS: &[IndexMethod] = &[
    IndexMethod::BTree,
    IndexMethod::Hash,
    IndexMethod::Gist,
    IndexMethod::SpGist,
    IndexMethod::Gin,
    IndexMethod::Brin,
];

/// PostgreSQL dialect for DDL generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            in_place_alter_column: true,
            transactional_ddl: true,
            add_constraint: true,
            exclusion_constraints: true,
            partial_indexes: true,
            partitioning: true,
            hash_partitioning: true,
            index_methods: INDEX_METHODS,
            index_names_significant: false,
            constraint_names_significant: false,
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    // Auto-increment is expressed through the serial pseudo-types.
    fn definition_type(&self, column: &Column) -> String {
        if column.generation == Generation::Increment && !column.array {
            match column.canonical_type().as_str() {
                "smallint" => return "smallserial".to_string(),
                "integer" => return "serial".to_string(),
                "bigint" => return "bigserial".to_string(),
                _ => {}
            }
        }
        self.full_type_literal(column)
    }
}
