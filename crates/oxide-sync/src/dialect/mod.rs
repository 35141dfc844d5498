//! Database dialect implementations.
//!
//! A dialect renders schema changes into statements for one engine. The
//! default methods of [`Dialect`] hold the statement skeletons shared by most
//! engines; dialects override the pieces where their grammar differs.
//!
//! What an engine can do at all is described by [`DialectCapabilities`].
//! The DDL generator consults the capabilities before calling into a
//! dialect, so rendering methods never have to refuse an operation.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::error::{Result, SyncError};
use crate::schema::{
    Check, Column, Exclusion, ForeignKey, ForeignKeyAction, Generation, Index, IndexMethod,
    PartitionBound, PartitionDefinition, PartitionSpec, PartitionStrategy, Table, TablePath,
    Unique,
};

/// Declarative description of what an engine supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectCapabilities {
    /// `ALTER COLUMN ... TYPE` (or equivalent) preserving data.
    pub in_place_alter_column: bool,
    /// DDL statements participate in transactions.
    pub transactional_ddl: bool,
    /// Constraints can be added to or dropped from an existing table.
    pub add_constraint: bool,
    /// Exclusion constraints exist.
    pub exclusion_constraints: bool,
    /// Indices may carry a `WHERE` predicate.
    pub partial_indexes: bool,
    /// Declarative table partitioning.
    pub partitioning: bool,
    /// `PARTITION BY HASH`.
    pub hash_partitioning: bool,
    /// Index methods the engine accepts.
    pub index_methods: &'static [IndexMethod],
    /// Whether two indices differing only by name are different objects.
    pub index_names_significant: bool,
    /// Whether two constraints differing only by name are different objects.
    pub constraint_names_significant: bool,
}

impl DialectCapabilities {
    /// Returns whether the given index method is available.
    #[must_use]
    pub fn supports_index_method(&self, method: &IndexMethod) -> bool {
        self.index_methods.contains(method)
    }
}

/// How column data is carried across a type change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Let the engine convert implicitly.
    None,
    /// Explicit cast to the new type.
    Cast,
    /// Explicit truncation to the given number of characters.
    Truncate(u64),
}

/// Trait for database-specific DDL rendering.
pub trait Dialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the capability table of this dialect.
    fn capabilities(&self) -> DialectCapabilities;

    /// Returns the identifier quote character.
    fn quote_char(&self) -> char {
        '"'
    }

    /// Quotes an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        let q = self.quote_char();
        let escaped = name.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// Quotes a possibly schema-qualified table name.
    fn escape_table_path(&self, path: &TablePath) -> String {
        match &path.schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(&path.name)
            ),
            None => self.quote_identifier(&path.name),
        }
    }

    /// Renders a string literal.
    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Returns the bind placeholder for the 1-based parameter `index`.
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Returns the base type name used for a column.
    fn type_name(&self, column: &Column) -> String {
        column.data_type.trim().to_ascii_lowercase()
    }

    /// Renders the full type of a column, including length, precision and
    /// array suffix.
    fn full_type_literal(&self, column: &Column) -> String {
        let mut sql = self.type_name(column);
        if let Some(length) = column.normalized_length() {
            sql.push_str(&format!("({length})"));
        } else if let Some(precision) = column.precision {
            match column.scale {
                Some(scale) => sql.push_str(&format!("({precision}, {scale})")),
                None => sql.push_str(&format!("({precision})")),
            }
        }
        if column.array {
            sql.push_str("[]");
        }
        sql
    }

    /// Renders the type used in a column definition. Dialects that express
    /// generation through the type (serial types) override this.
    fn definition_type(&self, column: &Column) -> String {
        self.full_type_literal(column)
    }

    /// Keyword(s) appended to a primary key column with increment generation.
    fn increment_keyword(&self) -> &'static str {
        ""
    }

    /// Renders the generation clause of a column, if any.
    fn generation_clause(&self, column: &Column) -> Option<String> {
        match column.generation {
            Generation::Identity => Some("GENERATED BY DEFAULT AS IDENTITY".to_string()),
            Generation::Uuid if column.default.is_none() => {
                Some("DEFAULT gen_random_uuid()".to_string())
            }
            _ => None,
        }
    }

    /// Generates a column definition.
    ///
    /// `inline_primary` renders `PRIMARY KEY` on the column itself, used when
    /// the table has a single-column primary key.
    fn column_definition(&self, column: &Column, inline_primary: bool) -> String {
        let mut sql = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.definition_type(column)
        );

        if inline_primary && column.primary {
            sql.push_str(" PRIMARY KEY");
            if column.generation == Generation::Increment {
                sql.push_str(self.increment_keyword());
            }
        } else if !column.is_nullable() {
            sql.push_str(" NOT NULL");
        }

        if let Some(ref expression) = column.generated {
            sql.push_str(&format!(" GENERATED ALWAYS AS ({expression}) STORED"));
        } else if let Some(ref default) = column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }

        if let Some(clause) = self.generation_clause(column) {
            sql.push(' ');
            sql.push_str(&clause);
        }

        sql
    }

    /// Generates the `CREATE TABLE` statement and the statements that must
    /// follow it (indices, partitions, comments).
    fn create_table(&self, table: &Table) -> Vec<String> {
        let primary = table.primary_key();
        let inline_primary = primary.len() == 1;

        let mut sql = String::from("CREATE TABLE ");
        sql.push_str(&self.escape_table_path(&table.name));
        sql.push_str(" (\n");

        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("    {}", self.column_definition(c, inline_primary)))
            .collect();

        if primary.len() > 1 {
            let cols: Vec<String> = primary.iter().map(|c| self.quote_identifier(c)).collect();
            parts.push(format!("    PRIMARY KEY ({})", cols.join(", ")));
        }
        for unique in &table.uniques {
            parts.push(format!("    {}", self.unique_constraint(unique)));
        }
        for check in &table.checks {
            parts.push(format!("    {}", self.check_constraint(check)));
        }
        for exclusion in &table.exclusions {
            parts.push(format!("    {}", self.exclusion_constraint(exclusion)));
        }
        for fk in &table.foreign_keys {
            parts.push(format!("    {}", self.foreign_key_constraint(fk)));
        }

        sql.push_str(&parts.join(",\n"));
        sql.push_str("\n)");

        if let Some(options) = self.table_options(table) {
            sql.push(' ');
            sql.push_str(&options);
        }
        if let Some(ref spec) = table.partition {
            sql.push(' ');
            sql.push_str(&self.partition_clause(spec));
        }

        let mut statements = vec![sql];
        for index in &table.indices {
            statements.extend(self.create_index(&table.name, index));
        }
        if let Some(spec) = table.partition.as_ref().filter(|_| !self.inline_partitions()) {
            for partition in &spec.partitions {
                statements.extend(self.create_partition(&table.name, spec.strategy, partition));
            }
        }
        statements.extend(self.table_comments(table));
        statements
    }

    /// Trailing table options such as `ENGINE=...`.
    fn table_options(&self, _table: &Table) -> Option<String> {
        None
    }

    /// Comment statements issued after `CREATE TABLE`.
    fn table_comments(&self, table: &Table) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some(ref comment) = table.comment {
            statements.push(format!(
                "COMMENT ON TABLE {} IS {}",
                self.escape_table_path(&table.name),
                self.quote_literal(comment)
            ));
        }
        for column in &table.columns {
            if let Some(ref comment) = column.comment {
                statements.push(format!(
                    "COMMENT ON COLUMN {}.{} IS {}",
                    self.escape_table_path(&table.name),
                    self.quote_identifier(&column.name),
                    self.quote_literal(comment)
                ));
            }
        }
        statements
    }

    /// Generates SQL for DROP TABLE.
    fn drop_table(&self, path: &TablePath) -> Vec<String> {
        vec![format!("DROP TABLE {}", self.escape_table_path(path))]
    }

    /// Generates SQL for ADD COLUMN.
    fn add_column(&self, table: &TablePath, column: &Column) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.escape_table_path(table),
            self.column_definition(column, false)
        )]
    }

    /// Generates SQL for DROP COLUMN.
    fn drop_column(&self, table: &TablePath, column: &Column) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.escape_table_path(table),
            self.quote_identifier(&column.name)
        )]
    }

    /// Generates SQL re-adding a rebuilt column. A primary key column keeps
    /// its key.
    fn readd_column(&self, table: &TablePath, column: &Column) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.escape_table_path(table),
            self.column_definition(column, true)
        )]
    }

    /// Placeholder value written into a `NOT NULL` column whose previous
    /// values cannot be carried over.
    fn transitional_value(&self, column: &Column) -> String {
        match column.canonical_type().as_str() {
            "tinyint" | "smallint" | "integer" | "mediumint" | "bigint" | "numeric" | "real"
            | "double precision" | "float" => "0".to_string(),
            "boolean" => "false".to_string(),
            "date" => "CURRENT_DATE".to_string(),
            "timestamp" | "timestamptz" | "datetime" => "CURRENT_TIMESTAMP".to_string(),
            _ => "''".to_string(),
        }
    }

    /// Renders the expression that copies `source` into `target` while a
    /// table is rebuilt.
    fn carry_expression(&self, source: &Column, target: &Column, conversion: Conversion) -> String {
        let column = self.quote_identifier(&source.name);
        match conversion {
            Conversion::None => column,
            Conversion::Cast => format!("CAST({column} AS {})", self.full_type_literal(target)),
            Conversion::Truncate(length) => format!("substr({column}, 1, {length})"),
        }
    }

    /// Generates SQL renaming a table within its schema.
    fn rename_table(&self, from: &TablePath, to: &TablePath) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            self.escape_table_path(from),
            self.quote_identifier(&to.name)
        )]
    }

    /// Recreates `old` in the shape of `new`.
    ///
    /// The new shape is created under a staging name, `columns` pairs each
    /// target column with the expression reading its value from `old`, then
    /// the old table is dropped, the staging table takes its name and the
    /// indices are created again.
    fn rebuild_table(&self, old: &Table, new: &Table, columns: &[(String, String)]) -> Vec<String> {
        let staging = Table {
            name: TablePath {
                schema: new.name.schema.clone(),
                name: format!("_new_{}", new.name.name),
            },
            indices: Vec::new(),
            comment: None,
            ..new.clone()
        };

        let mut statements = self.create_table(&staging);
        if !columns.is_empty() {
            let targets: Vec<String> = columns
                .iter()
                .map(|(name, _)| self.quote_identifier(name))
                .collect();
            let sources: Vec<&str> = columns.iter().map(|(_, source)| source.as_str()).collect();
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.escape_table_path(&staging.name),
                targets.join(", "),
                sources.join(", "),
                self.escape_table_path(&old.name)
            ));
        }
        statements.extend(self.drop_table(&old.name));
        statements.extend(self.rename_table(&staging.name, &new.name));
        for index in &new.indices {
            statements.extend(self.create_index(&new.name, index));
        }
        statements
    }

    /// Renders the data conversion clause of a type change.
    fn conversion_clause(&self, column: &str, new: &Column, conversion: Conversion) -> String {
        match conversion {
            Conversion::None => String::new(),
            Conversion::Cast => format!(
                " USING {}::{}",
                self.quote_identifier(column),
                self.full_type_literal(new)
            ),
            Conversion::Truncate(length) => format!(
                " USING substring({}, 1, {length})",
                self.quote_identifier(column)
            ),
        }
    }

    /// Generates the in-place alteration of a column from `old` to `new`.
    ///
    /// Emits a type change only when the type differs, followed by default
    /// and nullability changes.
    fn alter_column(
        &self,
        table: &TablePath,
        old: &Column,
        new: &Column,
        conversion: Conversion,
    ) -> Vec<String> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.escape_table_path(table),
            self.quote_identifier(&new.name)
        );
        let mut statements = Vec::new();

        if !old.same_type(new) {
            statements.push(format!(
                "{prefix} TYPE {}{}",
                self.full_type_literal(new),
                self.conversion_clause(&new.name, new, conversion)
            ));
        }

        if crate::schema::normalize_expression(old.default.as_deref())
            != crate::schema::normalize_expression(new.default.as_deref())
        {
            match new.default {
                Some(ref default) => statements.push(format!("{prefix} SET DEFAULT {default}")),
                None => statements.push(format!("{prefix} DROP DEFAULT")),
            }
        }

        if old.is_nullable() != new.is_nullable() {
            if new.is_nullable() {
                statements.push(format!("{prefix} DROP NOT NULL"));
            } else {
                statements.push(format!("{prefix} SET NOT NULL"));
            }
        }

        statements
    }

    /// Returns the qualified name of an index living next to `table`.
    fn index_path(&self, table: &TablePath, index: &Index) -> String {
        self.escape_table_path(&TablePath {
            schema: table.schema.clone(),
            name: index.name.clone(),
        })
    }

    /// Generates SQL for CREATE INDEX.
    fn create_index(&self, table: &TablePath, index: &Index) -> Vec<String> {
        let mut sql = String::from("CREATE ");
        if index.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");
        sql.push_str(&self.quote_identifier(&index.name));
        sql.push_str(" ON ");
        sql.push_str(&self.escape_table_path(table));

        if index.method != IndexMethod::BTree {
            sql.push_str(&format!(" USING {}", index.method.as_str()));
        }

        sql.push_str(" (");
        let cols: Vec<String> = index
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        sql.push_str(&cols.join(", "));
        sql.push(')');

        if let Some(ref predicate) = index.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }

        vec![sql]
    }

    /// Generates SQL for DROP INDEX.
    fn drop_index(&self, table: &TablePath, index: &Index) -> Vec<String> {
        vec![format!("DROP INDEX {}", self.index_path(table, index))]
    }

    /// Renders a foreign key as a table constraint.
    fn foreign_key_constraint(&self, fk: &ForeignKey) -> String {
        let mut sql = format!("CONSTRAINT {} FOREIGN KEY (", self.quote_identifier(&fk.name));
        let cols: Vec<String> = fk.columns.iter().map(|c| self.quote_identifier(c)).collect();
        sql.push_str(&cols.join(", "));
        sql.push_str(") REFERENCES ");
        sql.push_str(&self.escape_table_path(&fk.referenced_table));
        sql.push_str(" (");
        let ref_cols: Vec<String> = fk
            .referenced_columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        sql.push_str(&ref_cols.join(", "));
        sql.push(')');

        if fk.on_delete != ForeignKeyAction::NoAction {
            sql.push_str(" ON DELETE ");
            sql.push_str(fk.on_delete.to_sql());
        }
        if fk.on_update != ForeignKeyAction::NoAction {
            sql.push_str(" ON UPDATE ");
            sql.push_str(fk.on_update.to_sql());
        }
        sql
    }

    /// Renders a unique constraint.
    fn unique_constraint(&self, unique: &Unique) -> String {
        let cols: Vec<String> = unique
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        format!(
            "CONSTRAINT {} UNIQUE ({})",
            self.quote_identifier(&unique.name),
            cols.join(", ")
        )
    }

    /// Renders a check constraint.
    fn check_constraint(&self, check: &Check) -> String {
        format!(
            "CONSTRAINT {} CHECK ({})",
            self.quote_identifier(&check.name),
            check.expression
        )
    }

    /// Renders an exclusion constraint.
    fn exclusion_constraint(&self, exclusion: &Exclusion) -> String {
        let elements: Vec<String> = exclusion
            .elements
            .iter()
            .map(|e| format!("{} WITH {}", e.expression, e.operator))
            .collect();
        let mut sql = format!(
            "CONSTRAINT {} EXCLUDE USING {} ({})",
            self.quote_identifier(&exclusion.name),
            exclusion.method.as_str(),
            elements.join(", ")
        );
        if let Some(ref predicate) = exclusion.where_clause {
            sql.push_str(&format!(" WHERE ({predicate})"));
        }
        sql
    }

    /// Generates `ALTER TABLE ... ADD <constraint>`.
    fn add_constraint(&self, table: &TablePath, constraint: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD {constraint}",
            self.escape_table_path(table)
        )]
    }

    /// Generates `ALTER TABLE ... DROP CONSTRAINT`.
    fn drop_constraint(&self, table: &TablePath, name: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.escape_table_path(table),
            self.quote_identifier(name)
        )]
    }

    /// Generates SQL for ADD FOREIGN KEY.
    fn add_foreign_key(&self, table: &TablePath, fk: &ForeignKey) -> Vec<String> {
        self.add_constraint(table, &self.foreign_key_constraint(fk))
    }

    /// Generates SQL for DROP FOREIGN KEY.
    fn drop_foreign_key(&self, table: &TablePath, fk: &ForeignKey) -> Vec<String> {
        self.drop_constraint(table, &fk.name)
    }

    /// Generates SQL for adding a unique constraint.
    fn add_unique(&self, table: &TablePath, unique: &Unique) -> Vec<String> {
        self.add_constraint(table, &self.unique_constraint(unique))
    }

    /// Generates SQL for dropping a unique constraint.
    fn drop_unique(&self, table: &TablePath, unique: &Unique) -> Vec<String> {
        self.drop_constraint(table, &unique.name)
    }

    /// Generates SQL for adding a check constraint.
    fn add_check(&self, table: &TablePath, check: &Check) -> Vec<String> {
        self.add_constraint(table, &self.check_constraint(check))
    }

    /// Generates SQL for dropping a check constraint.
    fn drop_check(&self, table: &TablePath, check: &Check) -> Vec<String> {
        self.drop_constraint(table, &check.name)
    }

    /// Generates SQL for adding an exclusion constraint.
    fn add_exclusion(&self, table: &TablePath, exclusion: &Exclusion) -> Vec<String> {
        self.add_constraint(table, &self.exclusion_constraint(exclusion))
    }

    /// Generates SQL for dropping an exclusion constraint.
    fn drop_exclusion(&self, table: &TablePath, exclusion: &Exclusion) -> Vec<String> {
        self.drop_constraint(table, &exclusion.name)
    }

    /// Whether partitions are declared inside `CREATE TABLE` rather than
    /// created as separate statements.
    fn inline_partitions(&self) -> bool {
        false
    }

    /// Renders the `PARTITION BY` clause of a table.
    fn partition_clause(&self, spec: &PartitionSpec) -> String {
        let key = match spec.expression {
            Some(ref expression) if spec.columns.is_empty() => format!("({expression})"),
            _ => spec
                .columns
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
        };
        format!("PARTITION BY {} ({key})", spec.strategy.as_str())
    }

    /// Renders the bound of a partition.
    fn partition_bound(&self, bound: &PartitionBound) -> String {
        match bound {
            PartitionBound::Range { from, to } => {
                format!("FOR VALUES FROM ({}) TO ({})", from.join(", "), to.join(", "))
            }
            PartitionBound::List { values } => format!("FOR VALUES IN ({})", values.join(", ")),
            PartitionBound::Hash { modulus, remainder } => {
                format!("FOR VALUES WITH (MODULUS {modulus}, REMAINDER {remainder})")
            }
            PartitionBound::Default => "DEFAULT".to_string(),
        }
    }

    /// Generates SQL creating one partition of `table`.
    fn create_partition(
        &self,
        table: &TablePath,
        _strategy: PartitionStrategy,
        partition: &PartitionDefinition,
    ) -> Vec<String> {
        let child = TablePath {
            schema: table.schema.clone(),
            name: partition.name.clone(),
        };
        let mut sql = format!(
            "CREATE TABLE {} PARTITION OF {} {}",
            self.escape_table_path(&child),
            self.escape_table_path(table),
            self.partition_bound(&partition.bound)
        );
        if let Some(ref tablespace) = partition.tablespace {
            sql.push_str(&format!(" TABLESPACE {}", self.quote_identifier(tablespace)));
        }
        vec![sql]
    }

    /// Generates SQL dropping one partition of `table`.
    fn drop_partition(&self, table: &TablePath, partition: &PartitionDefinition) -> Vec<String> {
        let child = TablePath {
            schema: table.schema.clone(),
            name: partition.name.clone(),
        };
        self.drop_table(&child)
    }
}

/// Looks up a dialect by name or URL scheme.
pub fn dialect_for(name: &str) -> Result<Box<dyn Dialect>> {
    let scheme = name.split(':').next().unwrap_or(name).to_ascii_lowercase();
    match scheme.as_str() {
        "postgres" | "postgresql" => Ok(Box::new(PostgresDialect::new())),
        "sqlite" => Ok(Box::new(SqliteDialect::new())),
        "mysql" | "mariadb" => Ok(Box::new(MySqlDialect::new())),
        other => Err(SyncError::Config(format!("unknown dialect '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_lookup() {
        assert_eq!(dialect_for("postgres://localhost/db").unwrap().name(), "postgresql");
        assert_eq!(dialect_for("sqlite::memory:").unwrap().name(), "sqlite");
        assert_eq!(dialect_for("mysql").unwrap().name(), "mysql");
        assert!(dialect_for("oracle://x").is_err());
    }

    #[test]
    fn test_full_type_literal() {
        let dialect = PostgresDialect::new();
        assert_eq!(
            dialect.full_type_literal(&Column::new("t", "VARCHAR").length(100)),
            "varchar(100)"
        );
        assert_eq!(
            dialect.full_type_literal(&Column::new("p", "numeric").precision(10, 2)),
            "numeric(10, 2)"
        );
        assert_eq!(
            dialect.full_type_literal(&Column::new("tags", "text").array()),
            "text[]"
        );
        assert_eq!(
            dialect.full_type_literal(&Column::new("t", "varchar").length("")),
            "varchar"
        );
    }

    #[test]
    fn test_default_hooks_ignore_unused_inputs() {
        let sqlite = SqliteDialect::new();
        assert_eq!(sqlite.placeholder(1), "?");
        assert_eq!(sqlite.placeholder(7), "?");
        assert_eq!(sqlite.table_options(&Table::new("t")), None);

        let pg = PostgresDialect::new();
        let path = TablePath::new("event");
        let partition = PartitionDefinition::new("event_rest", PartitionBound::Default);
        assert_eq!(
            pg.create_partition(&path, PartitionStrategy::List, &partition),
            pg.create_partition(&path, PartitionStrategy::Range, &partition)
        );
        assert_eq!(
            pg.create_partition(&path, PartitionStrategy::List, &partition),
            vec!["CREATE TABLE \"event_rest\" PARTITION OF \"event\" DEFAULT".to_string()]
        );
    }

    #[test]
    fn test_rebuild_table_statements() {
        let sqlite = SqliteDialect::new();
        let old = Table::new("tag")
            .column(Column::new("id", "integer").primary())
            .column(Column::new("label", "varchar").length(20));
        let new = Table::new("tag")
            .column(Column::new("id", "integer").primary())
            .column(Column::new("label", "varchar").length(40))
            .index(Index::new("idx_tag_label", vec!["label".into()]));
        let label = sqlite.carry_expression(&old.columns[1], &new.columns[1], Conversion::Cast);
        assert_eq!(label, "CAST(\"label\" AS varchar(40))");

        let sql = sqlite.rebuild_table(
            &old,
            &new,
            &[("id".to_string(), "\"id\"".to_string()), ("label".to_string(), label)],
        );
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE \"_new_tag\" (\n    \"id\" integer PRIMARY KEY,\n    \"label\" varchar(40)\n)".to_string(),
                "INSERT INTO \"_new_tag\" (\"id\", \"label\") SELECT \"id\", CAST(\"label\" AS varchar(40)) FROM \"tag\"".to_string(),
                "DROP TABLE \"tag\"".to_string(),
                "ALTER TABLE \"_new_tag\" RENAME TO \"tag\"".to_string(),
                "CREATE INDEX \"idx_tag_label\" ON \"tag\" (\"label\")".to_string(),
            ]
        );
    }

    #[test]
    fn test_transitional_values() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.transitional_value(&Column::new("n", "int8")), "0");
        assert_eq!(dialect.transitional_value(&Column::new("b", "bool")), "false");
        assert_eq!(dialect.transitional_value(&Column::new("s", "text")), "''");
        assert_eq!(
            dialect.transitional_value(&Column::new("at", "timestamptz")),
            "CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_quote_identifier_escapes() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(
            dialect.escape_table_path(&TablePath::qualified("public", "post")),
            "\"public\".\"post\""
        );
    }
}
