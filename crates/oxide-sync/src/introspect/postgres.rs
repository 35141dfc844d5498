//! PostgreSQL catalog introspection.
//!
//! Everything is read from `pg_catalog`. Every catalog value is selected as
//! text, boolean or integer so rows decode the same way on every server
//! version.

use async_trait::async_trait;
use tracing::debug;

use super::{parenthesized, parse_type, read_identifier, split_definitions, strip_keyword, Introspector};
use crate::dialect::{Dialect, PostgresDialect};
use crate::error::{Result, SyncError};
use crate::executor::{Executor, Row, Value};
use crate::schema::{
    Check, Column, Exclusion, ForeignKey, ForeignKeyAction, Generation, Index, IndexMethod,
    PartitionBound, PartitionDefinition, PartitionSpec, PartitionStrategy, Table, TablePath,
    Unique,
};

const TABLE_SQL: &str = "SELECT c.relkind::text AS relkind, \
        pg_get_partkeydef(c.oid) AS partition_key, \
        obj_description(c.oid, 'pg_class') AS comment \
    FROM pg_class c \
    WHERE c.oid = to_regclass($1) AND c.relkind IN ('r', 'p')";

const COLUMNS_SQL: &str = "SELECT a.attname::text AS name, \
        format_type(a.atttypid, a.atttypmod) AS formatted_type, \
        a.attnotnull AS not_null, \
        pg_get_expr(d.adbin, d.adrelid) AS default_expr, \
        a.attidentity::text AS identity, \
        a.attgenerated::text AS generated, \
        col_description(a.attrelid, a.attnum) AS comment \
    FROM pg_attribute a \
    LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
    WHERE a.attrelid = to_regclass($1) AND a.attnum > 0 AND NOT a.attisdropped \
    ORDER BY a.attnum";

const CONSTRAINTS_SQL: &str = "SELECT con.conname::text AS name, \
        con.contype::text AS kind, \
        pg_get_constraintdef(con.oid) AS definition, \
        (SELECT string_agg(a.attname::text, ',' ORDER BY k.ord) \
            FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord) \
            JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum) AS columns, \
        (SELECT string_agg(a.attname::text, ',' ORDER BY k.ord) \
            FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord) \
            JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum) AS referenced_columns, \
        rn.nspname::text AS referenced_schema, \
        rc.relname::text AS referenced_table, \
        con.confdeltype::text AS on_delete, \
        con.confupdtype::text AS on_update \
    FROM pg_constraint con \
    LEFT JOIN pg_class rc ON rc.oid = con.confrelid \
    LEFT JOIN pg_namespace rn ON rn.oid = rc.relnamespace \
    WHERE con.conrelid = to_regclass($1) \
    ORDER BY con.conname";

const INDICES_SQL: &str = "SELECT i.relname::text AS name, \
        ix.indisunique AS is_unique, \
        am.amname::text AS method, \
        pg_get_expr(ix.indpred, ix.indrelid) AS predicate, \
        (SELECT string_agg(a.attname::text, ',' ORDER BY k.ord) \
            FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) \
            JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum) AS columns \
    FROM pg_index ix \
    JOIN pg_class i ON i.oid = ix.indexrelid \
    JOIN pg_am am ON am.oid = i.relam \
    WHERE ix.indrelid = to_regclass($1) AND NOT ix.indisprimary \
        AND NOT EXISTS (SELECT 1 FROM pg_constraint con \
            WHERE con.conindid = ix.indexrelid AND con.contype IN ('p', 'u', 'x')) \
    ORDER BY i.relname";

const PARTITIONS_SQL: &str = "SELECT c.relname::text AS name, \
        pg_get_expr(c.relpartbound, c.oid) AS bound, \
        ts.spcname::text AS tablespace \
    FROM pg_inherits inh \
    JOIN pg_class c ON c.oid = inh.inhrelid \
    LEFT JOIN pg_tablespace ts ON ts.oid = c.reltablespace \
    WHERE inh.inhparent = to_regclass($1) \
    ORDER BY c.relname";

const LIST_TABLES_SQL: &str = "SELECT n.nspname::text AS schema_name, c.relname::text AS name \
    FROM pg_class c \
    JOIN pg_namespace n ON n.oid = c.relnamespace \
    WHERE c.relkind IN ('r', 'p') AND NOT c.relispartition \
        AND n.nspname = COALESCE($1::text, current_schema()) \
    ORDER BY c.relname";

/// Introspector for PostgreSQL databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgIntrospector {
    dialect: PostgresDialect,
}

impl PgIntrospector {
    /// Creates a new PostgreSQL introspector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dialect: PostgresDialect::new(),
        }
    }

    fn read_column(&self, table: &str, row: &Row) -> Result<Column> {
        let name = row.require_str(table, "name")?;
        let parsed = parse_type(row.require_str(table, "formatted_type")?);

        let mut column = Column::new(name, parsed.data_type);
        column.length = parsed.length;
        column.precision = parsed.precision;
        column.scale = parsed.scale;
        column.array = parsed.array;
        column.nullable = !row.get_bool("not_null").unwrap_or(false);
        column.comment = row.get_str("comment").map(str::to_string);

        let default = row.get_str("default_expr").map(strip_cast);
        let identity = row.get_str("identity").unwrap_or_default();
        let generated = row.get_str("generated").unwrap_or_default();

        if !identity.is_empty() {
            column.generation = Generation::Identity;
        } else if generated == "s" {
            column.generated = default;
            return Ok(column);
        }

        match default {
            Some(expr) if expr.starts_with("nextval(") => column.generation = Generation::Increment,
            Some(expr) if expr == "gen_random_uuid()" || expr == "uuid_generate_v4()" => {
                column.generation = Generation::Uuid;
            }
            other => column.default = other,
        }
        Ok(column)
    }

    fn apply_constraint(&self, table: &mut Table, row: &Row) -> Result<()> {
        let table_name = table.name.to_string();
        let name = row.require_str(&table_name, "name")?.to_string();
        let kind = row.require_str(&table_name, "kind")?;
        let definition = row.get_str("definition").unwrap_or_default();
        let columns = split_list(row.get_str("columns"));

        match kind {
            "p" => {
                for column in table.columns.iter_mut() {
                    if columns.contains(&column.name) {
                        column.primary = true;
                        column.nullable = false;
                    }
                }
            }
            "u" => table.uniques.push(Unique::new(name, columns)),
            "c" => {
                let expression = strip_keyword(definition, "CHECK")
                    .and_then(parenthesized)
                    .map(|(expression, _)| expression.trim().to_string())
                    .ok_or_else(|| {
                        SyncError::introspection(&table_name, format!("unreadable check '{definition}'"))
                    })?;
                table.checks.push(Check::new(name, expression));
            }
            "f" => {
                let referenced = match row.get_str("referenced_schema") {
                    Some(schema) => TablePath::qualified(
                        schema,
                        row.require_str(&table_name, "referenced_table")?,
                    ),
                    None => TablePath::new(row.require_str(&table_name, "referenced_table")?),
                };
                let fk = ForeignKey::new(
                    name,
                    columns,
                    referenced,
                    split_list(row.get_str("referenced_columns")),
                )
                .on_delete(ForeignKeyAction::parse(row.get_str("on_delete").unwrap_or_default()))
                .on_update(ForeignKeyAction::parse(row.get_str("on_update").unwrap_or_default()));
                table.foreign_keys.push(fk);
            }
            "x" => {
                let exclusion = parse_exclusion(&name, definition).ok_or_else(|| {
                    SyncError::introspection(&table_name, format!("unreadable exclusion '{definition}'"))
                })?;
                table.exclusions.push(exclusion);
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Introspector for PgIntrospector {
    async fn introspect_table(
        &self,
        executor: &dyn Executor,
        path: &TablePath,
    ) -> Result<Option<Table>> {
        let regclass = [Value::Text(self.dialect.escape_table_path(path))];
        let table_name = path.to_string();

        let rows = executor.query(TABLE_SQL, &regclass).await?;
        let Some(info) = rows.first() else {
            debug!(table = %path, "Table does not exist");
            return Ok(None);
        };

        let mut table = Table::new(path.clone());
        table.comment = info.get_str("comment").map(str::to_string);

        for row in executor.query(COLUMNS_SQL, &regclass).await? {
            table.columns.push(self.read_column(&table_name, &row)?);
        }

        for row in executor.query(CONSTRAINTS_SQL, &regclass).await? {
            self.apply_constraint(&mut table, &row)?;
        }

        for row in executor.query(INDICES_SQL, &regclass).await? {
            let name = row.require_str(&table_name, "name")?;
            let method = row.get_str("method").unwrap_or("btree");
            let mut index = Index::new(name, split_list(row.get_str("columns")))
                .method(IndexMethod::parse(method).unwrap_or_default());
            if row.get_bool("is_unique").unwrap_or(false) {
                index = index.unique();
            }
            index.where_clause = row.get_str("predicate").map(str::to_string);
            table.indices.push(index);
        }

        if let Some(key) = info.get_str("partition_key") {
            let mut spec = parse_partition_key(key).ok_or_else(|| {
                SyncError::introspection(&table_name, format!("unreadable partition key '{key}'"))
            })?;
            for row in executor.query(PARTITIONS_SQL, &regclass).await? {
                let name = row.require_str(&table_name, "name")?;
                let bound = row.require_str(&table_name, "bound")?;
                let bound = parse_partition_bound(bound).ok_or_else(|| {
                    SyncError::introspection(&table_name, format!("unreadable partition bound '{bound}'"))
                })?;
                let mut partition = PartitionDefinition::new(name, bound);
                partition.tablespace = row.get_str("tablespace").map(str::to_string);
                spec.partitions.push(partition);
            }
            table.partition = Some(spec);
        }

        debug!(
            table = %path,
            columns = table.columns.len(),
            indices = table.indices.len(),
            foreign_keys = table.foreign_keys.len(),
            partitioned = table.partition.is_some(),
            "Introspected table"
        );
        Ok(Some(table))
    }

    async fn list_tables(
        &self,
        executor: &dyn Executor,
        schema: Option<&str>,
    ) -> Result<Vec<TablePath>> {
        let rows = executor
            .query(LIST_TABLES_SQL, &[Value::from(schema.map(str::to_string))])
            .await?;
        rows.iter()
            .map(|row| {
                let name = row.require_str("pg_class", "name")?;
                Ok(match schema {
                    Some(schema) => TablePath::qualified(schema, name),
                    None => TablePath::new(name),
                })
            })
            .collect()
    }
}

fn split_list(list: Option<&str>) -> Vec<String> {
    list.map(|l| {
        l.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Drops a trailing `::type` cast from a literal default.
fn strip_cast(expression: &str) -> String {
    let expression = expression.trim();
    if let Some(at) = expression.rfind("::") {
        let value = expression[..at].trim();
        let literal = (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
            || value.parse::<f64>().is_ok()
            || (value.starts_with('(') && value.ends_with(')'));
        if literal && !expression[at + 2..].contains('\'') {
            return value.to_string();
        }
    }
    expression.to_string()
}

/// Parses `RANGE (created_at)` or `HASH (lower(name))`.
fn parse_partition_key(key: &str) -> Option<PartitionSpec> {
    let (strategy, rest) = if let Some(rest) = strip_keyword(key, "RANGE") {
        (PartitionStrategy::Range, rest)
    } else if let Some(rest) = strip_keyword(key, "LIST") {
        (PartitionStrategy::List, rest)
    } else {
        (PartitionStrategy::Hash, strip_keyword(key, "HASH")?)
    };
    let (inner, _) = parenthesized(rest)?;

    let mut columns = Vec::new();
    for element in split_definitions(&format!("({inner})")) {
        match read_identifier(element) {
            Some((name, tail)) if tail.trim().is_empty() => columns.push(name),
            _ => return Some(PartitionSpec::by_expression(strategy, inner.trim())),
        }
    }
    Some(PartitionSpec::by_columns(strategy, columns))
}

fn value_list(text: &str) -> Vec<String> {
    split_definitions(&format!("({text})"))
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Parses the output of `pg_get_expr(relpartbound, ...)`.
fn parse_partition_bound(bound: &str) -> Option<PartitionBound> {
    if strip_keyword(bound, "DEFAULT").is_some() {
        return Some(PartitionBound::Default);
    }
    let rest = strip_keyword(strip_keyword(bound, "FOR")?, "VALUES")?;

    if let Some(rest) = strip_keyword(rest, "FROM") {
        let (from, rest) = parenthesized(rest)?;
        let (to, _) = parenthesized(strip_keyword(rest, "TO")?)?;
        return Some(PartitionBound::Range {
            from: value_list(from),
            to: value_list(to),
        });
    }
    if let Some(rest) = strip_keyword(rest, "IN") {
        let (values, _) = parenthesized(rest)?;
        return Some(PartitionBound::List {
            values: value_list(values),
        });
    }
    let (args, _) = parenthesized(strip_keyword(rest, "WITH")?)?;
    let mut modulus = None;
    let mut remainder = None;
    for arg in args.split(',') {
        let mut words = arg.split_whitespace();
        match (words.next().map(str::to_ascii_lowercase).as_deref(), words.next()) {
            (Some("modulus"), Some(v)) => modulus = v.parse().ok(),
            (Some("remainder"), Some(v)) => remainder = v.parse().ok(),
            _ => {}
        }
    }
    Some(PartitionBound::Hash {
        modulus: modulus?,
        remainder: remainder?,
    })
}

/// Parses `EXCLUDE USING gist (room WITH =, during WITH &&) WHERE (...)`.
fn parse_exclusion(name: &str, definition: &str) -> Option<Exclusion> {
    let rest = strip_keyword(definition, "EXCLUDE")?;
    let (method, rest) = match strip_keyword(rest, "USING") {
        Some(rest) => {
            let (method, rest) = read_identifier(rest)?;
            (IndexMethod::parse(&method)?, rest)
        }
        None => (IndexMethod::BTree, rest),
    };
    let (elements, rest) = parenthesized(rest)?;

    let mut exclusion = Exclusion::new(name).method(method);
    for element in split_definitions(&format!("({elements})")) {
        let (expression, operator) = element.rsplit_once(" WITH ")?;
        exclusion = exclusion.element(expression.trim(), operator.trim());
    }
    exclusion.where_clause = strip_keyword(rest, "WHERE").map(|w| {
        parenthesized(w).map_or_else(|| w.trim().to_string(), |(inner, _)| inner.trim().to_string())
    });
    Some(exclusion)
}
