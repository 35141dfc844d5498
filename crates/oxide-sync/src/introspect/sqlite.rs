//! SQLite catalog introspection.
//!
//! Columns, indices and foreign keys come from `PRAGMA` queries. Constraint
//! names, check expressions, computed columns and `AUTOINCREMENT` are not
//! exposed by any pragma and are read back from the stored `CREATE TABLE`
//! statement instead.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tracing::debug;

use super::{
    generated_expression, index_predicate, parse_constraint_clause, parse_type,
    split_definitions, ClauseKind, Introspector,
};
use crate::dialect::{Dialect, SqliteDialect};
use crate::error::Result;
use crate::executor::{Executor, Row, Value};
use crate::schema::{
    Check, Column, ForeignKey, ForeignKeyAction, Generation, Index, Table, TablePath, Unique,
};

/// Introspector for SQLite databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteIntrospector {
    dialect: SqliteDialect,
}

impl SqliteIntrospector {
    /// Creates a new SQLite introspector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dialect: SqliteDialect::new(),
        }
    }

    fn master(&self, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!("{}.sqlite_master", self.dialect.quote_identifier(schema)),
            None => "sqlite_master".to_string(),
        }
    }

    fn pragma(&self, schema: Option<&str>, pragma: &str, argument: &str) -> String {
        let argument = self.dialect.quote_identifier(argument);
        match schema {
            Some(schema) => format!(
                "PRAGMA {}.{pragma}({argument})",
                self.dialect.quote_identifier(schema)
            ),
            None => format!("PRAGMA {pragma}({argument})"),
        }
    }

    async fn read_columns(
        &self,
        executor: &dyn Executor,
        path: &TablePath,
        create_sql: &str,
    ) -> Result<Vec<Column>> {
        let table_name = path.to_string();
        let computed: HashMap<String, String> = split_definitions(create_sql)
            .into_iter()
            .filter_map(generated_expression)
            .collect();

        let rows = executor
            .query(
                &self.pragma(path.schema.as_deref(), "table_xinfo", &path.name),
                &[],
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            // 1 marks hidden columns of virtual tables; 2 and 3 are computed.
            let hidden = row.get_i64("hidden").unwrap_or(0);
            if hidden == 1 {
                continue;
            }
            let name = row.require_str(&table_name, "name")?.to_string();
            let parsed = parse_type(row.get_str("type").unwrap_or_default());
            let primary = row.get_i64("pk").unwrap_or(0) > 0;

            let mut column = Column::new(name, parsed.data_type);
            column.length = parsed.length;
            column.precision = parsed.precision;
            column.scale = parsed.scale;
            column.array = parsed.array;
            column.primary = primary;
            column.nullable = !primary && row.get_i64("notnull").unwrap_or(0) == 0;
            column.default = row.get_str("dflt_value").map(str::to_string);
            if hidden >= 2 {
                column.generated = computed.get(&column.name).cloned();
            }
            columns.push(column);
        }

        if create_sql.to_ascii_uppercase().contains("AUTOINCREMENT") {
            let mut primary = columns.iter_mut().filter(|c| c.primary);
            if let (Some(column), None) = (primary.next(), primary.next()) {
                column.generation = Generation::Increment;
            }
        }

        Ok(columns)
    }

    async fn read_indices(
        &self,
        executor: &dyn Executor,
        path: &TablePath,
        unique_names: &HashMap<Vec<String>, String>,
        table: &mut Table,
    ) -> Result<()> {
        let schema = path.schema.as_deref();
        let table_name = path.to_string();
        let rows = executor
            .query(&self.pragma(schema, "index_list", &path.name), &[])
            .await?;

        for row in rows {
            let origin = row.get_str("origin").unwrap_or("c");
            if origin == "pk" {
                continue;
            }
            let index_name = row.require_str(&table_name, "name")?.to_string();

            let mut info = executor
                .query(&self.pragma(schema, "index_info", &index_name), &[])
                .await?;
            info.sort_by_key(|r| r.get_i64("seqno").unwrap_or(0));
            let columns: Vec<String> = info
                .iter()
                .filter_map(|r| r.get_str("name").map(str::to_string))
                .collect();

            if origin == "u" {
                let name = unique_names.get(&columns).cloned().unwrap_or(index_name);
                table.uniques.push(Unique::new(name, columns));
                continue;
            }

            let mut index = Index::new(index_name.clone(), columns);
            if row.get_bool("unique").unwrap_or(false) {
                index = index.unique();
            }
            if row.get_bool("partial").unwrap_or(false) {
                let sql = executor
                    .query(
                        &format!(
                            "SELECT sql FROM {} WHERE type = 'index' AND name = ?",
                            self.master(schema)
                        ),
                        &[Value::from(index_name.as_str())],
                    )
                    .await?;
                index.where_clause = sql
                    .first()
                    .and_then(|r| r.get_str("sql"))
                    .and_then(index_predicate);
            }
            table.indices.push(index);
        }
        Ok(())
    }

    async fn read_foreign_keys(
        &self,
        executor: &dyn Executor,
        path: &TablePath,
        fk_names: &HashMap<Vec<String>, String>,
    ) -> Result<Vec<ForeignKey>> {
        let table_name = path.to_string();
        let rows = executor
            .query(
                &self.pragma(path.schema.as_deref(), "foreign_key_list", &path.name),
                &[],
            )
            .await?;

        let mut grouped: BTreeMap<i64, Vec<Row>> = BTreeMap::new();
        for row in rows {
            grouped
                .entry(row.get_i64("id").unwrap_or(0))
                .or_default()
                .push(row);
        }

        let mut foreign_keys = Vec::with_capacity(grouped.len());
        for (id, mut rows) in grouped {
            rows.sort_by_key(|r| r.get_i64("seq").unwrap_or(0));
            let Some(first) = rows.first() else {
                continue;
            };
            let referenced = TablePath::new(first.require_str(&table_name, "table")?);
            let on_delete = ForeignKeyAction::parse(first.get_str("on_delete").unwrap_or_default());
            let on_update = ForeignKeyAction::parse(first.get_str("on_update").unwrap_or_default());

            let mut columns = Vec::with_capacity(rows.len());
            let mut referenced_columns = Vec::with_capacity(rows.len());
            for row in &rows {
                columns.push(row.require_str(&table_name, "from")?.to_string());
                if let Some(to) = row.get_str("to") {
                    referenced_columns.push(to.to_string());
                }
            }

            let name = fk_names
                .get(&columns)
                .cloned()
                .unwrap_or_else(|| format!("fk_{}_{id}", path.name));
            foreign_keys.push(
                ForeignKey::new(name, columns, referenced, referenced_columns)
                    .on_delete(on_delete)
                    .on_update(on_update),
            );
        }
        Ok(foreign_keys)
    }
}

#[async_trait]
impl Introspector for SqliteIntrospector {
    async fn introspect_table(
        &self,
        executor: &dyn Executor,
        path: &TablePath,
    ) -> Result<Option<Table>> {
        let rows = executor
            .query(
                &format!(
                    "SELECT sql FROM {} WHERE type = 'table' AND name = ?",
                    self.master(path.schema.as_deref())
                ),
                &[Value::from(path.name.as_str())],
            )
            .await?;
        let Some(row) = rows.first() else {
            debug!(table = %path, "Table does not exist");
            return Ok(None);
        };
        let create_sql = row.get_str("sql").unwrap_or_default().to_string();

        let mut unique_names = HashMap::new();
        let mut fk_names = HashMap::new();
        let mut table = Table::new(path.clone());

        for clause in split_definitions(&create_sql)
            .into_iter()
            .filter_map(parse_constraint_clause)
        {
            match (clause.kind, clause.name) {
                (ClauseKind::Unique(columns), Some(name)) => {
                    unique_names.insert(columns, name);
                }
                (ClauseKind::ForeignKey(columns), Some(name)) => {
                    fk_names.insert(columns, name);
                }
                (ClauseKind::Check(expression), name) => {
                    let name = name.unwrap_or_else(|| {
                        format!("ck_{}_{}", path.name, table.checks.len() + 1)
                    });
                    table.checks.push(Check::new(name, expression));
                }
                _ => {}
            }
        }

        table.columns = self.read_columns(executor, path, &create_sql).await?;
        self.read_indices(executor, path, &unique_names, &mut table)
            .await?;
        table.foreign_keys = self.read_foreign_keys(executor, path, &fk_names).await?;

        debug!(
            table = %path,
            columns = table.columns.len(),
            indices = table.indices.len(),
            foreign_keys = table.foreign_keys.len(),
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
            .query(
                &format!(
                    "SELECT name FROM {} WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                    self.master(schema)
                ),
                &[],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let name = row.require_str("sqlite_master", "name")?;
                Ok(match schema {
                    Some(schema) => TablePath::qualified(schema, name),
                    None => TablePath::new(name),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Differ;
    use crate::executor::SqliteExecutor;

    fn author() -> Table {
        Table::new("author")
            .column(Column::new("id", "integer").primary().increment())
            .column(Column::new("name", "varchar").length(100).not_null())
    }

    fn post() -> Table {
        Table::new("post")
            .column(Column::new("id", "integer").primary().increment())
            .column(Column::new("author_id", "integer").not_null())
            .column(Column::new("slug", "varchar").length(80).not_null())
            .column(Column::new("price", "numeric").precision(10, 2))
            .column(Column::new("views", "integer").not_null().default("0"))
            .unique(Unique::new("uq_post_slug", vec!["slug".into()]))
            .check(Check::new("ck_post_views", "\"views\" >= 0"))
            .foreign_key(
                ForeignKey::new("fk_post_author", vec!["author_id".into()], "author", vec!["id".into()])
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .index(Index::new("idx_post_author", vec!["author_id".into()]))
            .index(Index::new("idx_post_popular", vec!["views".into()]).where_clause("\"views\" > 100"))
    }

    async fn create(exec: &SqliteExecutor, table: &Table) {
        for sql in SqliteDialect::new().create_table(table) {
            exec.execute(&sql, &[]).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_introspect_round_trip() {
        let exec = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        create(&exec, &author()).await;
        create(&exec, &post()).await;

        let introspector = SqliteIntrospector::new();
        let live = introspector
            .introspect_table(&exec, &TablePath::new("post"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(live.columns.len(), 5);
        assert_eq!(live.columns[0].generation, Generation::Increment);
        assert_eq!(live.columns[2].length.as_deref(), Some("80"));
        assert_eq!(live.columns[3].precision, Some(10));
        assert_eq!(live.uniques[0].name, "uq_post_slug");
        assert_eq!(live.foreign_keys[0].name, "fk_post_author");
        assert_eq!(live.foreign_keys[0].on_delete, ForeignKeyAction::Cascade);
        assert_eq!(live.checks[0].name, "ck_post_views");

        let popular = live
            .indices
            .iter()
            .find(|i| i.name == "idx_post_popular")
            .unwrap();
        assert_eq!(popular.where_clause.as_deref(), Some("\"views\" > 100"));

        let diff = Differ::default().diff_table(Some(&post()), Some(&live)).unwrap();
        assert!(diff.is_empty(), "unexpected deltas: {:?}", diff.deltas);
    }

    #[tokio::test]
    async fn test_missing_table_is_none() {
        let exec = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        let result = SqliteIntrospector::new()
            .introspect_table(&exec, &TablePath::new("nope"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_list_tables() {
        let exec = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        create(&exec, &author()).await;
        create(&exec, &post()).await;

        let tables = SqliteIntrospector::new().list_tables(&exec, None).await.unwrap();
        assert_eq!(tables, vec![TablePath::new("author"), TablePath::new("post")]);
    }
}
