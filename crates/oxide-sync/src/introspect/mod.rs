//! Live schema introspection.
//!
//! An [`Introspector`] reads catalog metadata through an [`Executor`] and
//! rebuilds [`Table`] values from it. A table that does not exist is
//! `Ok(None)`, never an error, so callers can tell a missing table from a
//! broken catalog read.

mod postgres;
mod sqlite;

pub use postgres::PgIntrospector;
pub use sqlite::SqliteIntrospector;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::error::{Result, SyncError};
use crate::executor::Executor;
use crate::schema::{canonical_type_name, Table, TablePath};

/// Reads live table definitions.
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Reads one table. Returns `Ok(None)` if it does not exist.
    async fn introspect_table(
        &self,
        executor: &dyn Executor,
        path: &TablePath,
    ) -> Result<Option<Table>>;

    /// Lists user tables, optionally restricted to one schema.
    async fn list_tables(
        &self,
        executor: &dyn Executor,
        schema: Option<&str>,
    ) -> Result<Vec<TablePath>>;
}

/// Reads several tables concurrently. Results are in `paths` order.
pub async fn introspect_all(
    introspector: &dyn Introspector,
    executor: &dyn Executor,
    paths: &[TablePath],
) -> Result<Vec<Option<Table>>> {
    try_join_all(
        paths
            .iter()
            .map(|path| introspector.introspect_table(executor, path)),
    )
    .await
}

/// Returns the introspector for a dialect name.
pub fn introspector_for(dialect: &str) -> Result<Box<dyn Introspector>> {
    match dialect {
        "sqlite" => Ok(Box::new(SqliteIntrospector::new())),
        "postgres" | "postgresql" => Ok(Box::new(PgIntrospector::new())),
        other => Err(SyncError::UnsupportedOperation {
            dialect: "introspection",
            operation: format!("reading {other} catalogs"),
        }),
    }
}

/// A declared type split into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParsedType {
    pub data_type: String,
    pub length: Option<String>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub array: bool,
}

/// Splits `varchar(80)`, `numeric(10, 2)` or `text[]` into its parts.
///
/// The modifier may sit inside the name, as in `timestamp(3) with time
/// zone`; it is lifted out and the remaining words form the type name.
pub(crate) fn parse_type(raw: &str) -> ParsedType {
    let mut text = raw.trim();
    let array = text.ends_with("[]");
    if array {
        text = text[..text.len() - 2].trim_end();
    }

    let modifier = text
        .find('(')
        .and_then(|open| text[open..].find(')').map(|len| (open, open + len)));
    let (base, args) = match modifier {
        Some((open, close)) => {
            let head = text[..open].trim();
            let tail = text[close + 1..].trim();
            let base = if tail.is_empty() {
                head.to_string()
            } else {
                format!("{head} {tail}")
            };
            (base, Some(&text[open + 1..close]))
        }
        None => (text.to_string(), None),
    };

    let mut parsed = ParsedType {
        data_type: base.to_ascii_lowercase(),
        array,
        ..ParsedType::default()
    };
    let Some(args) = args else {
        return parsed;
    };

    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    let numeric = matches!(
        canonical_type_name(&base).as_str(),
        "numeric" | "float" | "real" | "double precision"
    );
    match parts.as_slice() {
        [p, s] => {
            parsed.precision = p.parse().ok();
            parsed.scale = s.parse().ok();
        }
        [p] if numeric => parsed.precision = p.parse().ok(),
        [len] => parsed.length = Some((*len).to_string()),
        _ => {}
    }
    parsed
}

/// Kind of a table-level constraint clause in `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClauseKind {
    PrimaryKey(Vec<String>),
    Unique(Vec<String>),
    Check(String),
    ForeignKey(Vec<String>),
}

/// A table-level constraint clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConstraintClause {
    pub name: Option<String>,
    pub kind: ClauseKind,
}

/// Splits the body of a `CREATE TABLE` statement at top-level commas.
pub(crate) fn split_definitions(create_sql: &str) -> Vec<&str> {
    let Some(open) = create_sql.find('(') else {
        return Vec::new();
    };
    let body = &create_sql[open + 1..];

    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, ch) in body.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => quote = Some(ch),
            '[' => quote = Some(']'),
            '(' => depth += 1,
            ')' if depth == 0 => {
                parts.push(body[start..i].trim());
                break;
            }
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(body[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// Strips a leading keyword (case-insensitive, whole word).
pub(crate) fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let text = text.trim_start();
    let head = text.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &text[keyword.len()..];
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => None,
        _ => Some(rest.trim_start()),
    }
}

/// Reads a possibly quoted identifier. Returns it unquoted with the rest.
pub(crate) fn read_identifier(text: &str) -> Option<(String, &str)> {
    let text = text.trim_start();
    let first = text.chars().next()?;
    let close = match first {
        '"' => '"',
        '`' => '`',
        '[' => ']',
        _ => {
            let end = text
                .find(|c: char| c.is_whitespace() || c == '(' || c == ',')
                .unwrap_or(text.len());
            return Some((text[..end].to_string(), &text[end..]));
        }
    };
    let inner = &text[1..];
    let end = inner.find(close)?;
    Some((inner[..end].to_string(), &inner[end + 1..]))
}

/// Reads a parenthesized group. Returns its contents and the rest.
pub(crate) fn parenthesized(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if !text.starts_with('(') {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, ch) in text.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => quote = Some(ch),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&text[1..i], &text[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

fn identifier_list(text: &str) -> Vec<String> {
    text.split(',')
        .filter_map(|part| read_identifier(part).map(|(name, _)| name))
        .filter(|name| !name.is_empty())
        .collect()
}

/// Parses a table-level constraint clause. Column definitions give `None`.
pub(crate) fn parse_constraint_clause(definition: &str) -> Option<ConstraintClause> {
    let (name, rest) = match strip_keyword(definition, "CONSTRAINT") {
        Some(rest) => {
            let (name, rest) = read_identifier(rest)?;
            (Some(name), rest)
        }
        None => (None, definition),
    };

    let kind = if let Some(rest) = strip_keyword(rest, "PRIMARY") {
        let (cols, _) = parenthesized(strip_keyword(rest, "KEY")?)?;
        ClauseKind::PrimaryKey(identifier_list(cols))
    } else if let Some(rest) = strip_keyword(rest, "UNIQUE") {
        let (cols, _) = parenthesized(rest)?;
        ClauseKind::Unique(identifier_list(cols))
    } else if let Some(rest) = strip_keyword(rest, "CHECK") {
        let (expression, _) = parenthesized(rest)?;
        ClauseKind::Check(expression.trim().to_string())
    } else if let Some(rest) = strip_keyword(rest, "FOREIGN") {
        let (cols, _) = parenthesized(strip_keyword(rest, "KEY")?)?;
        ClauseKind::ForeignKey(identifier_list(cols))
    } else {
        return None;
    };

    Some(ConstraintClause { name, kind })
}

/// Extracts `(column, expression)` from a column definition carrying
/// `GENERATED ALWAYS AS (...)`.
pub(crate) fn generated_expression(definition: &str) -> Option<(String, String)> {
    let (column, rest) = read_identifier(definition)?;
    let upper = rest.to_ascii_uppercase();
    let at = upper.find("GENERATED ALWAYS AS")?;
    let (expression, _) = parenthesized(&rest[at + "GENERATED ALWAYS AS".len()..])?;
    Some((column, expression.trim().to_string()))
}

/// Returns the predicate of a partial `CREATE INDEX` statement.
pub(crate) fn index_predicate(index_sql: &str) -> Option<String> {
    let open = index_sql.find('(')?;
    let (_, rest) = parenthesized(&index_sql[open..])?;
    let predicate = strip_keyword(rest, "WHERE")?.trim();
    (!predicate.is_empty()).then(|| predicate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    #[test]
    fn test_parse_type() {
        let t = parse_type("VARCHAR(80)");
        assert_eq!(t.data_type, "varchar");
        assert_eq!(t.length.as_deref(), Some("80"));

        let t = parse_type("numeric(10, 2)");
        assert_eq!((t.precision, t.scale), (Some(10), Some(2)));
        assert!(t.length.is_none());

        let t = parse_type("text[]");
        assert!(t.array);
        assert_eq!(t.data_type, "text");

        assert_eq!(parse_type("integer"), ParsedType {
            data_type: "integer".into(),
            ..ParsedType::default()
        });
    }

    #[test]
    fn test_parse_type_with_inner_modifier() {
        let t = parse_type("timestamp(3) without time zone");
        assert_eq!(t.data_type, "timestamp without time zone");
        assert_eq!(t.length.as_deref(), Some("3"));

        let t = parse_type("time(6) with time zone");
        assert_eq!(t.data_type, "time with time zone");
        assert_eq!(t.length.as_deref(), Some("6"));

        let t = parse_type("timestamp(0) with time zone[]");
        assert!(t.array);
        assert_eq!(t.data_type, "timestamp with time zone");

        let mut live = Column::new("created_at", t.data_type);
        live.length = t.length;
        live.array = t.array;
        let desired = Column::new("created_at", "timestamptz").length(0).array();
        assert!(live.same_type(&desired));
        assert!(Column::new("at", "time with time zone").same_type(&Column::new("at", "timetz")));
    }

    #[test]
    fn test_split_definitions_respects_nesting() {
        let sql = "CREATE TABLE \"t\" (\n    \"a\" numeric(10, 2),\n    \"b, c\" text DEFAULT 'x,y',\n    CONSTRAINT \"ck\" CHECK (a > (0))\n)";
        let parts = split_definitions(sql);
        assert_eq!(
            parts,
            vec![
                "\"a\" numeric(10, 2)",
                "\"b, c\" text DEFAULT 'x,y'",
                "CONSTRAINT \"ck\" CHECK (a > (0))"
            ]
        );
    }

    #[test]
    fn test_parse_constraint_clauses() {
        let clause = parse_constraint_clause("CONSTRAINT \"uq_slug\" UNIQUE (\"slug\", \"site\")")
            .unwrap();
        assert_eq!(clause.name.as_deref(), Some("uq_slug"));
        assert_eq!(
            clause.kind,
            ClauseKind::Unique(vec!["slug".into(), "site".into()])
        );

        let clause = parse_constraint_clause("CHECK (\"price\" > 0)").unwrap();
        assert_eq!(clause.name, None);
        assert_eq!(clause.kind, ClauseKind::Check("\"price\" > 0".into()));

        let clause = parse_constraint_clause(
            "CONSTRAINT fk_a FOREIGN KEY (\"author_id\") REFERENCES \"author\" (\"id\")",
        )
        .unwrap();
        assert_eq!(clause.kind, ClauseKind::ForeignKey(vec!["author_id".into()]));

        assert!(parse_constraint_clause("\"check_total\" integer").is_none());
        assert!(parse_constraint_clause("check_total integer").is_none());
    }

    #[test]
    fn test_generated_expression_and_predicate() {
        assert_eq!(
            generated_expression("\"total\" integer GENERATED ALWAYS AS (\"a\" + \"b\") STORED"),
            Some(("total".into(), "\"a\" + \"b\"".into()))
        );
        assert_eq!(
            index_predicate("CREATE INDEX \"i\" ON \"t\" (\"a\") WHERE \"a\" IS NOT NULL"),
            Some("\"a\" IS NOT NULL".into())
        );
        assert_eq!(
            index_predicate("CREATE INDEX i ON t (a) WHERE (a > 0)"),
            Some("(a > 0)".into())
        );
        assert_eq!(index_predicate("CREATE INDEX \"i\" ON \"t\" (\"a\")"), None);
    }

    #[test]
    fn test_introspector_lookup() {
        assert!(introspector_for("sqlite").is_ok());
        assert!(introspector_for("postgresql").is_ok());
        assert!(introspector_for("mysql").is_err());
    }
}
