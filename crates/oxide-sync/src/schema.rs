//! Schema representation types.
//!
//! These types describe the structure of database tables independently of
//! any dialect. They are produced by the desired-schema builder (or read from
//! JSON) and by the introspectors, and compared by the diff engine.
//!
//! Every type is plain owned data: `clone()` yields a fully independent copy
//! and equality is structural. Tables held in caches are never mutated in
//! place; use [`Table::with_column_replaced`] to derive a new value.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// A table name, optionally qualified by a schema (or database).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TablePath {
    /// Schema or database qualifier.
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
}

impl TablePath {
    /// Creates an unqualified table path.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Creates a schema-qualified table path.
    #[must_use]
    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<String> for TablePath {
    fn from(value: String) -> Self {
        match value.split_once('.') {
            Some((schema, name)) => Self::qualified(schema, name),
            None => Self::new(value),
        }
    }
}

impl From<&str> for TablePath {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<TablePath> for String {
    fn from(value: TablePath) -> Self {
        value.to_string()
    }
}

/// How a column obtains values when none is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    /// Plain column.
    #[default]
    None,
    /// Auto-increment / serial.
    Increment,
    /// Server-generated UUID.
    Uuid,
    /// SQL standard identity column.
    Identity,
}

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Logical type as understood by the dialect (e.g. `varchar`, `integer`).
    pub data_type: String,
    /// Length, kept as text (`"255"`, `"max"`). Empty means dialect default.
    #[serde(default)]
    pub length: Option<String>,
    /// Numeric precision.
    #[serde(default)]
    pub precision: Option<u32>,
    /// Numeric scale.
    #[serde(default)]
    pub scale: Option<u32>,
    /// Whether the column allows NULL values.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Default value expression, rendered verbatim.
    #[serde(default)]
    pub default: Option<String>,
    /// Generation strategy.
    #[serde(default)]
    pub generation: Generation,
    /// Whether this column is part of the primary key.
    #[serde(default)]
    pub primary: bool,
    /// Whether this column holds an array of `data_type`.
    #[serde(default)]
    pub array: bool,
    /// Expression of a computed (stored generated) column.
    #[serde(default)]
    pub generated: Option<String>,
    /// Column comment.
    #[serde(default)]
    pub comment: Option<String>,
}

const fn default_true() -> bool {
    true
}

impl Column {
    /// Creates a new nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            length: None,
            precision: None,
            scale: None,
            nullable: true,
            default: None,
            generation: Generation::None,
            primary: false,
            array: false,
            generated: None,
            comment: None,
        }
    }

    /// Sets the length.
    #[must_use]
    pub fn length(mut self, length: impl ToString) -> Self {
        self.length = Some(length.to_string());
        self
    }

    /// Sets precision and scale.
    #[must_use]
    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the column as nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the default expression.
    #[must_use]
    pub fn default(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    /// Sets the generation strategy.
    #[must_use]
    pub fn generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        if self.primary && generation == Generation::Increment {
            self.nullable = false;
        }
        self
    }

    /// Shorthand for an auto-incrementing column.
    #[must_use]
    pub fn increment(self) -> Self {
        self.generation(Generation::Increment)
    }

    /// Marks the column as an array.
    #[must_use]
    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    /// Makes the column a stored computed column.
    #[must_use]
    pub fn generated_as(mut self, expression: impl Into<String>) -> Self {
        self.generated = Some(expression.into());
        self
    }

    /// Sets the comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Effective nullability. Primary key columns are never nullable.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable && !self.primary
    }

    /// Length with empty strings treated as absent.
    #[must_use]
    pub fn normalized_length(&self) -> Option<&str> {
        self.length
            .as_deref()
            .map(str::trim)
            .filter(|len| !len.is_empty())
    }

    /// Numeric length, if the length is a plain number.
    #[must_use]
    pub fn numeric_length(&self) -> Option<u64> {
        self.normalized_length().and_then(|len| len.parse().ok())
    }

    /// Canonical lowercase type name.
    #[must_use]
    pub fn canonical_type(&self) -> String {
        canonical_type_name(&self.data_type)
    }

    /// Compares every attribute that the diff engine tracks.
    ///
    /// Primary-key membership and comments are excluded; the former is
    /// reported as a warning and the latter is metadata only.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.same_type(other)
            && self.is_nullable() == other.is_nullable()
            && normalize_expression(self.default.as_deref())
                == normalize_expression(other.default.as_deref())
            && self.generation == other.generation
            && normalize_expression(self.generated.as_deref())
                == normalize_expression(other.generated.as_deref())
    }

    /// Compares type name, length, precision, scale and array-ness.
    #[must_use]
    pub fn same_type(&self, other: &Self) -> bool {
        self.canonical_type() == other.canonical_type()
            && self.normalized_length() == other.normalized_length()
            && self.precision == other.precision
            && self.scale == other.scale
            && self.array == other.array
    }
}

/// Maps type aliases onto one spelling.
#[must_use]
pub fn canonical_type_name(data_type: &str) -> String {
    let lowered = data_type.trim().to_ascii_lowercase();
    let canonical = match lowered.as_str() {
        "int" | "int4" | "integer" => "integer",
        "int8" | "bigint" => "bigint",
        "int2" | "smallint" => "smallint",
        "character varying" | "varchar" => "varchar",
        "character" | "char" | "bpchar" => "char",
        "bool" | "boolean" => "boolean",
        "float8" | "double precision" | "double" => "double precision",
        "float4" | "real" => "real",
        "decimal" | "numeric" => "numeric",
        "timestamp without time zone" | "timestamp" => "timestamp",
        "timestamp with time zone" | "timestamptz" => "timestamptz",
        "time without time zone" | "time" => "time",
        "time with time zone" | "timetz" => "timetz",
        other => other,
    };
    canonical.to_string()
}

/// Normalizes an SQL expression for comparison.
///
/// Trims whitespace, strips enclosing parentheses that wrap the whole
/// expression and drops quotes from identifiers that do not need them, so
/// catalog-decompiled expressions compare equal to hand-written ones.
#[must_use]
pub fn normalize_expression(expression: Option<&str>) -> Option<String> {
    let mut current = expression?.trim();
    while let Some(inner) = strip_wrapping_parens(current) {
        current = inner.trim();
    }
    if current.is_empty() {
        None
    } else {
        Some(unquote_identifiers(current))
    }
}

fn unquote_identifiers(expression: &str) -> String {
    let mut out = String::with_capacity(expression.len());
    let mut rest = expression;

    while let Some(at) = rest.find(&['"', '\''][..]) {
        out.push_str(&rest[..at]);
        let quote = &rest[at..at + 1];
        let body = &rest[at + 1..];
        let Some(end) = body.find(quote) else {
            out.push_str(&rest[at..]);
            return out;
        };
        let inner = &body[..end];
        let plain = quote == "\""
            && inner
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            && inner
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if plain {
            out.push_str(inner);
        } else {
            out.push_str(&rest[at..at + end + 2]);
        }
        rest = &body[end + 1..];
    }
    out.push_str(rest);
    out
}

fn strip_wrapping_parens(expression: &str) -> Option<&str> {
    let inner = expression.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    for ch in inner.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

/// Index access method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexMethod {
    /// B-tree (default).
    #[default]
    BTree,
    /// Hash.
    Hash,
    /// Generalized search tree.
    Gist,
    /// Space-partitioned GiST.
    SpGist,
    /// Generalized inverted index.
    Gin,
    /// Block range index.
    Brin,
}

impl IndexMethod {
    /// Returns the method keyword.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BTree => "btree",
            Self::Hash => "hash",
            Self::Gist => "gist",
            Self::SpGist => "spgist",
            Self::Gin => "gin",
            Self::Brin => "brin",
        }
    }

    /// Parses a method keyword, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "btree" => Some(Self::BTree),
            "hash" => Some(Self::Hash),
            "gist" => Some(Self::Gist),
            "spgist" => Some(Self::SpGist),
            "gin" => Some(Self::Gin),
            "brin" => Some(Self::Brin),
            _ => None,
        }
    }
}

/// Schema definition for an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    #[serde(default)]
    pub unique: bool,
    /// Access method.
    #[serde(default)]
    pub method: IndexMethod,
    /// Partial index predicate.
    #[serde(default)]
    pub where_clause: Option<String>,
}

impl Index {
    /// Creates a new non-unique btree index.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            method: IndexMethod::BTree,
            where_clause: None,
        }
    }

    /// Makes the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the access method.
    #[must_use]
    pub fn method(mut self, method: IndexMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets a partial index predicate.
    #[must_use]
    pub fn where_clause(mut self, predicate: impl Into<String>) -> Self {
        self.where_clause = Some(predicate.into());
        self
    }

    /// Compares everything except the name.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self.unique == other.unique
            && self.method == other.method
            && normalize_expression(self.where_clause.as_deref())
                == normalize_expression(other.where_clause.as_deref())
    }
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn to_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses the catalog spelling of an action.
    #[must_use]
    pub fn parse(action: &str) -> Self {
        match action.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" | "R" => Self::Restrict,
            "CASCADE" | "C" => Self::Cascade,
            "SET NULL" | "N" => Self::SetNull,
            "SET DEFAULT" | "D" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

/// Schema definition for a foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub referenced_table: TablePath,
    /// Referenced columns.
    pub referenced_columns: Vec<String>,
    /// ON DELETE action.
    #[serde(default)]
    pub on_delete: ForeignKeyAction,
    /// ON UPDATE action.
    #[serde(default)]
    pub on_update: ForeignKeyAction,
}

impl ForeignKey {
    /// Creates a new foreign key.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        referenced_table: impl Into<TablePath>,
        referenced_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            referenced_table: referenced_table.into(),
            referenced_columns,
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }

    /// Compares everything except the name.
    ///
    /// The referenced table is compared by bare name when either side is
    /// unqualified, since catalogs may or may not report the schema.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        let same_target = match (
            &self.referenced_table.schema,
            &other.referenced_table.schema,
        ) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        } && self.referenced_table.name == other.referenced_table.name;

        same_target
            && self.columns == other.columns
            && self.referenced_columns == other.referenced_columns
            && self.on_delete == other.on_delete
            && self.on_update == other.on_update
    }
}

/// A unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unique {
    /// Constraint name.
    pub name: String,
    /// Constrained columns.
    pub columns: Vec<String>,
}

impl Unique {
    /// Creates a unique constraint.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Compares everything except the name.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

/// A check constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Constraint name.
    pub name: String,
    /// Boolean expression.
    pub expression: String,
}

impl Check {
    /// Creates a check constraint.
    #[must_use]
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }

    /// Compares everything except the name.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        normalize_expression(Some(&self.expression))
            == normalize_expression(Some(&other.expression))
    }
}

/// One `<element> WITH <operator>` pair of an exclusion constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionElement {
    /// Column name or expression.
    pub expression: String,
    /// Comparison operator.
    pub operator: String,
}

/// An exclusion constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    /// Constraint name.
    pub name: String,
    /// Index method backing the constraint.
    #[serde(default = "default_exclusion_method")]
    pub method: IndexMethod,
    /// Elements and their operators.
    pub elements: Vec<ExclusionElement>,
    /// Partial predicate.
    #[serde(default)]
    pub where_clause: Option<String>,
}

const fn default_exclusion_method() -> IndexMethod {
    IndexMethod::Gist
}

impl Exclusion {
    /// Creates an exclusion constraint backed by GiST.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: IndexMethod::Gist,
            elements: Vec::new(),
            where_clause: None,
        }
    }

    /// Adds an element.
    #[must_use]
    pub fn element(mut self, expression: impl Into<String>, operator: impl Into<String>) -> Self {
        self.elements.push(ExclusionElement {
            expression: expression.into(),
            operator: operator.into(),
        });
        self
    }

    /// Sets the index method.
    #[must_use]
    pub fn method(mut self, method: IndexMethod) -> Self {
        self.method = method;
        self
    }

    /// Compares everything except the name.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        self.method == other.method
            && self.elements == other.elements
            && normalize_expression(self.where_clause.as_deref())
                == normalize_expression(other.where_clause.as_deref())
    }
}

/// Partitioning strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartitionStrategy {
    /// Partition by value ranges.
    Range,
    /// Partition by value lists.
    List,
    /// Partition by hash modulus.
    Hash,
}

impl PartitionStrategy {
    /// Returns the SQL keyword.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Range => "RANGE",
            Self::List => "LIST",
            Self::Hash => "HASH",
        }
    }
}

/// Bound of a single partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PartitionBound {
    /// `FROM (..) TO (..)`.
    Range {
        /// Inclusive lower bound values.
        from: Vec<String>,
        /// Exclusive upper bound values.
        to: Vec<String>,
    },
    /// `IN (..)`.
    List {
        /// Listed values.
        values: Vec<String>,
    },
    /// `WITH (MODULUS m, REMAINDER r)`.
    Hash {
        /// Modulus.
        modulus: u32,
        /// Remainder.
        remainder: u32,
    },
    /// Catch-all partition.
    Default,
}

/// A named partition of a partitioned table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDefinition {
    /// Partition (child table) name.
    pub name: String,
    /// Partition bound.
    pub bound: PartitionBound,
    /// Optional tablespace.
    #[serde(default)]
    pub tablespace: Option<String>,
}

impl PartitionDefinition {
    /// Creates a partition definition.
    #[must_use]
    pub fn new(name: impl Into<String>, bound: PartitionBound) -> Self {
        Self {
            name: name.into(),
            bound,
            tablespace: None,
        }
    }

    /// Sets the tablespace.
    #[must_use]
    pub fn tablespace(mut self, tablespace: impl Into<String>) -> Self {
        self.tablespace = Some(tablespace.into());
        self
    }
}

/// Partitioning of a table: a key (columns or expression) plus partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// Strategy.
    pub strategy: PartitionStrategy,
    /// Key columns. Mutually exclusive with `expression`.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Key expression. Mutually exclusive with `columns`.
    #[serde(default)]
    pub expression: Option<String>,
    /// Partitions, in declaration order.
    #[serde(default)]
    pub partitions: Vec<PartitionDefinition>,
}

impl PartitionSpec {
    /// Partitions by a column list.
    #[must_use]
    pub fn by_columns(strategy: PartitionStrategy, columns: Vec<String>) -> Self {
        Self {
            strategy,
            columns,
            expression: None,
            partitions: Vec::new(),
        }
    }

    /// Partitions by an expression.
    #[must_use]
    pub fn by_expression(strategy: PartitionStrategy, expression: impl Into<String>) -> Self {
        Self {
            strategy,
            columns: Vec::new(),
            expression: Some(expression.into()),
            partitions: Vec::new(),
        }
    }

    /// Adds a partition.
    #[must_use]
    pub fn partition(mut self, partition: PartitionDefinition) -> Self {
        self.partitions.push(partition);
        self
    }

    /// Compares the partition key only.
    #[must_use]
    pub fn same_key(&self, other: &Self) -> bool {
        self.strategy == other.strategy
            && self.columns == other.columns
            && normalize_expression(self.expression.as_deref())
                == normalize_expression(other.expression.as_deref())
    }

    /// Checks the structural invariants of the spec.
    pub fn validate(&self) -> Result<()> {
        let has_expression = self
            .expression
            .as_deref()
            .is_some_and(|expr| !expr.trim().is_empty());
        match (self.columns.is_empty(), has_expression) {
            (false, true) => {
                return Err(SyncError::DiffAmbiguity(
                    "partition spec sets both columns and an expression".to_string(),
                ))
            }
            (true, false) => {
                return Err(SyncError::DiffAmbiguity(
                    "partition spec sets neither columns nor an expression".to_string(),
                ))
            }
            _ => {}
        }

        let mut names = HashSet::new();
        for partition in &self.partitions {
            if !names.insert(partition.name.as_str()) {
                return Err(SyncError::DiffAmbiguity(format!(
                    "duplicate partition '{}'",
                    partition.name
                )));
            }
            let matches_strategy = matches!(
                (self.strategy, &partition.bound),
                (PartitionStrategy::Range, PartitionBound::Range { .. })
                    | (PartitionStrategy::List, PartitionBound::List { .. })
                    | (PartitionStrategy::Hash, PartitionBound::Hash { .. })
                    | (
                        PartitionStrategy::Range | PartitionStrategy::List,
                        PartitionBound::Default
                    )
            );
            if !matches_strategy {
                return Err(SyncError::DiffAmbiguity(format!(
                    "partition '{}' bound does not match {} partitioning",
                    partition.name,
                    self.strategy.as_str()
                )));
            }
            if let PartitionBound::Hash { modulus, remainder } = partition.bound {
                if modulus == 0 || remainder >= modulus {
                    return Err(SyncError::DiffAmbiguity(format!(
                        "partition '{}' has invalid hash bound (modulus {modulus}, remainder {remainder})",
                        partition.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Schema definition for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Qualified table name.
    pub name: TablePath,
    /// Columns, in order.
    #[serde(default)]
    pub columns: Vec<Column>,
    /// Indices.
    #[serde(default)]
    pub indices: Vec<Index>,
    /// Foreign keys.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Unique constraints.
    #[serde(default)]
    pub uniques: Vec<Unique>,
    /// Check constraints.
    #[serde(default)]
    pub checks: Vec<Check>,
    /// Exclusion constraints.
    #[serde(default)]
    pub exclusions: Vec<Exclusion>,
    /// Partitioning.
    #[serde(default)]
    pub partition: Option<PartitionSpec>,
    /// Storage engine (MySQL).
    #[serde(default)]
    pub engine: Option<String>,
    /// Table comment.
    #[serde(default)]
    pub comment: Option<String>,
}

impl Table {
    /// Creates an empty table.
    #[must_use]
    pub fn new(name: impl Into<TablePath>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
            foreign_keys: Vec::new(),
            uniques: Vec::new(),
            checks: Vec::new(),
            exclusions: Vec::new(),
            partition: None,
            engine: None,
            comment: None,
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indices.push(index);
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn unique(mut self, unique: Unique) -> Self {
        self.uniques.push(unique);
        self
    }

    /// Adds a check constraint.
    #[must_use]
    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    /// Adds an exclusion constraint.
    #[must_use]
    pub fn exclusion(mut self, exclusion: Exclusion) -> Self {
        self.exclusions.push(exclusion);
        self
    }

    /// Sets the partition spec.
    #[must_use]
    pub fn partition_by(mut self, spec: PartitionSpec) -> Self {
        self.partition = Some(spec);
        self
    }

    /// Sets the storage engine.
    #[must_use]
    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    /// Sets the table comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Finds a column by exact name.
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns a copy of this table with the named column replaced.
    ///
    /// The column is appended if no column of that name exists.
    #[must_use]
    pub fn with_column_replaced(&self, column: Column) -> Self {
        let mut table = self.clone();
        match table.columns.iter_mut().find(|c| c.name == column.name) {
            Some(slot) => *slot = column,
            None => table.columns.push(column),
        }
        table
    }

    /// Names of the primary key columns, in column order.
    #[must_use]
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Tables referenced by this table's foreign keys, excluding itself.
    #[must_use]
    pub fn dependencies(&self) -> Vec<&TablePath> {
        let mut deps: Vec<&TablePath> = Vec::new();
        for fk in &self.foreign_keys {
            if fk.referenced_table.name != self.name.name && !deps.contains(&&fk.referenced_table)
            {
                deps.push(&fk.referenced_table);
            }
        }
        deps
    }

    /// Checks the table-level invariants.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for column in &self.columns {
            if !names.insert(column.name.as_str()) {
                return Err(SyncError::DiffAmbiguity(format!(
                    "table '{}' declares column '{}' twice",
                    self.name, column.name
                )));
            }
        }
        if let Some(spec) = &self.partition {
            spec.validate().map_err(|e| match e {
                SyncError::DiffAmbiguity(msg) => {
                    SyncError::DiffAmbiguity(format!("table '{}': {msg}", self.name))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}
