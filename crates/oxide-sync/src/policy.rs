//! Column alteration policy.
//!
//! Decides, per dialect, whether a column change can be applied in place
//! without losing data, needs an explicit truncation, or has to be rebuilt
//! by dropping and re-adding the column. Classification is total: anything
//! not recognized as safe is treated as a rebuild.

use serde::{Deserialize, Serialize};

use crate::dialect::DialectCapabilities;
use crate::schema::Column;

/// How a destructive change is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destructive {
    /// In-place type change that explicitly truncates values to `length`.
    Truncate {
        /// New maximum length.
        length: u64,
    },
    /// Drop the column and add it again. Existing data is lost.
    Rebuild,
}

/// Classification of an `AlterColumn` delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alteration {
    /// Type unchanged; only nullability or default differ.
    InPlace,
    /// String column grows or loses its length limit.
    SafeWiden,
    /// Type promotion between compatible families, with an explicit cast.
    SafeRetype,
    /// Data is truncated or lost.
    Destructive(Destructive),
}

impl Alteration {
    /// Returns `true` for destructive classifications.
    #[must_use]
    pub const fn is_destructive(&self) -> bool {
        matches!(self, Self::Destructive(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    String,
    Integer(u8),
    Numeric,
    Float(u8),
    Date,
    Timestamp,
    TimestampTz,
    Json,
    Jsonb,
    Uuid,
    Boolean,
    Other,
}

fn family(column: &Column) -> Family {
    match column.canonical_type().as_str() {
        "varchar" | "char" | "text" | "citext" | "nvarchar" | "nchar" | "tinytext"
        | "mediumtext" | "longtext" | "clob" | "string" => Family::String,
        "tinyint" => Family::Integer(0),
        "smallint" => Family::Integer(1),
        "integer" | "mediumint" => Family::Integer(2),
        "bigint" => Family::Integer(3),
        "numeric" => Family::Numeric,
        "real" => Family::Float(1),
        "double precision" => Family::Float(2),
        "date" => Family::Date,
        "timestamp" | "datetime" => Family::Timestamp,
        "timestamptz" => Family::TimestampTz,
        "json" => Family::Json,
        "jsonb" => Family::Jsonb,
        "uuid" => Family::Uuid,
        "boolean" => Family::Boolean,
        _ => Family::Other,
    }
}

/// Decimal digits needed to hold any value of an integer rank.
const fn integer_digits(rank: u8) -> u32 {
    match rank {
        0 => 3,
        1 => 5,
        2 => 10,
        _ => 19,
    }
}

/// Stateless classifier for column alterations.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlterationPolicy;

impl AlterationPolicy {
    /// Classifies the change from `old` to `new` for a dialect.
    #[must_use]
    pub fn classify(old: &Column, new: &Column, caps: &DialectCapabilities) -> Alteration {
        const REBUILD: Alteration = Alteration::Destructive(Destructive::Rebuild);

        if !caps.in_place_alter_column {
            return REBUILD;
        }
        if old.array != new.array
            || old.generation != new.generation
            || crate::schema::normalize_expression(old.generated.as_deref())
                != crate::schema::normalize_expression(new.generated.as_deref())
        {
            return REBUILD;
        }
        if old.same_type(new) {
            return Alteration::InPlace;
        }

        match (family(old), family(new)) {
            (Family::String, Family::String) => {
                match (old.numeric_length(), new.numeric_length()) {
                    (Some(before), Some(after)) if after < before => {
                        Alteration::Destructive(Destructive::Truncate { length: after })
                    }
                    _ => Alteration::SafeWiden,
                }
            }
            (Family::Integer(a), Family::Integer(b)) if b > a => Alteration::SafeRetype,
            (Family::Integer(rank), Family::Numeric) => match (new.precision, new.scale) {
                (None, _) => Alteration::SafeRetype,
                (Some(p), s) if p.saturating_sub(s.unwrap_or(0)) >= integer_digits(rank) => {
                    Alteration::SafeRetype
                }
                _ => REBUILD,
            },
            (Family::Integer(rank), Family::Float(width)) if rank <= width => {
                Alteration::SafeRetype
            }
            (Family::Float(a), Family::Float(b)) if b > a => Alteration::SafeRetype,
            (Family::Numeric, Family::Numeric) => match (old.precision, new.precision) {
                (_, None) => Alteration::SafeRetype,
                (Some(p1), Some(p2)) => {
                    let s1 = old.scale.unwrap_or(0);
                    let s2 = new.scale.unwrap_or(0);
                    if p2 >= p1 && s2 >= s1 && p2.saturating_sub(s2) >= p1.saturating_sub(s1) {
                        Alteration::SafeRetype
                    } else {
                        REBUILD
                    }
                }
                (None, Some(_)) => REBUILD,
            },
            (Family::Date, Family::Timestamp | Family::TimestampTz)
            | (Family::Timestamp, Family::TimestampTz)
            | (Family::Json, Family::Jsonb) => Alteration::SafeRetype,
            (
                Family::Integer(_)
                | Family::Numeric
                | Family::Float(_)
                | Family::Uuid
                | Family::Boolean
                | Family::Date
                | Family::Timestamp
                | Family::TimestampTz,
                Family::String,
            ) if new.numeric_length().is_none() => Alteration::SafeRetype,
            _ => REBUILD,
        }
    }

    /// Returns whether values of `column` have a known bound, so that a
    /// narrowing cast back to it fails loudly instead of silently.
    #[must_use]
    pub fn has_known_bound(column: &Column) -> bool {
        match family(column) {
            Family::Integer(_)
            | Family::Date
            | Family::Timestamp
            | Family::TimestampTz
            | Family::Uuid
            | Family::Boolean => true,
            Family::Numeric => column.precision.is_some(),
            Family::String => column.numeric_length().is_some(),
            Family::Float(_) | Family::Json | Family::Jsonb | Family::Other => false,
        }
    }
}
