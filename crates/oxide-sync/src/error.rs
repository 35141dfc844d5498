//! Error types for schema synchronization.

use std::path::PathBuf;

/// Errors that can occur while introspecting, diffing or migrating a schema.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A catalog query failed or returned rows of an unexpected shape.
    #[error("Failed to introspect table '{table}': {message}")]
    Introspection {
        /// Qualified name of the table being read.
        table: String,
        /// What went wrong.
        message: String,
    },

    /// The input schema cannot be diffed unambiguously.
    #[error("Ambiguous schema definition: {0}")]
    DiffAmbiguity(String),

    /// A generated statement failed against the live database.
    #[error("Query #{position} of migration '{migration}' failed: {message}\n  {query}")]
    DdlExecution {
        /// Identifier of the migration (or plan) being executed.
        migration: String,
        /// Zero-based position of the statement in its batch.
        position: usize,
        /// The offending statement.
        query: String,
        /// Error reported by the engine.
        message: String,
    },

    /// Another process holds the migration lock.
    #[error("Migration ledger is locked: {0}")]
    LedgerConflict(String),

    /// A migration batch failed after some migrations were committed.
    #[error("Migration run failed (last applied: {}): {source}", .last_applied.as_deref().unwrap_or("none"))]
    PartialRun {
        /// Identifier of the last migration that completed.
        last_applied: Option<String>,
        /// The failure that stopped the run.
        source: Box<SyncError>,
    },

    /// The dialect cannot express the requested change.
    #[error("Dialect '{dialect}' does not support {operation}")]
    UnsupportedOperation {
        /// Dialect name.
        dialect: &'static str,
        /// Human readable operation description.
        operation: String,
    },

    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to parse a migration or schema file.
    #[error("Failed to parse '{path}': {message}")]
    Parse {
        /// Path to the file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Migration recorded in the ledger but not available locally.
    #[error("Migration not found: {0}")]
    MigrationNotFound(String),

    /// Invalid runner state.
    #[error("Invalid migration state: {0}")]
    InvalidState(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading/writing migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Builds an introspection error for a table.
    pub fn introspection(table: impl ToString, message: impl Into<String>) -> Self {
        Self::Introspection {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// Returns the last applied migration carried by a partial run failure.
    #[must_use]
    pub fn last_applied(&self) -> Option<&str> {
        match self {
            Self::PartialRun { last_applied, .. } => last_applied.as_deref(),
            _ => None,
        }
    }
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
