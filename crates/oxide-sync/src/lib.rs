//! Schema synchronization and migration diffing for SQL databases.
//!
//! `oxide-sync` compares a desired schema, described as [`schema::Table`]
//! values, with the live schema read from a connected database, and turns
//! the difference into reversible DDL:
//! - Changes are classified per dialect as in-place, widening, retyping,
//!   truncating or destructive rebuilds
//! - Every forward statement has a reverse counterpart, and lossy steps
//!   are reported as warnings rather than errors
//! - Applied migrations are tracked in a ledger table that the crate
//!   bootstraps with its own DDL machinery
//!
//! # Architecture
//!
//! - **Schema** - Dialect-neutral tables, columns, indices and constraints
//! - **Introspect** - Reads live catalogs into the schema model
//! - **Diff** - Computes ordered structural deltas between two snapshots
//! - **Policy** - Decides how a column change can be carried out
//! - **DDL** - Renders deltas into `up` and `down` statements
//! - **Ledger / Runner** - Applies and reverts migrations transactionally
//! - **Sync** - Entry points tying the above to one connection
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_sync::prelude::*;
//!
//! let desired = vec![
//!     Table::new("post")
//!         .column(Column::new("id", "integer").primary().increment())
//!         .column(Column::new("title", "varchar").length(100).not_null()),
//! ];
//!
//! let sync = SchemaSync::connect("sqlite:app.db", SyncConfig::default()).await?;
//! if sync.check(&desired).await? == CheckStatus::ChangesPending {
//!     sync.generate_migration(&desired, "add_post", Path::new("migrations")).await?;
//! }
//! let units = sync.load_migrations()?;
//! sync.run_migrations(&units, &CancellationHandle::new()).await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Exit 0 when up to date, 2 when changes are pending
//! oxide-sync check
//!
//! # Write a migration file for pending changes
//! oxide-sync generate --name add_post
//!
//! # Apply pending migrations, then undo the last one
//! oxide-sync run
//! oxide-sync revert
//! ```

pub mod config;
pub mod ddl;
pub mod dialect;
pub mod diff;
pub mod error;
pub mod executor;
pub mod introspect;
pub mod ledger;
pub mod migration;
pub mod policy;
pub mod runner;
pub mod schema;
pub mod sync;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::SyncConfig;
    pub use crate::ddl::{DdlGenerator, Direction, Plan, UnsafeAlterationWarning};
    pub use crate::dialect::{
        dialect_for, Dialect, DialectCapabilities, MySqlDialect, PostgresDialect, SqliteDialect,
    };
    pub use crate::diff::{Delta, DiffOptions, DiffWarning, Differ, SchemaDiff};
    pub use crate::error::{Result, SyncError};
    pub use crate::executor::{Executor, PgExecutor, Row, SqliteExecutor, Value};
    pub use crate::introspect::{introspector_for, Introspector};
    pub use crate::ledger::{Ledger, LedgerEntry};
    pub use crate::migration::{Migration, MigrationSource, SqlMigration};
    pub use crate::policy::{Alteration, AlterationPolicy};
    pub use crate::runner::{
        CancellationHandle, MigrationState, RunReport, Runner, RunnerConfig, TransactionMode,
    };
    pub use crate::schema::{
        Check, Column, Exclusion, ForeignKey, ForeignKeyAction, Generation, Index, IndexMethod,
        PartitionBound, PartitionDefinition, PartitionSpec, PartitionStrategy, Table, TablePath,
        Unique,
    };
    pub use crate::sync::{load_desired_schema, CheckStatus, SchemaSync};
}
