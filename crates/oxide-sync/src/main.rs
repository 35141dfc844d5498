//! oxide-sync CLI
//!
//! Command-line tool for diffing schemas and managing migrations.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_sync::prelude::*;

/// Schema synchronization and migration diffing.
#[derive(Parser)]
#[command(name = "oxide-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to oxide-sync.toml if present).
    #[arg(short, long, env = "OXIDE_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Named connection from the config file.
    #[arg(long)]
    connection: Option<String>,

    /// Database URL, overriding any configured connection.
    #[arg(short, long, env = "DATABASE_URL")]
    database: Option<String>,

    /// Migrations directory.
    #[arg(short, long)]
    migrations_dir: Option<PathBuf>,

    /// Desired schema as a JSON array of tables.
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a migration for the pending schema changes.
    Generate {
        /// Migration name.
        #[arg(short, long, default_value = "auto")]
        name: String,

        /// Show SQL without writing files.
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply pending migrations.
    Run {
        /// Transaction mode: all, each or none.
        #[arg(short, long)]
        transaction: Option<TransactionMode>,

        /// Show SQL without executing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert the most recently applied migration.
    Revert {
        /// Transaction mode: all, each or none.
        #[arg(short, long)]
        transaction: Option<TransactionMode>,

        /// Show SQL without executing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Compare the desired schema with the database.
    ///
    /// Exits 0 when up to date, 2 when changes are pending, 1 on error.
    Check {
        /// Treat lossy changes as an error.
        #[arg(long)]
        fail_on_unsafe: bool,
    },

    /// Show migration status.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = SyncConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.migrations_dir {
        config.migrations_dir = dir;
    }
    if let Some(schema) = cli.schema {
        config.schema = Some(schema);
    }
    match &cli.command {
        Commands::Generate { dry_run, .. } => config.dry_run |= *dry_run,
        Commands::Run {
            transaction,
            dry_run,
        }
        | Commands::Revert {
            transaction,
            dry_run,
        } => {
            config.dry_run |= *dry_run;
            if let Some(mode) = transaction {
                config.transaction = *mode;
            }
        }
        Commands::Check { .. } | Commands::Status => {}
    }

    let url = config.resolve_url(cli.connection.as_deref(), cli.database.as_deref())?;
    let sync = SchemaSync::connect(&url, config).await?;
    let result = execute(&sync, cli.command).await;
    sync.shutdown().await?;
    result
}

async fn execute(sync: &SchemaSync, command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Generate { name, .. } => {
            let desired = desired_schema(sync)?;
            let dir = sync.config().migrations_dir.clone();
            match sync.generate_migration(&desired, &name, &dir).await? {
                Some(path) => info!("Created migration: {}", path.display()),
                None => info!("No migration written."),
            }
        }

        Commands::Run { .. } => {
            let units = sync.load_migrations()?;
            let cancel = CancellationHandle::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, stopping after the current migration");
                    on_signal.cancel();
                }
            });

            let report = sync.run_migrations(&units, &cancel).await?;
            if report.cancelled {
                warn!(
                    last_applied = report.last_applied.as_deref().unwrap_or("none"),
                    "Run cancelled"
                );
                return Ok(ExitCode::FAILURE);
            }
            info!("Applied {} migration(s).", report.applied.len());
        }

        Commands::Revert { .. } => {
            let units = sync.load_migrations()?;
            match sync.revert_last_migration(&units).await? {
                Some(id) => info!("Reverted {id}."),
                None => info!("No migrations to revert."),
            }
        }

        Commands::Check { fail_on_unsafe } => {
            let desired = desired_schema(sync)?;
            let plan = sync.diff_only(&desired).await?;
            for sql in plan.up_queries() {
                println!("{sql};");
            }
            if fail_on_unsafe && plan.has_unsafe_changes() {
                bail!("plan contains {} unsafe alteration(s)", plan.warnings.len());
            }
            let status = CheckStatus::from_plan(&plan);
            info!(status = ?status, "Check finished");
            return Ok(ExitCode::from(u8::try_from(status.exit_code())?));
        }

        Commands::Status => {
            let units = sync.load_migrations()?;
            let status = sync.migration_status(&units).await?;
            if status.is_empty() {
                info!("No migrations found.");
            }
            for (id, state) in status {
                let mark = if state == MigrationState::Applied { "X" } else { " " };
                println!(" [{mark}] {id}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn desired_schema(sync: &SchemaSync) -> anyhow::Result<Vec<Table>> {
    let path = sync
        .config()
        .schema
        .as_deref()
        .context("no desired schema configured; pass --schema or set `schema` in the config")?;
    Ok(load_desired_schema(path)?)
}
