//! Configuration file handling.
//!
//! ```toml
//! default_connection = "main"
//! migrations_dir = "migrations"
//! schema = "schema.json"
//! transaction = "each"
//!
//! [connections]
//! main = "postgres://localhost/app"
//! scratch = "sqlite::memory:"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::ledger::DEFAULT_LEDGER_TABLE;
use crate::runner::{RunnerConfig, TransactionMode};

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = "oxide-sync.toml";

/// Default migrations directory.
pub const MIGRATIONS_DIR: &str = "migrations";

/// Synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Named connection URLs.
    pub connections: BTreeMap<String, String>,
    /// Connection used when none is named.
    pub default_connection: Option<String>,
    /// Directory holding migration files.
    pub migrations_dir: PathBuf,
    /// JSON document describing the desired schema.
    pub schema: Option<PathBuf>,
    /// Ledger table name, optionally schema-qualified.
    pub ledger_table: String,
    /// Transaction wrapping for migration runs.
    pub transaction: TransactionMode,
    /// Log statements without executing them.
    pub dry_run: bool,
    /// Drop live tables absent from the desired schema.
    pub drop_orphans: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connections: BTreeMap::new(),
            default_connection: None,
            migrations_dir: PathBuf::from(MIGRATIONS_DIR),
            schema: None,
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            transaction: TransactionMode::default(),
            dry_run: false,
            drop_orphans: false,
        }
    }
}

impl FromStr for SyncConfig {
    type Err = SyncError;

    fn from_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SyncError::Config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl SyncConfig {
    /// Loads a config file.
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = content.parse().map_err(|e| match e {
            SyncError::Config(message) => SyncError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        if let Some(base) = path.parent() {
            if config.migrations_dir.is_relative() {
                config.migrations_dir = base.join(&config.migrations_dir);
            }
            if let Some(schema) = config.schema.as_mut() {
                if schema.is_relative() {
                    *schema = base.join(&*schema);
                }
            }
        }
        Ok(config)
    }

    /// Loads `path` if given, otherwise `oxide-sync.toml` in the working
    /// directory if present, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(CONFIG_FILE_NAME);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.default_connection {
            if !self.connections.contains_key(name) {
                return Err(SyncError::Config(format!(
                    "default connection '{name}' is not defined"
                )));
            }
        }
        if self.ledger_table.trim().is_empty() {
            return Err(SyncError::Config("ledger table name is empty".to_string()));
        }
        Ok(())
    }

    /// Resolves the URL of a connection.
    ///
    /// Precedence: an explicit URL, then the named connection, then the
    /// default connection, then the only connection defined.
    pub fn resolve_url(&self, name: Option<&str>, url: Option<&str>) -> Result<String> {
        if let Some(url) = url {
            return Ok(url.to_string());
        }

        let name = match name.or(self.default_connection.as_deref()) {
            Some(name) => name,
            None => match self.connections.keys().next() {
                Some(only) if self.connections.len() == 1 => only.as_str(),
                _ => {
                    return Err(SyncError::Config(
                        "no connection selected and no default connection configured"
                            .to_string(),
                    ))
                }
            },
        };

        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::Config(format!("unknown connection '{name}'")))
    }

    /// Runner settings derived from this config.
    #[must_use]
    pub const fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            transaction: self.transaction,
            dry_run: self.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: SyncConfig = "".parse().unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.ledger_table, DEFAULT_LEDGER_TABLE);
        assert_eq!(config.transaction, TransactionMode::All);
    }

    #[test]
    fn test_resolve_url() {
        let config: SyncConfig = r#"
            default_connection = "main"
            transaction = "each"

            [connections]
            main = "sqlite::memory:"
            other = "postgres://localhost/app"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.resolve_url(None, None).unwrap(), "sqlite::memory:");
        assert_eq!(
            config.resolve_url(Some("other"), None).unwrap(),
            "postgres://localhost/app"
        );
        assert_eq!(
            config.resolve_url(Some("other"), Some("sqlite:x.db")).unwrap(),
            "sqlite:x.db"
        );
        assert!(matches!(
            config.resolve_url(Some("missing"), None),
            Err(SyncError::Config(_))
        ));
        assert_eq!(config.runner_config().transaction, TransactionMode::Each);
    }

    #[test]
    fn test_single_connection_is_implicit_default() {
        let config: SyncConfig = "[connections]\nonly = \"sqlite::memory:\"\n".parse().unwrap();
        assert_eq!(config.resolve_url(None, None).unwrap(), "sqlite::memory:");
        assert!(matches!(
            SyncConfig::default().resolve_url(None, None),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            "default_connection = \"nope\"".parse::<SyncConfig>(),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            "transaction = \"sometimes\"".parse::<SyncConfig>(),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            "unknown_key = 1".parse::<SyncConfig>(),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "migrations_dir = \"db/migrations\"\nschema = \"schema.json\"\n")
            .unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.migrations_dir, dir.path().join("db/migrations"));
        assert_eq!(config.schema, Some(dir.path().join("schema.json")));

        std::fs::write(&path, "dry_run = \"yes\"").unwrap();
        assert!(matches!(
            SyncConfig::load(&path),
            Err(SyncError::Parse { .. })
        ));
    }
}
