//! TOML-based configuration for docvault.
//!
//! A config file names the store root, where conflict artifacts go, the
//! default soft-lock TTL and conflict strategy, and the log level. The root
//! and log level can be overridden from the environment via
//! [`VaultConfig::apply_env_overrides`].

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec::DocumentFormat;
use crate::conflict::resolver::ConflictStrategy;
use crate::errors::ConfigError;
use crate::store::DEFAULT_CONFLICT_DIR;

/// Environment variable overriding `store.root`.
pub const ROOT_ENV: &str = "DOCVAULT_ROOT";
/// Environment variable overriding `logging.level`.
pub const LOG_ENV: &str = "DOCVAULT_LOG";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Where documents live and how they are encoded.
    pub store: StoreConfig,

    /// Soft-lock defaults.
    #[serde(default)]
    pub locking: LockingConfig,

    /// Conflict handling defaults.
    #[serde(default)]
    pub conflicts: ConflictConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Store location and layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory of the store.
    pub root: PathBuf,

    /// Directory under `root` for conflict artifacts (default `.conflicts`).
    #[serde(default = "default_conflict_dir")]
    pub conflict_dir: String,

    /// Document encoding.
    #[serde(default)]
    pub format: DocumentFormat,
}

fn default_conflict_dir() -> String {
    DEFAULT_CONFLICT_DIR.into()
}

// ---------------------------------------------------------------------------
// Locking
// ---------------------------------------------------------------------------

/// Soft-lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// TTL for locks taken without an explicit duration (default 300).
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl LockingConfig {
    pub fn default_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.default_ttl_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Conflict handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConflictConfig {
    /// Strategy applied when a caller doesn't pick one.
    #[serde(default)]
    pub default_strategy: ConflictStrategy,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validating
// ---------------------------------------------------------------------------

impl VaultConfig {
    /// A config for `root` with every other setting at its default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig {
                root: root.into(),
                conflict_dir: default_conflict_dir(),
                format: DocumentFormat::default(),
            },
            locking: LockingConfig::default(),
            conflicts: ConflictConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load a [`VaultConfig`] from a TOML file at the given path.
    ///
    /// This does **not** apply environment overrides -- call
    /// [`apply_env_overrides`](Self::apply_env_overrides) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: VaultConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Apply `DOCVAULT_ROOT` / `DOCVAULT_LOG` if they are set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = non_empty_env(ROOT_ENV) {
            debug!(root = %root, "store root overridden from environment");
            self.store.root = PathBuf::from(root);
        }
        if let Some(level) = non_empty_env(LOG_ENV) {
            debug!(level = %level, "log level overridden from environment");
            self.logging.level = level;
        }
    }

    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "store.root".into(),
                detail: "store root must not be empty".into(),
            });
        }
        let mut components = Path::new(&self.store.conflict_dir).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_normal {
            return Err(ConfigError::InvalidValue {
                field: "store.conflict_dir".into(),
                detail: "must be a single directory name under the store root".into(),
            });
        }
        if self.locking.default_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "locking.default_ttl_secs".into(),
                detail: "lock TTL must be > 0".into(),
            });
        }
        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: format!("unknown level '{}'", self.logging.level),
            });
        }
        Ok(())
    }

    /// Convenience: load, apply env overrides, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// The commented template written by `docvault init`.
    pub fn default_toml(root: &Path) -> String {
        format!(
            r#"# docvault configuration

[store]
# Directory holding documents and their .meta.json side-cars.
root = "{root}"
# Conflict artifacts go to <root>/<conflict_dir>.
conflict_dir = "{conflict_dir}"
# Document encoding: json | toml
format = "json"

[locking]
default_ttl_secs = {ttl}

[conflicts]
# abort | overwrite | auto_merge | create_conflict_file
default_strategy = "abort"

[logging]
level = "info"
"#,
            root = root.display().to_string().replace('\\', "\\\\"),
            conflict_dir = DEFAULT_CONFLICT_DIR,
            ttl = default_ttl_secs(),
        )
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
