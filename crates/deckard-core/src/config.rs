//! Daemon configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration:
//!
//! ```toml
//! socket_path = "/tmp/deckard.sock"
//! content_root = "/srv/deckard/content"
//! sweep_interval_secs = 5
//!
//! [limits]
//! max_users = 10
//! first_port = 2019
//!
//! [runner]
//! program = "gladerunner"
//! args = []
//!
//! [catalogs]
//! max_per_session = 4
//! max_download_size = 1500000
//! urls = ["https://l10n.example.org/po/%s"]
//! compiler = "msgfmt"
//! compiler_args = []
//! default_language = "en_US"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::language::DEFAULT_LANGUAGE;

/// Default control socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/deckard.sock";

/// Default interval between garbage-collection sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Session and port limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of simultaneous sessions.
    pub max_users: usize,
    /// First port of the pool `[first_port, first_port + max_users)`.
    pub first_port: u16,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_users: 10,
            first_port: 2019,
        }
    }
}

/// How worker processes are started.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Worker executable.
    pub program: String,
    /// Arguments placed before the worker contract arguments.
    pub args: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "gladerunner".to_string(),
            args: Vec::new(),
        }
    }
}

/// Custom translation catalog handling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CatalogsConfig {
    /// Maximum cached catalogs per session.
    pub max_per_session: usize,
    /// Largest remote catalog accepted, in bytes.
    pub max_download_size: u64,
    /// URL templates tried in order; `%s` is replaced by the catalog name.
    pub urls: Vec<String>,
    /// Catalog compiler executable.
    pub compiler: String,
    /// Arguments placed before the compiler contract arguments.
    pub compiler_args: Vec<String>,
    /// Parent directory for per-catalog storage (system temp dir if unset).
    pub storage_root: Option<PathBuf>,
    /// Language assumed when a catalog does not declare a usable one.
    pub default_language: String,
}

impl Default for CatalogsConfig {
    fn default() -> Self {
        Self {
            max_per_session: 4,
            max_download_size: 1_500_000,
            urls: Vec::new(),
            compiler: "msgfmt".to_string(),
            compiler_args: Vec::new(),
            storage_root: None,
            default_language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeckardConfig {
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Root holding `LANGS/` and one directory per module.
    pub content_root: PathBuf,
    /// Seconds between garbage-collection sweeps.
    pub sweep_interval_secs: u64,
    pub limits: LimitsConfig,
    pub runner: RunnerConfig,
    pub catalogs: CatalogsConfig,
}

impl Default for DeckardConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            content_root: PathBuf::from("content"),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            limits: LimitsConfig::default(),
            runner: RunnerConfig::default(),
            catalogs: CatalogsConfig::default(),
        }
    }
}

impl DeckardConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml_str(&text)
    }

    /// Default config file location (`<config_dir>/deckard/deckard.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("deckard").join("deckard.toml"))
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_users == 0 {
            return Err(ConfigError::Invalid("limits.max_users must be at least 1".into()));
        }
        let end = u32::from(self.limits.first_port) + self.limits.max_users as u32;
        if self.limits.max_users > usize::from(u16::MAX) || end > u32::from(u16::MAX) + 1 {
            return Err(ConfigError::Invalid(format!(
                "port pool {}..{} does not fit in the port range",
                self.limits.first_port, end
            )));
        }
        if self.catalogs.max_per_session == 0 {
            return Err(ConfigError::Invalid(
                "catalogs.max_per_session must be at least 1".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be at least 1".into()));
        }
        if self.runner.program.is_empty() {
            return Err(ConfigError::Invalid("runner.program must not be empty".into()));
        }
        if self.catalogs.compiler.is_empty() {
            return Err(ConfigError::Invalid("catalogs.compiler must not be empty".into()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Storage parent for catalog directories.
    pub fn storage_root(&self) -> PathBuf {
        self.catalogs
            .storage_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
