//! Configuration system for the `taskboard` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use taskboard_proto::task::{MAX_TASK_TITLE_LENGTH, Scope, Status};

use crate::gateway::ws::WsOptions;
use crate::sync::engine::EngineConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The store URL is not a `ws://` or `wss://` URL.
    #[error("invalid store url {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A setting needed to reach the store is absent.
    #[error("missing setting: {0} (pass --{0} or set it in the config file)")]
    Missing(&'static str),

    /// The configured owner id is blank.
    #[error("owner id must not be blank")]
    BlankOwner,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    store: StoreFileConfig,
    sync: SyncFileConfig,
}

/// `[store]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    url: Option<String>,
    owner_id: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    feed_buffer: Option<usize>,
    max_title_len: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Store --
    /// WebSocket URL of the task store.
    pub store_url: Option<String>,
    /// Owner whose tasks are synchronized.
    pub owner_id: Option<String>,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Timeout for each store call.
    pub request_timeout: Duration,

    // -- Sync --
    /// Capacity of the change feed channel.
    pub feed_buffer: usize,
    /// Maximum task title length in characters.
    pub max_title_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            owner_id: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            feed_buffer: 256,
            max_title_len: MAX_TASK_TITLE_LENGTH,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/taskboard/config.toml`) is
    /// tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            store_url: cli.store_url.clone().or_else(|| file.store.url.clone()),
            owner_id: cli
                .owner_id
                .clone()
                .or_else(|| file.store.owner_id.clone()),
            connect_timeout: file
                .store
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .store
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            feed_buffer: file.sync.feed_buffer.unwrap_or(defaults.feed_buffer),
            max_title_len: file.sync.max_title_len.unwrap_or(defaults.max_title_len),
        }
    }

    /// The validated store URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if no URL is configured and
    /// [`ConfigError::InvalidUrl`] if it is not a WebSocket URL.
    pub fn store_url(&self) -> Result<url::Url, ConfigError> {
        let raw = self
            .store_url
            .as_deref()
            .ok_or(ConfigError::Missing("store-url"))?;
        validate_store_url(raw)
    }

    /// The scope derived from the configured owner.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if no owner is configured and
    /// [`ConfigError::BlankOwner`] if it is blank.
    pub fn scope(&self) -> Result<Scope, ConfigError> {
        let owner = self
            .owner_id
            .clone()
            .ok_or(ConfigError::Missing("owner-id"))?;
        Scope::new(owner).map_err(|_| ConfigError::BlankOwner)
    }

    /// Connection options for [`WsStore`](crate::gateway::ws::WsStore).
    #[must_use]
    pub const fn to_ws_options(&self) -> WsOptions {
        WsOptions {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            feed_buffer: self.feed_buffer,
        }
    }

    /// Engine tuning derived from this configuration.
    #[must_use]
    pub const fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_title_len: self.max_title_len,
        }
    }
}

/// Checks that `raw` parses and uses the `ws` or `wss` scheme.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidUrl`] otherwise.
pub fn validate_store_url(raw: &str) -> Result<url::Url, ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{other}', expected ws or wss"),
        }),
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task board with a live-synchronized task list")]
pub struct CliArgs {
    /// WebSocket URL of the task store.
    #[arg(long, env = "TASKBOARD_STORE_URL")]
    pub store_url: Option<String>,

    /// Owner whose tasks are shown.
    #[arg(long, env = "TASKBOARD_OWNER_ID")]
    pub owner_id: Option<String>,

    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskboard.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do once synchronized (default: `list`).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Board commands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the board once.
    List,
    /// Create a task.
    Add {
        /// Task title.
        title: String,
        /// Task description.
        #[arg(long, default_value = "")]
        description: String,
        /// Initial column.
        #[arg(long, default_value = "todo")]
        status: Status,
        /// Tags (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Sprint reference.
        #[arg(long)]
        sprint: Option<String>,
    },
    /// Change fields of a task.
    Edit {
        /// Task id.
        id: String,
        /// New title.
        #[arg(long)]
        title: Option<String>,
        /// New description.
        #[arg(long)]
        description: Option<String>,
        /// Replace the tags (repeatable).
        #[arg(long = "tag")]
        tags: Option<Vec<String>>,
        /// New sprint reference.
        #[arg(long)]
        sprint: Option<String>,
    },
    /// Move a task to another column.
    Move {
        /// Task id.
        id: String,
        /// Target column: todo, inprogress or done.
        status: Status,
    },
    /// Delete a task.
    Delete {
        /// Task id.
        id: String,
    },
    /// Print the board on every change until Ctrl-C.
    Watch,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and a missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskboard").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
