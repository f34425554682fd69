//! Server settings.
//!
//! Command-line flags and their `TASKBOARD_SERVER_*` environment fallbacks
//! take precedence over the `[server]` table of
//! `~/.config/taskboard-server/config.toml`. The two schema switches are
//! plain flags: either source can turn them on, neither can turn the other
//! off.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_BIND: &str = "0.0.0.0:9000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: PathBuf, source: io::Error },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The bind address is not `host:port` with a literal IP.
    #[error("invalid bind address {addr:?}: {source}")]
    InvalidBind {
        addr: String,
        source: std::net::AddrParseError,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    server: ServerTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerTable {
    bind_addr: Option<String>,
    legacy_schema: bool,
    unfiltered_feed: bool,
}

/// Command line of `taskboard-server`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Reference task store for taskboard")]
pub struct ServerCliArgs {
    /// Socket address to listen on.
    #[arg(short, long, env = "TASKBOARD_SERVER_ADDR")]
    pub bind: Option<String>,

    /// Config file to read instead of the per-user default.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serve a table without the `sprint_id` column.
    #[arg(long)]
    pub legacy_schema: bool,

    /// Send every change to every subscriber.
    #[arg(long)]
    pub unfiltered_feed: bool,

    #[arg(long, default_value = "info", env = "TASKBOARD_SERVER_LOG")]
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Table lacks the optional column; full-column calls fail.
    pub legacy_schema: bool,
    /// Feeds ignore owner filters.
    pub unfiltered_feed: bool,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            legacy_schema: false,
            unfiltered_feed: false,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Reads the config file named by `--config`, or the default one if it
    /// exists, and merges `cli` over it.
    ///
    /// # Errors
    ///
    /// Fails if an explicitly named file cannot be read, if any file does not
    /// parse, or if the bind address is malformed.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_settings(path)?.ok_or_else(|| ConfigError::ReadFile {
                path: path.clone(),
                source: io::ErrorKind::NotFound.into(),
            })?,
            None => default_path()
                .map(|path| read_settings(&path))
                .transpose()?
                .flatten()
                .unwrap_or_default(),
        };
        Self::merge(cli, file.server)
    }

    fn merge(cli: &ServerCliArgs, file: ServerTable) -> Result<Self, ConfigError> {
        let addr = cli
            .bind
            .clone()
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = addr
            .parse()
            .map_err(|source| ConfigError::InvalidBind { addr, source })?;

        Ok(Self {
            bind_addr,
            legacy_schema: cli.legacy_schema || file.legacy_schema,
            unfiltered_feed: cli.unfiltered_feed || file.unfiltered_feed,
            log_level: cli.log_level.clone(),
        })
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("taskboard-server").join("config.toml"))
}

/// `Ok(None)` when the file does not exist.
fn read_settings(path: &Path) -> Result<Option<FileSettings>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(toml::from_str(&text)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}
