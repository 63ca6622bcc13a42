//! Dispatcher configuration.
//!
//! Values come from `chash.toml` (an explicit path, or the first one found
//! in the current directory or its parents); missing keys take defaults.

use crate::hashing::DEFAULT_VIRTUAL_NODES;
use crate::rpc::client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the configuration file searched for.
pub const CONFIG_FILE_NAME: &str = "chash.toml";

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Address the dispatcher's RPC server binds.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Host used to reach workers.
    #[serde(default = "default_node_host")]
    pub node_host: String,
    /// Worker executable used when `create_node` names none.
    #[serde(default)]
    pub default_node_path: Option<PathBuf>,
    /// Ring replicas per worker.
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: u32,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    /// Concurrent worker calls when listing across the cluster.
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,
    /// Attempts at deleting a moved record from its old worker.
    #[serde(default = "default_delete_retries")]
    pub delete_retries: u32,
    /// Delay between answering `shutdown` and exiting.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

// Default value functions
fn default_listen_addr() -> String { "127.0.0.1:5000".to_string() }
fn default_node_host() -> String { "127.0.0.1".to_string() }
fn default_virtual_nodes() -> u32 { DEFAULT_VIRTUAL_NODES }
fn default_rpc_timeout_ms() -> u64 { 5000 }
fn default_connect_timeout_ms() -> u64 { 2000 }
fn default_connect_retries() -> u32 { 5 }
fn default_connect_retry_delay_ms() -> u64 { 200 }
fn default_max_fanout() -> usize { 16 }
fn default_delete_retries() -> u32 { 3 }
fn default_shutdown_grace_ms() -> u64 { 500 }

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            node_host: default_node_host(),
            default_node_path: None,
            virtual_nodes: default_virtual_nodes(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_retries: default_connect_retries(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            max_fanout: default_max_fanout(),
            delete_retries: default_delete_retries(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl DispatcherConfig {
    /// Load from `path`, or from a discovered `chash.toml`, or defaults if
    /// neither exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };
        match path {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.virtual_nodes == 0 {
            return Err(ConfigError::Invalid(
                "virtual_nodes must be greater than 0".into(),
            ));
        }
        if self.max_fanout == 0 {
            return Err(ConfigError::Invalid(
                "max_fanout must be greater than 0".into(),
            ));
        }
        if self.connect_retries == 0 {
            return Err(ConfigError::Invalid(
                "connect_retries must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Client settings for reaching workers.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            retry_attempts: self.connect_retries,
            retry_delay: Duration::from_millis(self.connect_retry_delay_ms),
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            ..ClientConfig::default()
        }
    }

    /// Delay before exiting after a shutdown request.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Find `chash.toml` in the current or parent directories.
pub fn find_config_file() -> Option<PathBuf> {
    let dir = std::env::current_dir().ok()?;
    find_config_file_from(&dir)
}

fn find_config_file_from(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Some(config_path);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}
