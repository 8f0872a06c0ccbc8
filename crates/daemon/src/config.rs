//! Configuration management for the rserver daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/rserver/rserver.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::console::AutoClose;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("dedup_window_secs must be greater than 0, got {0}")]
    InvalidDedupWindow(u64),

    #[error("stale_launch_secs ({stale}) must not be shorter than dedup_window_secs ({dedup})")]
    InvalidStaleWindow { dedup: u64, stale: u64 },

    #[error("input_flush_threshold must be between 1 and 4096, got {0}")]
    InvalidFlushThreshold(usize),

    #[error("max_output_lines must be greater than 0, got {0}")]
    InvalidMaxOutputLines(usize),

    #[error("poll_interval_ms must be between 1 and 10000, got {0}")]
    InvalidPollInterval(u64),

    #[error("buffer_chunk_size must be at least 64 bytes, got {0}")]
    InvalidChunkSize(usize),

    #[error("default_shell path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("websocket_bind is not a socket address: {0}")]
    InvalidWebsocketBind(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the rserver daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General server configuration.
    pub server: ServerConfig,

    /// Session launch policy.
    pub launch: LaunchConfig,

    /// Console process and terminal configuration.
    pub terminal: TerminalConfig,
}

/// General server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory for persisted state (console process index and logs).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// When set, logs are also written to a daily rolling file here.
    pub log_dir: Option<PathBuf>,

    /// Path of the JSON-RPC Unix socket. Defaults to the runtime directory.
    pub rpc_socket: Option<PathBuf>,
}

/// Session launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LaunchConfig {
    /// Path of the session executable.
    pub rsession_path: PathBuf,

    /// Config file forwarded with `--config-file`.
    pub rsession_config_file: Option<PathBuf>,

    /// Root path the server is mounted under.
    pub www_root_path: String,

    /// SameSite attribute for session cookies (empty means unset).
    pub same_site: String,

    /// Use file storage for session state.
    pub use_file_storage: bool,

    /// Always mark cookies secure.
    pub auth_cookies_force_secure: bool,

    /// The server terminates TLS itself.
    pub ssl_enabled: bool,

    /// Group a user must belong to (empty means unrestricted).
    pub auth_required_user_group: String,

    /// Lowest uid allowed to launch a session.
    pub auth_minimum_user_id: u32,

    /// Secret shared with the monitor process.
    pub monitor_shared_secret: String,

    /// Default R version label.
    pub r_version: String,

    /// Default R home directory.
    pub r_home: String,

    /// Scratch directory handed to sessions.
    pub session_tmp_dir: PathBuf,

    /// A second launch of the same context within this window is a duplicate.
    pub dedup_window_secs: u64,

    /// Pending launches older than this are evicted.
    pub stale_launch_secs: u64,
}

/// Console process and terminal configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Default shell to use for new terminals.
    pub default_shell: String,

    /// Shell used for terminals of type `custom`.
    pub custom_shell: Option<String>,

    /// Output sent to the client in one event is trimmed to this many lines.
    pub max_output_lines: usize,

    /// Saved terminal buffers are trimmed to this many lines when read.
    pub buffer_lines: usize,

    /// What happens to a terminal whose shell exits.
    pub auto_close: AutoClose,

    /// Out-of-order input is force-flushed once this many items are queued.
    pub input_flush_threshold: usize,

    /// Interval between console process polls.
    pub poll_interval_ms: u64,

    /// Offer the websocket channel to new terminals.
    pub websocket_enabled: bool,

    /// Bind address of the websocket listener.
    pub websocket_bind: String,

    /// Capture shell environments so restarts can restore them.
    pub track_env: bool,

    /// Minimum time between two environment captures of one terminal.
    pub env_capture_interval_secs: u64,

    /// Size in bytes of one `process_get_buffer_chunk` chunk.
    pub buffer_chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_dir: None,
            rpc_socket: None,
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            rsession_path: PathBuf::from("/usr/lib/rstudio-server/bin/rsession"),
            rsession_config_file: None,
            www_root_path: "/".to_string(),
            same_site: String::new(),
            use_file_storage: true,
            auth_cookies_force_secure: false,
            ssl_enabled: false,
            auth_required_user_group: String::new(),
            auth_minimum_user_id: 1000,
            monitor_shared_secret: String::new(),
            r_version: String::new(),
            r_home: String::new(),
            session_tmp_dir: std::env::temp_dir().join("rserver-sessions"),
            dedup_window_secs: 60,
            stale_launch_secs: 180,
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            custom_shell: None,
            max_output_lines: 500,
            buffer_lines: 1000,
            auto_close: AutoClose::Always,
            input_flush_threshold: 64,
            poll_interval_ms: 50,
            websocket_enabled: true,
            websocket_bind: "127.0.0.1:0".to_string(),
            track_env: true,
            env_capture_interval_secs: 15,
            buffer_chunk_size: 8192,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rserver")
        .join("rserver.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rserver")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - RSERVER_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - RSERVER_DATA_DIR: Override the data directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("RSERVER_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }

        if let Ok(dir) = std::env::var("RSERVER_DATA_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding data_dir from environment: {}", dir);
                self.server.data_dir = PathBuf::from(dir);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        if self.launch.dedup_window_secs == 0 {
            return Err(ConfigError::InvalidDedupWindow(self.launch.dedup_window_secs));
        }
        if self.launch.stale_launch_secs < self.launch.dedup_window_secs {
            return Err(ConfigError::InvalidStaleWindow {
                dedup: self.launch.dedup_window_secs,
                stale: self.launch.stale_launch_secs,
            });
        }

        let threshold = self.terminal.input_flush_threshold;
        if !(1..=4096).contains(&threshold) {
            return Err(ConfigError::InvalidFlushThreshold(threshold));
        }

        if self.terminal.max_output_lines == 0 {
            return Err(ConfigError::InvalidMaxOutputLines(
                self.terminal.max_output_lines,
            ));
        }

        let poll = self.terminal.poll_interval_ms;
        if !(1..=10_000).contains(&poll) {
            return Err(ConfigError::InvalidPollInterval(poll));
        }

        if self.terminal.buffer_chunk_size < 64 {
            return Err(ConfigError::InvalidChunkSize(self.terminal.buffer_chunk_size));
        }

        let shell_path = Path::new(&self.terminal.default_shell);
        let shell_found = if shell_path.is_absolute() {
            shell_path.exists()
        } else {
            which::which(&self.terminal.default_shell).is_ok()
        };
        if !shell_found {
            return Err(ConfigError::InvalidShellPath(
                self.terminal.default_shell.clone(),
            ));
        }

        if self
            .terminal
            .websocket_bind
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::InvalidWebsocketBind(
                self.terminal.websocket_bind.clone(),
            ));
        }

        Ok(())
    }

    /// Directory holding the console process index and terminal logs.
    pub fn console_dir(&self) -> PathBuf {
        self.server.data_dir.join("console")
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
