//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - TOML configuration file (`--config`, or the first of [`CONFIG_PATHS`])
//! - Environment variables (`HUDDLE_PORT`, `HUDDLE_CHAT__BOT_NAME`, ...)
//! - Command line flags for host and port

use anyhow::{bail, Context, Result};
use huddle_core::clock::{is_valid_format, DEFAULT_TIME_FORMAT};
use huddle_core::{BroadcasterConfig, LeaveScope, RegistryConfig, SystemClock};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Config files probed when no path is given.
pub const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "HUDDLE";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Chat behaviour.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Chat page and static assets.
    #[serde(default)]
    pub http: HttpConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum size of a single WebSocket message in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Chat behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Sender name on welcome and join/leave notices.
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// `chrono` format of the `time` field.
    #[serde(default = "default_time_format")]
    pub time_format: String,

    /// Who hears about a disconnect: `global` or `room`.
    #[serde(default)]
    pub leave_scope: LeaveScope,

    /// Send the room an updated roster after a disconnect.
    #[serde(default)]
    pub roster_on_leave: bool,

    /// Drop rooms from the index once empty.
    #[serde(default = "default_true")]
    pub prune_empty_rooms: bool,
}

/// Chat page and static assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Path of the rendered chat page.
    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    /// Directory served for every other path.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Extra origins allowed in `script-src`.
    #[serde(default = "default_script_sources")]
    pub script_sources: Vec<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_bot_name() -> String {
    huddle_core::broadcaster::DEFAULT_BOT_NAME.to_string()
}

fn default_time_format() -> String {
    DEFAULT_TIME_FORMAT.to_string()
}

fn default_chat_path() -> String {
    "/chat".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_script_sources() -> Vec<String> {
    vec!["http://127.0.0.1:3000".to_string()]
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            chat: ChatConfig::default(),
            http: HttpConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            time_format: default_time_format(),
            leave_scope: LeaveScope::default(),
            roster_on_leave: false,
            prune_empty_rooms: true,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            chat_path: default_chat_path(),
            static_dir: default_static_dir(),
            script_sources: default_script_sources(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl ChatConfig {
    /// Broadcaster settings for this chat configuration.
    #[must_use]
    pub fn broadcaster_config(&self) -> BroadcasterConfig {
        BroadcasterConfig {
            bot_name: self.bot_name.clone(),
            leave_scope: self.leave_scope,
            roster_on_leave: self.roster_on_leave,
            registry: RegistryConfig {
                prune_empty_rooms: self.prune_empty_rooms,
            },
        }
    }

    /// Clock stamping outgoing messages.
    #[must_use]
    pub fn clock(&self) -> SystemClock {
        SystemClock::new(&self.time_format)
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Uses `path` if given, otherwise the first existing file in
    /// [`CONFIG_PATHS`], then applies `HUDDLE_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or a value has
    /// the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => CONFIG_PATHS
                .iter()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                .find(|p| p.exists()),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            info!("Loading configuration from {}", file.display());
            builder = builder.add_source(config::File::from(file.as_path()).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if !is_valid_format(&config.chat.time_format) {
            bail!("Invalid chat.time_format: {:?}", config.chat.time_format);
        }

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
