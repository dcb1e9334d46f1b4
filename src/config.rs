//! Configuration module for the relay server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::session::SessionSettings;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8765";

/// Default client URL
pub const DEFAULT_URL: &str = "ws://localhost:8765";

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "echo_relay")]
#[command(version)]
#[command(about = "WebSocket echo/relay server and line client", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the WebSocket server
    Serve(ServeArgs),
    /// Connect to a server and relay stdin lines
    Connect(ConnectArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8765)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Routing policy: echo, broadcast or targeted
    #[arg(short, long)]
    pub policy: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Server URL
    #[arg(short, long, default_value = DEFAULT_URL)]
    pub url: String,

    /// Input line that ends the session
    #[arg(short, long, default_value = "sair")]
    pub sentinel: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub address: String,
    /// Routing policy name
    pub policy: String,
    /// Prefix prepended by the echo policy
    pub echo_prefix: String,
    /// Broadcast skips the sender
    pub broadcast_exclude_origin: bool,
    /// Text message that closes the session; empty disables it
    pub close_sentinel: String,
    /// Outbound queue length per connection
    pub channel_capacity: usize,
    pub write_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDR.to_string(),
            policy: "echo".to_string(),
            echo_prefix: "Echo: ".to_string(),
            broadcast_exclude_origin: false,
            close_sentinel: "sair".to_string(),
            channel_capacity: 32,
            write_timeout_ms: 5_000,
            handshake_timeout_ms: 10_000,
            close_timeout_ms: 2_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub policy: String,
    pub echo_prefix: String,
    pub broadcast_exclude_origin: bool,
    pub close_sentinel: Option<String>,
    pub channel_capacity: usize,
    pub write_timeout: Duration,
    pub handshake_timeout: Duration,
    pub close_timeout: Duration,
    pub shutdown_grace: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(&ServeArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load(args: &ServeArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref path) = args.config {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str(&contents)?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(args, toml_config))
    }

    fn merge(args: &ServeArgs, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        let close_sentinel = Some(server.close_sentinel).filter(|s| !s.is_empty());

        Config {
            address: args.address.clone().unwrap_or(server.address),
            policy: args.policy.clone().unwrap_or(server.policy),
            echo_prefix: server.echo_prefix,
            broadcast_exclude_origin: server.broadcast_exclude_origin,
            close_sentinel,
            channel_capacity: server.channel_capacity,
            write_timeout: Duration::from_millis(server.write_timeout_ms),
            handshake_timeout: Duration::from_millis(server.handshake_timeout_ms),
            close_timeout: Duration::from_millis(server.close_timeout_ms),
            shutdown_grace: Duration::from_millis(server.shutdown_grace_ms),
            log_level: args
                .log_level
                .clone()
                .unwrap_or(toml_config.logging.level),
        }
    }

    /// Tunables handed to every session
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            close_sentinel: self.close_sentinel.clone(),
            channel_capacity: self.channel_capacity,
            write_timeout: self.write_timeout,
            close_timeout: self.close_timeout,
            handshake_timeout: self.handshake_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.address, "127.0.0.1:8765");
        assert_eq!(config.policy, "echo");
        assert_eq!(config.echo_prefix, "Echo: ");
        assert_eq!(config.close_sentinel.as_deref(), Some("sair"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            address = "0.0.0.0:9000"
            policy = "broadcast"
            broadcast_exclude_origin = true
            close_sentinel = ""
            write_timeout_ms = 250

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let config = Config::merge(&ServeArgs::default(), toml_config);

        assert_eq!(config.address, "0.0.0.0:9000");
        assert_eq!(config.policy, "broadcast");
        assert!(config.broadcast_exclude_origin);
        assert!(config.close_sentinel.is_none());
        assert_eq!(config.write_timeout, Duration::from_millis(250));
        assert_eq!(config.channel_capacity, 32);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            address = "0.0.0.0:9000"
            policy = "broadcast"
        "#,
        )
        .unwrap();
        let args = ServeArgs {
            address: Some("127.0.0.1:1234".to_string()),
            policy: Some("targeted".to_string()),
            ..ServeArgs::default()
        };

        let config = Config::merge(&args, toml_config);

        assert_eq!(config.address, "127.0.0.1:1234");
        assert_eq!(config.policy, "targeted");
    }

    #[test]
    fn test_parse_serve_command() {
        let cli = CliArgs::try_parse_from(["echo_relay", "serve", "--address", "127.0.0.1:9999"]).unwrap();
        match cli.command {
            Command::Serve(args) => assert_eq!(args.address.as_deref(), Some("127.0.0.1:9999")),
            _ => panic!("Wrong subcommand"),
        }
    }

    #[test]
    fn test_parse_connect_defaults() {
        let cli = CliArgs::try_parse_from(["echo_relay", "connect"]).unwrap();
        match cli.command {
            Command::Connect(args) => {
                assert_eq!(args.url, DEFAULT_URL);
                assert_eq!(args.sentinel, "sair");
            }
            _ => panic!("Wrong subcommand"),
        }
    }

    #[test]
    fn test_missing_config_file() {
        let args = ServeArgs {
            config: Some(PathBuf::from("/nonexistent/echo_relay.toml")),
            ..ServeArgs::default()
        };
        assert!(matches!(Config::load(&args), Err(ConfigError::Io { .. })));
    }
}
