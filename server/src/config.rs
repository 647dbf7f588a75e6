use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::notify::{DEFAULT_PREVIEW_LENGTH, DEFAULT_QUEUE_KEY};
use crate::ws::actor::{PING_INTERVAL, PONG_TIMEOUT};

/// Command-line flags. Every field is optional so an absent flag leaves
/// the lower layers (TOML, env) untouched.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "aalap-server", version, about = "Aalap realtime chat and signaling gateway")]
pub struct Cli {
    /// Port to listen on [default: 3000]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./aalap.toml]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (message DB, signing key) [default: ./data]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Shared HS256 secret for access tokens. Generated into data_dir when unset.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Redis URL for the shared socket registry and push queue.
    /// Without it, both live in process memory (single instance only).
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    /// Redis list that push jobs are pushed onto [default: push:queue]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_queue_key: Option<String>,

    /// Maximum characters of message text copied into a push notification [default: 140]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_length: Option<usize>,

    /// WebSocket handshake rate limit: seconds per replenished token, per IP [default: 1]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_per_second: Option<u64>,

    /// WebSocket handshake burst size per IP [default: 20]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_burst: Option<u32>,

    /// Seconds between server pings [default: 30]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before dropping the connection [default: 10]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,
}

/// Resolved gateway configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    pub push_queue_key: String,
    pub preview_length: usize,
    pub handshake_per_second: u64,
    pub handshake_burst: u32,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            config: "./aalap.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            redis_url: None,
            push_queue_key: DEFAULT_QUEUE_KEY.to_string(),
            preview_length: DEFAULT_PREVIEW_LENGTH,
            handshake_per_second: 1,
            handshake_burst: 20,
            ping_interval_secs: PING_INTERVAL.as_secs(),
            pong_timeout_secs: PONG_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (AALAP_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, figment::Error> {
        Self::figment(cli).extract()
    }

    fn figment(cli: Cli) -> Figment {
        let defaults = Config::default();
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| defaults.config.clone());
        Figment::new()
            .merge(Serialized::defaults(defaults))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("AALAP_"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Aalap Gateway Configuration
# Place this file at ./aalap.toml or specify with --config <path>
# All settings can be overridden via environment variables (AALAP_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite message store and generated signing key
# data_dir = "./data"

# HS256 secret shared with the auth service that issues access tokens.
# When unset, a random key is generated in data_dir on first boot.
# jwt_secret = ""

# ---- Shared state ----

# Redis URL for the socket registry and notification queue.
# Required when running more than one gateway instance.
# redis_url = "redis://127.0.0.1:6379"

# Redis list the push worker consumes (default: "push:queue")
# push_queue_key = "push:queue"

# Characters of message text included in push previews (default: 140)
# preview_length = 140

# ---- Handshake rate limiting (per client IP) ----
# handshake_per_second = 1
# handshake_burst = 20

# ---- Connection liveness ----
# Seconds between server pings, and how long to wait for the pong
# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}
