use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::region::Region;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub router: RouterConfig,
    pub signaling: SignalingConfig,
    pub logging: LoggingConfig,
}

/// Client-facing WebSocket gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub ws_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            ws_port: 8080,
        }
    }
}

/// Media-server facing listener and selection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub listen_host: String,
    pub listen_port: u16,
    /// Largest accepted frame; anything longer is treated as stream corruption
    pub max_frame_bytes: usize,
    /// Region used when a client's edge region has no servers
    pub primary_region: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 7000,
            max_frame_bytes: 16 * 1024 * 1024,
            primary_region: Region::UsEast1.as_str().to_string(),
        }
    }
}

impl RouterConfig {
    /// Parsed primary region, falling back to `us-east-1` if unparseable
    #[must_use]
    pub fn primary_region(&self) -> Region {
        self.primary_region.parse().unwrap_or(Region::UsEast1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Period of the stats push started by `beginSendingStats`
    pub stats_interval_ms: u64,
    /// Client frame size limit at the gateway
    pub max_message_bytes: usize,
    /// Depth of each transport's outbound queue
    pub outbound_buffer: usize,
    /// Interval between WebSocket pings
    pub ping_interval_secs: u64,
    /// Close the socket if no pong arrives within this window
    pub pong_timeout_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            stats_interval_ms: 1000,
            max_message_bytes: 64 * 1024,
            outbound_buffer: 256,
            ping_interval_secs: 15,
            pong_timeout_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // VROOM_ROUTER__LISTEN_PORT=7001 overrides router.listen_port
        builder = builder.add_source(
            Environment::with_prefix("VROOM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for misconfigurations, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.ws_port == 0 {
            errors.push("server.ws_port must be non-zero".to_string());
        }
        if self.router.listen_port == 0 {
            errors.push("router.listen_port must be non-zero".to_string());
        }
        if self.router.max_frame_bytes < 1024 {
            errors.push("router.max_frame_bytes must be at least 1024".to_string());
        }
        if let Err(e) = self.router.primary_region.parse::<Region>() {
            errors.push(format!("router.primary_region: {e}"));
        }
        if self.signaling.stats_interval_ms == 0 {
            errors.push("signaling.stats_interval_ms must be non-zero".to_string());
        }
        if self.signaling.outbound_buffer == 0 {
            errors.push("signaling.outbound_buffer must be non-zero".to_string());
        }
        if self.signaling.pong_timeout_secs <= self.signaling.ping_interval_secs {
            errors.push("signaling.pong_timeout_secs must exceed ping_interval_secs".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be json or pretty, got {}",
                self.logging.format
            ));
        }
        if let Err(e) = crate::logging::parse_filter(&self.logging.level) {
            errors.push(format!("logging.level: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get WebSocket gateway address
    #[must_use]
    pub fn ws_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.ws_port)
    }

    /// Get media-server listener address
    #[must_use]
    pub fn router_address(&self) -> String {
        format!("{}:{}", self.router.listen_host, self.router.listen_port)
    }
}

/// Load configuration from a config file or environment variables
///
/// Config file search order:
/// 1. explicit path (CLI flag or `VROOM_CONFIG_PATH`)
/// 2. ./config.yaml (current working directory)
/// 3. Fall back to environment variables only
pub fn load_config(explicit: Option<&str>) -> anyhow::Result<Config> {
    let config_path = explicit
        .map(str::to_string)
        .or_else(|| std::env::var("VROOM_CONFIG_PATH").ok())
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            let cwd = "config.yaml";
            Path::new(cwd).exists().then(|| cwd.to_string())
        });

    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path)?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}");
            eprintln!("Using default configuration");
            Config::default()
        })
    };

    Ok(config)
}
