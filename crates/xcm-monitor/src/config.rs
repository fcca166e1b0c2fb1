//! Monitor configuration.
//!
//! Loaded from environment variables prefixed `XCM_MONITOR__` (plus an optional file named by
//! `XCM_MONITOR__CONFIG`), then validated. Any failure stops the process before it connects.

use config::{Config, Environment, File};
use serde::Deserialize;
use sha3::{Digest, Keccak256};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "XCM_MONITOR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Accepted log verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Validated monitor settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Relay chain Sidecar base URL.
    pub relay_url: String,
    /// Parachain Sidecar base URL.
    pub para_url: String,
    /// Postgres URL of the checkpoint store.
    pub database_url: String,
    /// EIP-55 checksummed account whose parachain XCM activity is decoded in alerts.
    pub controller_address: String,
    /// Cursor start when the checkpoint store is empty.
    pub initial_block: u64,
    pub para_id: u32,
    #[serde(default = "default_api_restart_attempts")]
    pub api_restart_attempts: u32,
    /// Seconds between reconnect attempts.
    #[serde(default = "default_api_restart_delay")]
    pub api_restart_delay: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-request HTTP timeout, seconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: u64,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub metrics_prefix: String,
    #[serde(default)]
    pub alerts_enabled: bool,
    #[serde(default)]
    pub telegram_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_api_restart_attempts() -> u32 {
    5
}

fn default_api_restart_delay() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_metrics_port() -> u16 {
    9000
}

fn default_metrics_prefix() -> String {
    "xcm_".to_string()
}

/// Reconnect policy shared by both chain executors.
#[derive(Debug, Clone)]
pub struct ReconnectionConfig {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            attempts: default_api_restart_attempts(),
            delay: Duration::from_secs(default_api_restart_delay()),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn build() -> Result<Self, ConfigError> {
        let config_path_name = format!("{}__CONFIG", ENV_PREFIX);
        let mut builder = Config::builder();
        if let Ok(config_path) = std::env::var(&config_path_name) {
            builder = builder.add_source(File::with_name(&config_path));
        }
        // `__` separates the prefix so keys keep their own underscores (e.g. `relay_url`).
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );
        Self::from_config(builder.build()?)
    }

    /// Deserialize and validate an already-assembled [Config].
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("relay_url", &self.relay_url)?;
        validate_http_url("para_url", &self.para_url)?;
        if !(self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://"))
        {
            return Err(invalid("database_url", "expected a postgres:// URL"));
        }
        validate_checksum_address(&self.controller_address)
            .map_err(|reason| invalid("controller_address", reason))?;
        if self.api_restart_attempts == 0 {
            return Err(invalid("api_restart_attempts", "must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be positive"));
        }
        if self.rpc_timeout == 0 {
            return Err(invalid("rpc_timeout", "must be positive"));
        }
        if self.metrics_port <= 1024 {
            return Err(invalid(
                "metrics_port",
                format!("{} is not above 1024", self.metrics_port),
            ));
        }
        if !is_metric_prefix(&self.metrics_prefix) {
            return Err(invalid(
                "metrics_prefix",
                format!("{:?} is not a valid metric name prefix", self.metrics_prefix),
            ));
        }
        if self.alerts_enabled {
            if self.telegram_token.as_deref().map_or(true, str::is_empty) {
                return Err(invalid("telegram_token", "required when alerts are enabled"));
            }
            if self.telegram_chat_id.as_deref().map_or(true, str::is_empty) {
                return Err(invalid("telegram_chat_id", "required when alerts are enabled"));
            }
        }
        Ok(())
    }

    pub fn reconnection(&self) -> ReconnectionConfig {
        ReconnectionConfig {
            attempts: self.api_restart_attempts,
            delay: Duration::from_secs(self.api_restart_delay),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout)
    }
}

fn validate_http_url(field: &'static str, url: &str) -> Result<(), ConfigError> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| invalid(field, format!("{:?} is not an http(s) URL", url)))?;
    if rest.is_empty() {
        return Err(invalid(field, "missing host"));
    }
    Ok(())
}

fn is_metric_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// EIP-55 mixed-case checksum of a 20-byte address given as 40 hex chars (no prefix).
pub fn to_checksum_address(hex_addr: &str) -> String {
    let lower = hex_addr.to_ascii_lowercase();
    let hash = Keccak256::digest(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Accepts only 0x-prefixed 20-byte addresses whose casing matches EIP-55.
pub fn validate_checksum_address(addr: &str) -> Result<(), String> {
    let body = addr
        .strip_prefix("0x")
        .ok_or_else(|| format!("{:?} lacks 0x prefix", addr))?;
    if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("{:?} is not a 20-byte hex address", addr));
    }
    let expected = to_checksum_address(body);
    if expected != addr {
        return Err(format!("bad checksum, expected {}", expected));
    }
    Ok(())
}
