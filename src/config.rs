//! Configuration loading.
//!
//! Settings come from a TOML file plus environment overrides for the
//! deployment-sensitive values (`EXTERNAL_PLATFORM_TOKEN`,
//! `WEBHOOK_VERIFY_TOKEN`, `INTEGRATION_MODE`, `POLL_INTERVAL_SECONDS`,
//! `SOFT_CLOSE_DEFAULT_MINUTES`, `BACKUP_SWEEP_MINUTES`).

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
}

/// Whether platform comments are pulled automatically or pushed by an
/// operator surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Page access token for the Graph-style API.
    #[serde(default)]
    pub access_token: String,
    /// Shared secret echoed back during webhook verification.
    #[serde(default)]
    pub verify_token: String,
    #[serde(default = "default_integration_mode")]
    pub integration_mode: IntegrationMode,
    #[serde(default = "default_graph_url")]
    pub base_url: String,
    /// Comment fetch / reply timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_backup_sweep")]
    pub backup_sweep_minutes: u64,
    #[serde(default = "default_soft_close")]
    pub soft_close_default_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Per-topic event buffer; lagging subscribers drop oldest.
    #[serde(default = "default_hub_capacity")]
    pub channel_capacity: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_db_url() -> String {
    "sqlite:auctions.db?mode=rwc".to_string()
}
fn default_integration_mode() -> IntegrationMode {
    IntegrationMode::Auto
}
fn default_graph_url() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}
fn default_request_timeout() -> u64 {
    10
}
fn default_poll_interval() -> u64 {
    60
}
fn default_backup_sweep() -> u64 {
    5
}
fn default_soft_close() -> i64 {
    5
}
fn default_hub_capacity() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            verify_token: String::new(),
            integration_mode: default_integration_mode(),
            base_url: default_graph_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            backup_sweep_minutes: default_backup_sweep(),
            soft_close_default_minutes: default_soft_close(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_hub_capacity(),
        }
    }
}

impl Config {
    /// Load from a TOML file, then apply environment overrides. A
    /// missing file yields the defaults so the engine can boot from
    /// environment alone.
    pub fn load(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).to_string();

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&expanded).required(false));

        let mut cfg: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| EngineError::Config(e.to_string()))?;

        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("EXTERNAL_PLATFORM_TOKEN") {
            self.platform.access_token = v;
        }
        if let Ok(v) = std::env::var("WEBHOOK_VERIFY_TOKEN") {
            self.platform.verify_token = v;
        }
        if let Ok(v) = std::env::var("INTEGRATION_MODE") {
            match v.to_lowercase().as_str() {
                "auto" => self.platform.integration_mode = IntegrationMode::Auto,
                "manual" => self.platform.integration_mode = IntegrationMode::Manual,
                other => tracing::warn!("Ignoring unknown INTEGRATION_MODE: {}", other),
            }
        }
        if let Ok(v) = std::env::var("POLL_INTERVAL_SECONDS") {
            if let Ok(n) = v.parse() {
                self.monitor.poll_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SOFT_CLOSE_DEFAULT_MINUTES") {
            if let Ok(n) = v.parse() {
                self.monitor.soft_close_default_minutes = n;
            }
        }
        if let Ok(v) = std::env::var("BACKUP_SWEEP_MINUTES") {
            if let Ok(n) = v.parse() {
                self.monitor.backup_sweep_minutes = n;
            }
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
    }
}
