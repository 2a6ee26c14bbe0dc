use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::serial::PortSettings;

/// Construction knobs for the serial manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub scan_interval_ms: u64,
    pub auto_reconnect: bool,
    /// How often the service checks an open port for inbound bytes
    pub read_poll_interval_ms: u64,
    /// Bounded wait for a send to drain
    pub send_flush_timeout_ms: u64,
    /// Bounded wait for pending writes while closing
    pub close_drain_timeout_ms: u64,
    pub event_capacity: usize,
    pub default_settings: PortSettings,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 2000,
            auto_reconnect: true,
            read_poll_interval_ms: 10,
            send_flush_timeout_ms: 100,
            close_drain_timeout_ms: 150,
            event_capacity: 256,
            default_settings: PortSettings::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new(scan_interval_ms: u64, auto_reconnect: bool) -> Self {
        Self {
            scan_interval_ms,
            auto_reconnect,
            ..Self::default()
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms.max(1))
    }

    pub fn send_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.send_flush_timeout_ms)
    }

    pub fn close_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.close_drain_timeout_ms)
    }
}

/// Application settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub serial: ManagerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            serial: ManagerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
