//! Persistent application configuration and protocol timing constants.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::protocol::AudioParams;

/// Heartbeat publish interval while the control channel is connected
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Fixed wait before reconnect / provisioning retry attempts
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
/// Grace period after listen(stop) before the session is closed
pub const INACTIVITY_GRACE: Duration = Duration::from_secs(5);
/// How long to wait for the server to acknowledge an outbound hello
pub const HELLO_ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub provisioning: ProvisioningSettings,
    pub audio: AudioSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningSettings {
    /// OTA endpoint that returns the MQTT credential set
    pub ota_url: String,
    /// Overrides the MAC-derived device identifier when set
    pub device_id: Option<String>,
}

/// Local capture parameters advertised in the outbound hello. Playback
/// parameters come from the server's hello acknowledgement instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provisioning: ProvisioningSettings::default(),
            audio: AudioSettings::default(),
        }
    }
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            ota_url: "https://api.tenclass.net/xiaozhi/ota/".to_string(),
            device_id: None,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_duration_ms: 60,
        }
    }
}

impl AppConfig {
    pub fn capture_params(&self) -> AudioParams {
        AudioParams {
            format: "opus".to_string(),
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            frame_duration: self.audio.frame_duration_ms,
        }
    }
}

/// Loads and persists [`AppConfig`] as TOML in the platform config dir.
pub struct ConfigManager {
    config: AppConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_path = Self::default_path()?;
        Self::with_path(config_path)
    }

    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            match toml::from_str(&contents) {
                Ok(config) => {
                    info!("loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    warn!("invalid configuration ({}), using defaults", e);
                    AppConfig::default()
                }
            }
        } else {
            AppConfig::default()
        };
        Ok(Self { config, config_path })
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self {
            config,
            config_path: Self::default_path().unwrap_or_else(|_| PathBuf::from("vocalink.toml")),
        }
    }

    fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("no platform configuration directory")?;
        Ok(base.join("vocalink").join("config.toml"))
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(&self.config).context("failed to serialize configuration")?;
        fs::write(&self.config_path, contents)
            .with_context(|| format!("failed to write {}", self.config_path.display()))?;
        info!("configuration saved to {}", self.config_path.display());
        Ok(())
    }
}
