use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::video::CaptureSettings;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_device_url")]
    pub device_url: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Deadline for status and control requests (not the stream)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_capture_fps")]
    pub capture_fps: u32,

    #[serde(default = "default_surface_width")]
    pub surface_width: u32,

    #[serde(default = "default_surface_height")]
    pub surface_height: u32,

    #[serde(default = "default_bitrate")]
    pub bitrate_kbps: u32,

    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

fn default_device_url() -> String {
    "http://192.168.1.100:3014".to_string()
}

fn default_poll_interval() -> u64 {
    500
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    2000
}

fn default_capture_fps() -> u32 {
    30
}

fn default_surface_width() -> u32 {
    640
}

fn default_surface_height() -> u32 {
    480
}

fn default_bitrate() -> u32 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_url: default_device_url(),
            poll_interval_ms: default_poll_interval(),
            reconnect_delay_ms: default_reconnect_delay(),
            request_timeout_ms: default_request_timeout(),
            capture_fps: default_capture_fps(),
            surface_width: default_surface_width(),
            surface_height: default_surface_height(),
            bitrate_kbps: default_bitrate(),
            download_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/remotecam/config.json)
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("remotecam").join("config.json"))
    }

    /// Directory finished recordings are written to
    pub fn download_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.download_dir {
            return Ok(dir.clone());
        }
        if let Ok(dir) = std::env::var("XDG_DOWNLOAD_DIR") {
            return Ok(PathBuf::from(dir));
        }
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join("Downloads"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            width: self.surface_width,
            height: self.surface_height,
            fps: self.capture_fps,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.device_url)
            .with_context(|| format!("device_url is not a valid URL: {}", self.device_url))?;

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("poll_interval_ms must be greater than zero"));
        }

        if self.reconnect_delay_ms == 0 {
            return Err(anyhow::anyhow!("reconnect_delay_ms must be greater than zero"));
        }

        if self.request_timeout_ms == 0 {
            return Err(anyhow::anyhow!("request_timeout_ms must be greater than zero"));
        }

        if !(1..=120).contains(&self.capture_fps) {
            return Err(anyhow::anyhow!("capture_fps must be between 1 and 120"));
        }

        // VP8 works on 4:2:0 planes
        if self.surface_width == 0
            || self.surface_height == 0
            || self.surface_width % 2 != 0
            || self.surface_height % 2 != 0
        {
            return Err(anyhow::anyhow!(
                "surface_width and surface_height must be even and non-zero"
            ));
        }

        Ok(())
    }
}
