// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bluetooth::{AttributeBinder, Command, CommandKind, PeripheralAddress};
use crate::controller::ControllerSettings;

const APP_DIR: &str = "hrv-remote";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Peripheral settings.
    pub device: DeviceConfig,

    /// Defaults for outbound commands.
    pub command: CommandConfig,

    /// Countdown behavior.
    pub countdown: CountdownConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Peripheral address (`AA:BB:CC:DD:EE:FF`).
    pub address: Option<String>,

    /// Connect to `address` on startup.
    pub auto_connect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Mode code, 1..=3.
    pub kind: u8,

    /// Signal strength sent as two hex digits.
    pub signal_strength: u8,

    /// Target device id, 1..=5.
    pub device_id: u8,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            kind: 3,
            signal_strength: 0xFF,
            device_id: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownConfig {
    /// Cancel a running countdown when the link drops.
    pub cancel_on_disconnect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            device: DeviceConfig::default(),
            command: CommandConfig::default(),
            countdown: CountdownConfig::default(),
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path`, writing defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Log filter directive, falling back to `info`.
    pub fn log_filter(&self) -> &str {
        if self.log_level.trim().is_empty() {
            "info"
        } else {
            self.log_level.trim()
        }
    }

    /// Configured peripheral address, if any.
    pub fn address(&self) -> Result<Option<PeripheralAddress>> {
        self.device
            .address
            .as_deref()
            .map(|a| a.parse().map_err(|e| anyhow!("[device] address: {}", e)))
            .transpose()
    }

    /// Build facade settings from the configured command defaults.
    pub fn to_settings(&self) -> Result<ControllerSettings> {
        let kind = CommandKind::from_code(self.command.kind)
            .ok_or_else(|| anyhow!("[command] kind must be 1..=3, got {}", self.command.kind))?;
        let command = Command::new(
            kind,
            self.command.signal_strength,
            0,
            self.command.device_id,
        );
        command
            .validate()
            .map_err(|e| anyhow!("[command] {}", e))?;

        Ok(ControllerSettings {
            command,
            cancel_countdown_on_disconnect: self.countdown.cancel_on_disconnect,
            binder: AttributeBinder::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_creates_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, Config::default());
        assert_eq!(config.command.kind, 3);
        assert_eq!(config.command.signal_strength, 0xFF);
        assert!(!config.countdown.cancel_on_disconnect);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.device.address = Some("24:0A:C4:12:34:56".to_string());
        config.device.auto_connect = true;
        config.countdown.cancel_on_disconnect = true;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device]\naddress = \"24:0A:C4:12:34:56\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.device.address.as_deref(), Some("24:0A:C4:12:34:56"));
        assert_eq!(config.command, CommandConfig::default());
        assert_eq!(config.log_filter(), "info");
    }

    #[test]
    fn test_to_settings() {
        let settings = Config::default().to_settings().unwrap();
        assert_eq!(settings.command.encode().unwrap(), "rt3,FF,00,1\r\n");
        assert!(!settings.cancel_countdown_on_disconnect);
    }

    #[test]
    fn test_to_settings_rejects_bad_values() {
        let mut config = Config::default();
        config.command.kind = 7;
        assert!(config.to_settings().is_err());

        let mut config = Config::default();
        config.command.device_id = 9;
        assert!(config.to_settings().is_err());
    }

    #[test]
    fn test_address_validation() {
        let mut config = Config::default();
        assert!(config.address().unwrap().is_none());

        config.device.address = Some("not-an-address".to_string());
        assert!(config.address().is_err());
    }
}
