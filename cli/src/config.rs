// Configuration management for the btprint CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/btprint/config.json
// - Linux: ~/.config/btprint/config.json
// - Windows: %APPDATA%\btprint\config.json

use anyhow::{Context, Result};
use btprint_core::{Device, DeviceType, LockScope, ManagerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A printer the host knows about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterEntry {
    /// Device address; `host:port` when no device node is set
    pub address: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub kind: DeviceType,

    /// Device node bound to the printer, e.g. `/dev/rfcomm0`
    #[serde(default)]
    pub device: Option<PathBuf>,
}

impl PrinterEntry {
    pub fn to_device(&self) -> Device {
        let device = Device::new(self.address.clone()).with_kind(self.kind);
        match &self.name {
            Some(name) => device.with_name(name.clone()),
            None => device,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Printers reported as paired devices
    #[serde(default)]
    pub printers: Vec<PrinterEntry>,

    /// Printer manager settings
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Where this config was loaded from
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("btprint");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the default config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load from `path`, or from the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load_from(&Self::config_file()?),
        }
    }

    /// Load config from `path`, or create a default one there if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Config::default()
        };
        config.path = Some(path.to_path_buf());
        if !path.exists() {
            config.save()?;
        }
        config
            .manager
            .validate()
            .context("Invalid manager settings")?;
        Ok(config)
    }

    /// Save config to the file it was loaded from
    pub fn save(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => Self::config_file()?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn find_printer(&self, address: &str) -> Option<&PrinterEntry> {
        self.printers.iter().find(|p| p.address == address)
    }

    /// Add or replace a printer
    pub fn add_printer(&mut self, entry: PrinterEntry) -> Result<()> {
        self.printers.retain(|p| p.address != entry.address);
        self.printers.push(entry);
        self.save()
    }

    /// Remove a printer; returns whether it was known
    pub fn remove_printer(&mut self, address: &str) -> Result<bool> {
        let before = self.printers.len();
        self.printers.retain(|p| p.address != address);
        let removed = self.printers.len() != before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Set a manager setting
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let manager = &mut self.manager;
        match key {
            "max_chunk_bytes" => {
                manager.max_chunk_bytes = value.parse().context("Invalid number")?;
            }
            "bytes_per_tick" => {
                manager.pacing.bytes_per_tick = value.parse().context("Invalid number")?;
            }
            "tick_ms" => {
                manager.pacing.tick_ms = value.parse().context("Invalid number")?;
            }
            "lock_scope" => {
                manager.lock_scope = match value {
                    "manager" => LockScope::Manager,
                    "per_address" => LockScope::PerAddress,
                    _ => anyhow::bail!("Invalid lock scope: {} (manager | per_address)", value),
                };
            }
            "close_channels_on_radio_off" => {
                manager.close_channels_on_radio_off =
                    value.parse().context("Invalid boolean value")?;
            }
            "emit_failed_state" => {
                manager.emit_failed_state = value.parse().context("Invalid boolean value")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.manager.validate().context("Invalid value")?;
        self.save()?;
        Ok(())
    }

    /// Get a manager setting
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// List all manager settings
    pub fn list(&self) -> Vec<(String, String)> {
        let manager = &self.manager;
        let scope = match manager.lock_scope {
            LockScope::Manager => "manager",
            LockScope::PerAddress => "per_address",
        };
        vec![
            ("max_chunk_bytes".to_string(), manager.max_chunk_bytes.to_string()),
            ("bytes_per_tick".to_string(), manager.pacing.bytes_per_tick.to_string()),
            ("tick_ms".to_string(), manager.pacing.tick_ms.to_string()),
            ("lock_scope".to_string(), scope.to_string()),
            (
                "close_channels_on_radio_off".to_string(),
                manager.close_channels_on_radio_off.to_string(),
            ),
            ("emit_failed_state".to_string(), manager.emit_failed_state.to_string()),
        ]
    }
}
