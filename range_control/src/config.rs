/*!
Configuration management for the range controller.
*/

use anyhow::{Context, Result};
use range_core::storage::DEFAULT_SCENARIO_FILE;
use range_core::NamingTemplates;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "range_control.toml";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: PortConfig,
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
    pub source: SourceConfig,
    pub naming: NamingTemplates,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            port: PortConfig::default(),
            session: SessionConfig::default(),
            dispatch: DispatchConfig::default(),
            source: SourceConfig::default(),
            naming: NamingTemplates::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            info!("Config file {} not found, using defaults", path.as_ref().display());
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Serial port settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Port name, e.g. `COM4` or `/dev/ttyUSB0`
    pub name: String,

    pub baud_rate: u32,

    /// Read/write timeout of the serial link
    pub timeout_ms: u64,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            name: "COM4".to_string(),
            baud_rate: 4800,
            timeout_ms: 50,
        }
    }
}

/// Timing of one transmit session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reads performed to drain the line before the init sequence
    pub drain_reads: u32,

    pub drain_interval_ms: u64,

    /// Pause after the init sequence
    pub settle_ms: u64,

    /// Read attempts while waiting for a response
    pub response_polls: u32,

    pub response_poll_interval_ms: u64,

    /// Size of the read buffer
    pub read_buffer: usize,
}

impl SessionConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn response_poll_interval(&self) -> Duration {
        Duration::from_millis(self.response_poll_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drain_reads: 10,
            drain_interval_ms: 16,
            settle_ms: 500,
            response_polls: 10,
            response_poll_interval_ms: 100,
            read_buffer: 64,
        }
    }
}

/// Automatic dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Delay between polls of the distance source
    pub poll_interval_ms: u64,

    /// Delay after a failed poll
    pub backoff_ms: u64,

    /// Scenario file loaded at startup and written by editing commands
    pub scenario_file: String,
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            backoff_ms: 5000,
            scenario_file: DEFAULT_SCENARIO_FILE.to_string(),
        }
    }
}

/// Where requested distances come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// JSON document on disk, re-read on every poll
    File { path: String },

    /// External program whose stdout is the JSON document, e.g. `curl`
    /// against the Firestore REST endpoint
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_command_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::File {
            path: "target_lines.json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_roundtrip() {
        let mut original_config = AppConfig::new();
        original_config.source = SourceConfig::Command {
            program: "curl".to_string(),
            args: vec!["-s".to_string(), "https://example.invalid/lines".to_string()],
            timeout_ms: 3000,
        };

        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        // Save and load
        original_config.save_to_file(temp_path).unwrap();
        let loaded_config = AppConfig::load_from_file(temp_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::new();

        assert_eq!(config.port.name, "COM4");
        assert_eq!(config.port.baud_rate, 4800);
        assert_eq!(config.dispatch.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.dispatch.backoff(), Duration::from_secs(5));
        assert_eq!(config.dispatch.scenario_file, "scenarios.txt");
        assert_eq!(config.session.settle(), Duration::from_millis(500));
        assert_eq!(config.naming.templates.len(), 2);
        assert!(matches!(config.source, SourceConfig::File { .. }));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            "[port]\nname = \"/dev/ttyUSB0\"\n\n[source]\nkind = \"command\"\nprogram = \"fetch-lines\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.port.name, "/dev/ttyUSB0");
        assert_eq!(config.port.baud_rate, 4800);
        assert_eq!(
            config.source,
            SourceConfig::Command {
                program: "fetch-lines".to_string(),
                args: Vec::new(),
                timeout_ms: 10_000,
            }
        );
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::new());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[port\n").unwrap();
        assert!(AppConfig::load_or_default(&broken).is_err());
    }
}
