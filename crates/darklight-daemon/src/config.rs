//! Configuration loading

use darklight_serial::DEFAULT_BAUD_RATE;
use darklight_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: default_baud(),
        }
    }
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Device preferences pushed at connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Light stabilization time in milliseconds (2000-10000)
    #[serde(default = "default_stabilize_time")]
    pub stabilize_time_ms: u32,
    /// Light the panel when the cover closes
    #[serde(default)]
    pub auto_on: bool,
    /// Keep the light off while the cover is open
    #[serde(default = "default_true")]
    pub disable_light: bool,
    #[serde(default)]
    pub auto_heat: bool,
    #[serde(default)]
    pub heat_on_close: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            stabilize_time_ms: default_stabilize_time(),
            auto_on: false,
            disable_light: true,
            auto_heat: false,
            heat_on_close: false,
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_stabilize_time() -> u32 {
    2000
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Convert to the session configuration
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            stabilize_time_ms: self.session.stabilize_time_ms,
            auto_on: self.session.auto_on,
            disable_light: self.session.disable_light,
            auto_heat: self.session.auto_heat,
            heat_on_close: self.session.heat_on_close,
            poll_interval_ms: self.session.poll_interval_ms,
        }
    }
}

/// Load configuration from file, falling back to defaults when it is missing
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("darklight.toml")).unwrap();

        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud, 115_200);
        assert_eq!(config.to_session_config(), SessionConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[serial]
port = "/dev/ttyACM0"

[session]
auto_heat = true
stabilize_time_ms = 5000
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.baud, 115_200);

        let session = config.to_session_config();
        assert!(session.auto_heat);
        assert!(session.disable_light);
        assert_eq!(session.stabilize_time_ms, 5000);
        assert_eq!(session.poll_interval_ms, 1000);
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[serial]\nbaud = \"fast\"").unwrap();

        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
