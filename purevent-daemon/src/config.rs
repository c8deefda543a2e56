//! Daemon configuration: optional YAML file, then `PUREVENT_*` environment
//! overrides. Bad values are reported and replaced by the default, never fatal.

use crate::models::parse_address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialSettings,
    pub http: HttpConf,
    pub storage: StorageConf,
    pub log_level: String,
    /// create registry entries for frames from unknown senders
    pub auto_register: bool,
    /// radio address used as sender of outbound telegrams (hex)
    pub sender_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub max_retry: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConf {
    pub data_dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            http: HttpConf::default(),
            storage: StorageConf::default(),
            log_level: "info".into(),
            auto_register: true,
            sender_id: "00000000".into(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 57600,
            read_timeout_ms: 1000,
            max_retry: 3,
        }
    }
}

impl SerialSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".into() }
    }
}

impl Default for StorageConf {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("/data/purevent2ha") }
    }
}

impl StorageConf {
    pub fn devices_file(&self) -> PathBuf {
        self.data_dir.join("devices.json")
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    pub fn device_config_file(&self) -> PathBuf {
        self.data_dir.join("devices_config.json")
    }
}

impl BridgeConfig {
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Applies `PUREVENT_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PUREVENT_PORT") {
            self.serial.port = v;
        }
        parse_env(&lookup, "PUREVENT_BAUDRATE", &mut self.serial.baud_rate);
        parse_env(&lookup, "PUREVENT_TIMEOUT_MS", &mut self.serial.read_timeout_ms);
        parse_env(&lookup, "PUREVENT_MAX_RETRY", &mut self.serial.max_retry);
        if let Some(v) = lookup("PUREVENT_LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }
        if let Some(v) = lookup("PUREVENT_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PUREVENT_HTTP_ADDR") {
            self.http.bind = v;
        }
        parse_env(&lookup, "PUREVENT_AUTO_REGISTER", &mut self.auto_register);
        if let Some(v) = lookup("PUREVENT_SENDER_ID") {
            if parse_address(&v).is_some() {
                self.sender_id = v;
            } else {
                warn!("invalid value for PUREVENT_SENDER_ID ({v}), using default: {}", self.sender_id);
            }
        }
    }

    pub fn sender_address(&self) -> u32 {
        parse_address(&self.sender_id).unwrap_or(0)
    }
}

fn parse_env<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: std::str::FromStr + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<T>() {
        Ok(v) => *target = v,
        Err(_) => warn!("invalid value for {key} ({raw}), using default: {target}"),
    }
}

/// YAML file named by `PUREVENT_CONFIG` (default `purevent.yaml`), then the environment.
pub fn load_config() -> BridgeConfig {
    let path = std::env::var("PUREVENT_CONFIG").unwrap_or_else(|_| "purevent.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        BridgeConfig::from_file(Path::new(&path)).unwrap_or_else(|e| {
            eprintln!("[purevent] invalid config {path}: {e}");
            BridgeConfig::default()
        })
    } else {
        BridgeConfig::default()
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_match_gateway() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.serial.port, "/dev/ttyUSB0");
        assert_eq!(cfg.serial.baud_rate, 57600);
        assert_eq!(cfg.serial.max_retry, 3);
        assert_eq!(cfg.serial.read_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.http.bind, "0.0.0.0:5000");
        assert_eq!(cfg.storage.history_file(), PathBuf::from("/data/purevent2ha/history.json"));
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = BridgeConfig::default();
        cfg.apply_env(env(&[
            ("PUREVENT_PORT", "/dev/ttyACM0"),
            ("PUREVENT_BAUDRATE", "115200"),
            ("PUREVENT_MAX_RETRY", "5"),
            ("PUREVENT_LOG_LEVEL", "DEBUG"),
            ("PUREVENT_AUTO_REGISTER", "false"),
            ("PUREVENT_SENDER_ID", "FF8A1200"),
        ]));
        assert_eq!(cfg.serial.port, "/dev/ttyACM0");
        assert_eq!(cfg.serial.baud_rate, 115200);
        assert_eq!(cfg.serial.max_retry, 5);
        assert_eq!(cfg.log_level, "debug");
        assert!(!cfg.auto_register);
        assert_eq!(cfg.sender_address(), 0xFF8A1200);
    }

    #[test]
    fn test_invalid_env_values_keep_defaults() {
        let mut cfg = BridgeConfig::default();
        cfg.apply_env(env(&[
            ("PUREVENT_BAUDRATE", "fast"),
            ("PUREVENT_MAX_RETRY", "-1"),
            ("PUREVENT_SENDER_ID", "zz"),
        ]));
        assert_eq!(cfg.serial.baud_rate, 57600);
        assert_eq!(cfg.serial.max_retry, 3);
        assert_eq!(cfg.sender_id, "00000000");
    }

    #[test]
    fn test_partial_yaml() {
        let cfg = BridgeConfig::from_yaml("serial:\n  port: /dev/ttyAMA0\nauto_register: false\n").unwrap();
        assert_eq!(cfg.serial.port, "/dev/ttyAMA0");
        assert_eq!(cfg.serial.baud_rate, 57600);
        assert!(!cfg.auto_register);
        assert_eq!(BridgeConfig::from_yaml("   ").unwrap(), BridgeConfig::default());
        assert!(BridgeConfig::from_yaml("serial: [").is_err());
    }
}
