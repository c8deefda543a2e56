/**
 * DEVICE REGISTRY - Current state of every radio device the daemon knows
 *
 * ROLE: id -> Device map, fed by the receive loop (merge) and by the HTTP
 * registration endpoint (register), read concurrently by the HTTP facade.
 *
 * RULES:
 * - register is an upsert: changing the declared type never clears state
 * - merge overwrites only the fields present in the reading, atomically
 * - type/name/enabled are persisted in devices_config.json, state is not
 * - saves are serialized: snapshot, write and rename happen under one lock
 */

use crate::models::{DeviceProfile, DeviceType, Measurements, Reading};
use crate::state::{new_rw_state, SharedRw};
use crate::store::{self, StoreError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub device_type: DeviceType,
    pub state: Measurements,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
    pub enabled: bool,
}

impl Device {
    fn new(device_id: &str, device_type: DeviceType) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_type,
            state: Measurements::new(),
            last_update: None,
            enabled: true,
        }
    }

    pub fn name(&self) -> &'static str {
        self.device_type.name()
    }
}

/// One entry of devices_config.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfigEntry {
    pub device_type: DeviceType,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub type DeviceConfigMap = BTreeMap<String, DeviceConfigEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// the reading created the device (first frame from an unknown sender)
    Created,
    /// device is disabled, state left untouched
    Ignored,
}

pub struct DeviceRegistry {
    devices: SharedRw<BTreeMap<String, Device>>,
    config_file: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: new_rw_state(BTreeMap::new()),
            config_file: None,
            save_lock: Mutex::new(()),
        }
    }

    pub fn with_config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Registers a device or updates its declared type. Existing state is kept.
    pub fn register(&self, device_id: &str, device_type: DeviceType) -> Device {
        self.register_with(device_id, device_type, true)
    }

    pub fn register_with(&self, device_id: &str, device_type: DeviceType, enabled: bool) -> Device {
        let mut devices = self.devices.write();
        let device = devices
            .entry(device_id.to_string())
            .or_insert_with(|| Device::new(device_id, device_type.clone()));
        device.device_type = device_type;
        device.enabled = enabled;
        info!("device registered: {} ({})", device_id, device.device_type);
        device.clone()
    }

    /// Merges the fields of `reading` into the device state. Unknown devices are
    /// created with type "unknown".
    pub fn merge(&self, device_id: &str, reading: &Reading) -> MergeOutcome {
        let mut devices = self.devices.write();
        let mut outcome = MergeOutcome::Merged;
        let device = devices.entry(device_id.to_string()).or_insert_with(|| {
            outcome = MergeOutcome::Created;
            Device::new(device_id, DeviceType::unknown())
        });

        if !device.enabled {
            debug!("device {} disabled, reading not merged", device_id);
            return MergeOutcome::Ignored;
        }

        for (field, value) in &reading.measurements {
            device.state.insert(field.clone(), value.clone());
        }
        device.last_update = Some(reading.timestamp);
        if outcome == MergeOutcome::Created {
            info!("new device seen on air: {}", device_id);
        }
        outcome
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.read().contains_key(device_id)
    }

    /// Declared profile of a device, used as a decoding hint.
    pub fn profile_of(&self, device_id: &str) -> Option<DeviceProfile> {
        self.devices.read().get(device_id).and_then(|d| d.device_type.profile())
    }

    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.read().get(device_id).cloned()
    }

    /// All devices, ordered by id.
    pub fn list(&self) -> Vec<Device> {
        self.devices.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn config_snapshot(&self) -> DeviceConfigMap {
        self.devices
            .read()
            .values()
            .map(|d| {
                (
                    d.device_id.clone(),
                    DeviceConfigEntry {
                        device_type: d.device_type.clone(),
                        name: d.name().to_string(),
                        enabled: d.enabled,
                    },
                )
            })
            .collect()
    }

    /// Loads devices_config.json and registers every entry. Returns how many were loaded.
    pub fn load_config(&self) -> Result<usize, StoreError> {
        let Some(path) = &self.config_file else { return Ok(0) };
        let Some(config) = store::load_json::<DeviceConfigMap>(path)? else {
            info!("no device configuration at {}, starting fresh", path.display());
            return Ok(0);
        };
        for (device_id, entry) in &config {
            self.register_with(device_id, entry.device_type.clone(), entry.enabled);
        }
        info!("loaded {} devices from {}", config.len(), path.display());
        Ok(config.len())
    }

    pub fn save_config(&self) -> Result<(), StoreError> {
        let Some(path) = &self.config_file else { return Ok(()) };
        let _guard = self.save_lock.lock();
        let snapshot = self.config_snapshot();
        store::save_json(path, &snapshot)?;
        info!("device configuration saved ({} devices)", snapshot.len());
        Ok(())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FrameType, Measurement};

    fn reading(device_id: &str, fields: &[(&str, f64)]) -> Reading {
        Reading {
            device_id: device_id.to_string(),
            measurements: fields
                .iter()
                .map(|(k, v)| (k.to_string(), Measurement::Number(*v)))
                .collect(),
            frame_type: FrameType::FourByte,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_merge_keeps_existing_fields() {
        let registry = DeviceRegistry::new();
        registry.register("0185A3F2", DeviceType::from("A5-04-01"));
        registry.merge("0185A3F2", &reading("0185A3F2", &[("temperature", 21.5), ("humidity", 48.0)]));
        registry.merge("0185A3F2", &reading("0185A3F2", &[("co2_ppm", 812.4)]));

        let device = registry.get("0185A3F2").unwrap();
        assert_eq!(device.state.len(), 3);
        assert_eq!(device.state["temperature"], Measurement::Number(21.5));
        assert_eq!(device.state["co2_ppm"], Measurement::Number(812.4));
        assert!(device.last_update.is_some());
    }

    #[test]
    fn test_register_twice_keeps_state() {
        let registry = DeviceRegistry::new();
        registry.register("AA", DeviceType::from("A5-09-04"));
        registry.merge("AA", &reading("AA", &[("co2_ppm", 600.0)]));
        let device = registry.register("AA", DeviceType::from("A5-09-04"));
        assert_eq!(device.state["co2_ppm"], Measurement::Number(600.0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_merge_creates_unknown_device() {
        let registry = DeviceRegistry::new();
        let outcome = registry.merge("FFEE0011", &reading("FFEE0011", &[("co2_ppm", 400.0)]));
        assert_eq!(outcome, MergeOutcome::Created);
        let device = registry.get("FFEE0011").unwrap();
        assert_eq!(device.device_type.to_string(), "unknown");
        assert_eq!(device.name(), "Unknown");
        assert_eq!(registry.merge("FFEE0011", &reading("FFEE0011", &[])), MergeOutcome::Merged);
    }

    #[test]
    fn test_disabled_device_is_not_merged() {
        let registry = DeviceRegistry::new();
        registry.register_with("AA", DeviceType::from("A5-09-04"), false);
        assert_eq!(registry.merge("AA", &reading("AA", &[("co2_ppm", 600.0)])), MergeOutcome::Ignored);
        assert!(registry.get("AA").unwrap().state.is_empty());
    }

    #[test]
    fn test_get_unknown_and_list_order() {
        let registry = DeviceRegistry::new();
        assert!(registry.get("nope").is_none());
        registry.register("B", DeviceType::unknown());
        registry.register("A", DeviceType::unknown());
        let ids: Vec<_> = registry.list().into_iter().map(|d| d.device_id).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_profile_hint() {
        let registry = DeviceRegistry::new();
        registry.register("AA", DeviceType::from("A5-04-01"));
        registry.register("BB", DeviceType::from("custom"));
        assert_eq!(registry.profile_of("AA"), Some(DeviceProfile::ClimateSensor));
        assert_eq!(registry.profile_of("BB"), None);
        assert_eq!(registry.profile_of("CC"), None);
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices_config.json");

        let registry = DeviceRegistry::new().with_config_file(&path);
        registry.register("0185A3F2", DeviceType::from("D1079-01-00"));
        registry.register_with("00112233", DeviceType::from("F6-02-01"), false);
        registry.save_config().unwrap();

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["0185A3F2"]["device_type"], "D1079-01-00");
        assert_eq!(raw["0185A3F2"]["name"], "VMI Purevent");

        let reloaded = DeviceRegistry::new().with_config_file(&path);
        assert_eq!(reloaded.load_config().unwrap(), 2);
        assert!(!reloaded.get("00112233").unwrap().enabled);
        assert_eq!(reloaded.get("00112233").unwrap().device_type.to_string(), "F6-02-01");
    }

    #[test]
    fn test_concurrent_registrations_all_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices_config.json");
        let registry = std::sync::Arc::new(DeviceRegistry::new().with_config_file(&path));

        for round in 0..20u32 {
            let workers: Vec<_> = (0..8u32)
                .map(|i| {
                    let registry = registry.clone();
                    std::thread::spawn(move || {
                        registry.register(&format!("{:08X}", round * 8 + i), DeviceType::from("A5-09-04"));
                        registry.save_config()
                    })
                })
                .collect();
            for w in workers {
                w.join().unwrap().unwrap();
            }
            let saved = store::load_json::<DeviceConfigMap>(&path).unwrap().unwrap();
            assert_eq!(saved.len(), ((round + 1) * 8) as usize);
        }

        let reloaded = DeviceRegistry::new().with_config_file(&path);
        assert_eq!(reloaded.load_config().unwrap(), 160);
    }

    #[test]
    fn test_concurrent_merges_do_not_tear() {
        let registry = std::sync::Arc::new(DeviceRegistry::new());
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for n in 0..200 {
                        let v = (i * 1000 + n) as f64;
                        registry.merge("AA", &reading("AA", &[("a", v), ("b", v)]));
                    }
                })
            })
            .collect();
        for _ in 0..200 {
            if let Some(d) = registry.get("AA") {
                assert_eq!(d.state.get("a"), d.state.get("b"));
            }
        }
        for w in writers {
            w.join().unwrap();
        }
    }
}
