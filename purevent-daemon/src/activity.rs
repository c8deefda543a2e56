//! Per-device runtime snapshot (devices.json): the last messages seen from
//! each sender and when. Fed by the dispatcher like the history store.

use crate::dispatch::{ReadingSubscriber, SubscriberError};
use crate::models::{FrameType, Measurements, Reading};
use crate::state::{new_state, Shared};
use crate::store::{self, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;
use tracing::{debug, error};

pub const MESSAGES_PER_DEVICE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityMessage {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub rorg: FrameType,
    pub data: Measurements,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceActivity {
    pub sender_id: String,
    pub messages: VecDeque<ActivityMessage>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
}

pub struct ActivityLog {
    devices: Shared<BTreeMap<String, DeviceActivity>>,
    per_device: usize,
    flush_every: u64,
    recorded: AtomicU64,
    file: Option<PathBuf>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self {
            devices: new_state(BTreeMap::new()),
            per_device: MESSAGES_PER_DEVICE,
            flush_every: crate::history::FLUSH_EVERY,
            recorded: AtomicU64::new(0),
            file: None,
        }
    }

    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_per_device(mut self, n: usize) -> Self {
        self.per_device = n.max(1);
        self
    }

    pub fn with_flush_every(mut self, n: u64) -> Self {
        self.flush_every = n;
        self
    }

    pub fn record(&self, reading: &Reading) {
        {
            let mut devices = self.devices.lock();
            let activity = devices.entry(reading.device_id.clone()).or_insert_with(|| DeviceActivity {
                sender_id: reading.device_id.clone(),
                messages: VecDeque::new(),
                last_update: None,
            });
            activity.messages.push_back(ActivityMessage {
                timestamp: reading.timestamp,
                rorg: reading.frame_type,
                data: reading.measurements.clone(),
            });
            while activity.messages.len() > self.per_device {
                activity.messages.pop_front();
            }
            activity.last_update = Some(OffsetDateTime::now_utc());
        }

        let count = self.recorded.fetch_add(1, Ordering::Relaxed) + 1;
        if self.flush_every > 0 && count % self.flush_every == 0 {
            if let Err(e) = self.flush() {
                error!("activity snapshot flush failed: {}", e);
            }
        }
    }

    pub fn get(&self, sender_id: &str) -> Option<DeviceActivity> {
        self.devices.lock().get(sender_id).cloned()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.file else { return Ok(()) };
        let snapshot = self.devices.lock().clone();
        store::save_json(path, &snapshot)?;
        debug!("activity snapshot saved ({} devices)", snapshot.len());
        Ok(())
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingSubscriber for ActivityLog {
    fn name(&self) -> &str {
        "activity"
    }

    fn on_reading(&self, reading: &Reading) -> Result<(), SubscriberError> {
        self.record(reading);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Measurement;

    fn reading(id: &str, n: i64) -> Reading {
        let mut measurements = Measurements::new();
        measurements.insert("n".into(), Measurement::Integer(n));
        Reading { device_id: id.into(), measurements, frame_type: FrameType::FourByte, timestamp: OffsetDateTime::now_utc() }
    }

    #[test]
    fn test_messages_are_bounded_per_device() {
        let log = ActivityLog::new().with_per_device(3).with_flush_every(0);
        for n in 0..5 {
            log.record(&reading("AA", n));
        }
        log.record(&reading("BB", 9));

        let aa = log.get("AA").unwrap();
        assert_eq!(aa.messages.len(), 3);
        assert_eq!(aa.messages[0].data["n"], Measurement::Integer(2));
        assert!(aa.last_update.is_some());
        assert_eq!(log.get("BB").unwrap().messages.len(), 1);
    }

    #[test]
    fn test_flush_writes_snapshot_keyed_by_sender() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let log = ActivityLog::new().with_file(&path).with_flush_every(2);
        log.record(&reading("AA", 1));
        assert!(!path.exists());
        log.record(&reading("AA", 2));

        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["AA"]["sender_id"], "AA");
        assert_eq!(saved["AA"]["messages"].as_array().unwrap().len(), 2);
        assert_eq!(saved["AA"]["messages"][1]["rorg"], "A5");
    }
}
