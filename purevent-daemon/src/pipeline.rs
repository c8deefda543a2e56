//! Glue between the receive loop and the rest of the daemon:
//! frame -> decode (with the sender's profile) -> registry merge -> dispatch.

use crate::dispatch::EventDispatcher;
use crate::health::HealthTracker;
use crate::models::{RadioFrame, Reading};
use crate::registry::{DeviceRegistry, MergeOutcome};
use crate::telegram::{self, DecodeError};
use crate::transport::FrameHandler;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TelegramPipeline {
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<EventDispatcher>,
    health: HealthTracker,
    auto_register: bool,
}

impl TelegramPipeline {
    pub fn new(registry: Arc<DeviceRegistry>, dispatcher: Arc<EventDispatcher>, health: HealthTracker) -> Self {
        Self { registry, dispatcher, health, auto_register: true }
    }

    pub fn with_auto_register(mut self, enabled: bool) -> Self {
        self.auto_register = enabled;
        self
    }

    /// Decodes one frame and fans the reading out. Skipped frames give `Ok(None)`.
    pub fn process(&self, frame: &RadioFrame) -> Result<Option<Reading>, DecodeError> {
        let sender = frame.sender_id();
        let profile = self.registry.profile_of(&sender);
        let Some(reading) = telegram::decode(frame, profile)? else {
            return Ok(None);
        };

        if self.auto_register || self.registry.contains(&sender) {
            if self.registry.merge(&sender, &reading) == MergeOutcome::Ignored {
                debug!("reading from disabled device {} kept out of the registry", sender);
            }
        } else {
            debug!("unregistered sender {}, recorded without a device entry", sender);
        }

        self.dispatcher.dispatch(&reading);
        Ok(Some(reading))
    }
}

impl FrameHandler for TelegramPipeline {
    fn handle_frame(&self, frame: RadioFrame) {
        if let Err(e) = self.process(&frame) {
            warn!("dropping telegram from {}: {}", frame.sender_id(), e);
            self.health.record_decode_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FnSubscriber;
    use crate::models::{DeviceProfile, DeviceType, FrameType, Measurement};
    use parking_lot::Mutex;
    use time::OffsetDateTime;

    fn frame(sender: u32, frame_type: FrameType, payload: &[u8]) -> RadioFrame {
        RadioFrame { sender, frame_type, payload: payload.to_vec(), received_at: OffsetDateTime::now_utc() }
    }

    fn pipeline(auto_register: bool) -> (TelegramPipeline, Arc<DeviceRegistry>, Arc<Mutex<Vec<Reading>>>) {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.subscribe(Arc::new(FnSubscriber::new("collect", move |r: &Reading| {
            sink.lock().push(r.clone());
            Ok(())
        })));
        let p = TelegramPipeline::new(registry.clone(), dispatcher, HealthTracker::new())
            .with_auto_register(auto_register);
        (p, registry, seen)
    }

    #[test]
    fn test_unknown_sender_is_created_and_dispatched() {
        let (p, registry, seen) = pipeline(true);
        p.process(&frame(0x0185A3F2, FrameType::FourByte, &[0x00, 0x07, 0xFF, 0x08])).unwrap();

        let device = registry.get("0185A3F2").unwrap();
        assert_eq!(device.device_type, DeviceType::unknown());
        assert_eq!(device.state["co2_ppm"], Measurement::Number(2500.0));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_registered_profile_drives_decoding() {
        let (p, registry, _) = pipeline(true);
        registry.register("0000ABCD", DeviceType::Profile(DeviceProfile::ClimateSensor));
        let reading = p.process(&frame(0xABCD, FrameType::FourByte, &[0x00, 0xFF, 0x00, 0x08])).unwrap().unwrap();
        assert_eq!(reading.measurements["humidity"], Measurement::Number(100.0));
        assert!(!reading.measurements.contains_key("co2_ppm"));
    }

    #[test]
    fn test_without_auto_register_history_still_sees_reading() {
        let (p, registry, seen) = pipeline(false);
        p.process(&frame(0x42, FrameType::RockerSwitch, &[0x30])).unwrap();
        assert!(registry.is_empty());
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_short_frame_is_counted_not_fatal() {
        let health = HealthTracker::new();
        let registry = Arc::new(DeviceRegistry::new());
        let p = TelegramPipeline::new(registry.clone(), Arc::new(EventDispatcher::new()), health.clone());

        p.handle_frame(frame(0x01, FrameType::FourByte, &[0x00, 0x01]));
        p.handle_frame(frame(0x01, FrameType::RockerSwitch, &[0x10]));

        assert_eq!(health.counters().decode_failures, 1);
        assert!(registry.get("00000001").unwrap().state.contains_key("button_state"));
    }
}
