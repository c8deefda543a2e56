/**
 * SERIAL TRANSPORT - Owns the gateway link and the receive loop
 *
 * ROLE:
 * Opens the gateway through a `Connector`, runs a background thread that reads
 * ESP3 bytes, reassembles packets and hands every radio telegram to a
 * `FrameHandler`. Outbound frames go through `send`, which never blocks on a
 * dead or missing link.
 *
 * LIFECYCLE:
 *   Disconnected -> Connecting -> Connected -> (link dies) -> Disconnected
 *   -> backoff -> Connecting ... -> Halted once the retry budget is spent.
 * Halted is terminal: nothing reopens the link until a new transport is built.
 */

pub mod link;
pub mod retry;

pub use link::{Connector, GatewayLink, SerialConnector};
pub use retry::{RetryBudget, RetryDecision, Sleeper, ThreadSleeper, RECONNECT_BACKOFF};

use crate::config::SerialSettings;
use crate::esp3::{Esp3Decoder, Esp3Packet, PacketType};
use crate::health::HealthTracker;
use crate::models::RadioFrame;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Halted,
}

/// Receives every radio telegram the loop extracts, on the loop's thread.
pub trait FrameHandler: Send + Sync {
    fn handle_frame(&self, frame: RadioFrame);
}

pub struct SerialTransport {
    settings: SerialSettings,
    connector: Arc<dyn Connector>,
    sleeper: Arc<dyn Sleeper>,
    backoff: Duration,
    health: HealthTracker,
    link: RwLock<Option<Arc<dyn GatewayLink>>>,
    state: Mutex<LinkState>,
    running: AtomicBool,
    halted: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    pub fn new(settings: SerialSettings, connector: Arc<dyn Connector>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            settings,
            connector,
            sleeper,
            backoff: RECONNECT_BACKOFF,
            health: HealthTracker::new(),
            link: RwLock::new(None),
            state: Mutex::new(LinkState::Disconnected),
            running: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = health;
        self
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Opens the gateway, replacing (and closing) any previous link.
    pub fn connect(&self) -> bool {
        if self.halted.load(Ordering::SeqCst) {
            warn!("transport halted, not reconnecting");
            return false;
        }
        self.set_state(LinkState::Connecting);
        if let Some(old) = self.link.write().take() {
            old.close();
        }

        match self.connector.open(&self.settings) {
            Ok(link) => {
                *self.link.write() = Some(link);
                self.set_state(LinkState::Connected);
                info!("connected to gateway on {}", self.settings.port);
                true
            }
            Err(e) => {
                error!("failed to connect to {}: {}", self.settings.port, e);
                self.set_state(LinkState::Disconnected);
                false
            }
        }
    }

    /// Connects if needed and spawns the receive loop. Calling it while the
    /// loop already runs is a no-op that returns true.
    pub fn start(self: &Arc<Self>, handler: Arc<dyn FrameHandler>) -> bool {
        if self.running.load(Ordering::SeqCst) {
            return true;
        }
        let has_link = self.link.read().is_some();
        if !has_link && !self.connect() {
            return false;
        }

        self.running.store(true, Ordering::SeqCst);
        let transport = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("purevent-rx".into())
            .spawn(move || transport.receive_loop(handler));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                info!("receive loop started");
                true
            }
            Err(e) => {
                error!("failed to spawn receive loop: {}", e);
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Stops the loop, waits for it and closes the link. Safe to call twice.
    pub fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                error!("receive loop panicked");
            }
        }

        if let Some(link) = self.link.write().take() {
            link.close();
            info!("disconnected from gateway");
        }
        if !self.halted.load(Ordering::SeqCst) {
            self.set_state(LinkState::Disconnected);
        }
    }

    /// Writes one encoded frame. Fails immediately when there is no live link.
    pub fn send(&self, frame: &[u8]) -> bool {
        let Some(link) = self.current_link() else {
            error!("gateway not connected, frame dropped");
            return false;
        };
        if !link.is_alive() {
            error!("gateway link is down, frame dropped");
            return false;
        }
        match link.write(frame) {
            Ok(()) => {
                debug!("sent {} bytes to gateway", frame.len());
                true
            }
            Err(e) => {
                error!("failed to write to gateway: {}", e);
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True while a link is open, even if the loop has not noticed it died yet.
    pub fn is_connected(&self) -> bool {
        self.link.read().is_some()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    fn current_link(&self) -> Option<Arc<dyn GatewayLink>> {
        self.link.read().clone()
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock() = state;
    }

    fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(link) = self.link.write().take() {
            link.close();
        }
        self.set_state(LinkState::Halted);
        self.halted.store(true, Ordering::SeqCst);
    }

    fn receive_loop(self: Arc<Self>, handler: Arc<dyn FrameHandler>) {
        let mut deframer = Esp3Decoder::new();
        let mut budget = RetryBudget::new(self.settings.max_retry);
        let mut buf = [0u8; READ_CHUNK];

        while self.running.load(Ordering::SeqCst) {
            let live = self.current_link().filter(|link| link.is_alive());
            let Some(link) = live else {
                match budget.on_failure() {
                    RetryDecision::Reconnect { attempt } => {
                        warn!("gateway link lost, reconnecting ({}/{})", attempt, budget.max_retry());
                        self.set_state(LinkState::Disconnected);
                        self.health.record_reconnect();
                        self.sleeper.sleep(self.backoff);
                        if !self.running.load(Ordering::SeqCst) {
                            break;
                        }
                        self.connect();
                    }
                    RetryDecision::GiveUp => {
                        error!("max retries reached ({}), receive loop halted", budget.max_retry());
                        self.halt();
                        break;
                    }
                }
                continue;
            };

            let n = match link.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => n,
                Err(e) => {
                    warn!("serial read failed: {}", e);
                    continue;
                }
            };

            for packet in deframer.feed(&buf[..n]) {
                match packet {
                    Ok(packet) => {
                        if self.handle_packet(&packet, handler.as_ref()) {
                            budget.reset();
                        }
                    }
                    Err(e) => {
                        warn!("dropping corrupt ESP3 packet: {}", e);
                        self.health.record_decode_failure();
                    }
                }
            }
        }
        debug!("receive loop exited");
    }

    /// Returns true when a radio telegram was handed to the handler.
    fn handle_packet(&self, packet: &Esp3Packet, handler: &dyn FrameHandler) -> bool {
        if packet.packet_type == PacketType::Response {
            debug!("gateway response: {:?}", packet.response_code());
            return false;
        }

        let frame = match packet.to_radio_frame(OffsetDateTime::now_utc()) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("ignoring {:?} packet", packet.packet_type);
                return false;
            }
            Err(e) => {
                warn!("malformed radio packet: {}", e);
                self.health.record_decode_failure();
                return false;
            }
        };

        self.health.record_frame(frame.received_at);
        let sender = frame.sender_id();
        if catch_unwind(AssertUnwindSafe(|| handler.handle_frame(frame))).is_err() {
            error!("frame handler panicked on telegram from {}", sender);
        }
        true
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(link) = self.link.get_mut().take() {
            link.close();
        }
    }
}
