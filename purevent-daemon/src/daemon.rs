//! Wires the daemon together: stores, dispatcher subscribers, transport,
//! command path. `main` and the devkit harness both go through here.

use crate::activity::ActivityLog;
use crate::commands::CommandPath;
use crate::config::BridgeConfig;
use crate::dispatch::EventDispatcher;
use crate::health::HealthTracker;
use crate::history::{HistoryStore, HISTORY_CAPACITY};
use crate::http::AppState;
use crate::pipeline::TelegramPipeline;
use crate::registry::DeviceRegistry;
use crate::transport::{Connector, SerialTransport, Sleeper};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct Daemon {
    config: BridgeConfig,
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<EventDispatcher>,
    history: Arc<HistoryStore>,
    activity: Arc<ActivityLog>,
    transport: Arc<SerialTransport>,
    pipeline: Arc<TelegramPipeline>,
    commands: CommandPath,
    health: HealthTracker,
}

impl Daemon {
    pub fn new(config: BridgeConfig, connector: Arc<dyn Connector>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self::with_backoff(config, connector, sleeper, crate::transport::RECONNECT_BACKOFF)
    }

    pub fn with_backoff(
        config: BridgeConfig,
        connector: Arc<dyn Connector>,
        sleeper: Arc<dyn Sleeper>,
        backoff: Duration,
    ) -> Self {
        let health = HealthTracker::new();
        let storage = &config.storage;

        let registry = Arc::new(DeviceRegistry::new().with_config_file(storage.device_config_file()));
        let history = Arc::new(HistoryStore::new(HISTORY_CAPACITY).with_file(storage.history_file()));
        let activity = Arc::new(ActivityLog::new().with_file(storage.devices_file()));

        let dispatcher = Arc::new(EventDispatcher::new());
        dispatcher.subscribe(history.clone());
        dispatcher.subscribe(activity.clone());

        let transport = Arc::new(
            SerialTransport::new(config.serial.clone(), connector, sleeper)
                .with_backoff(backoff)
                .with_health(health.clone()),
        );
        let pipeline = Arc::new(
            TelegramPipeline::new(registry.clone(), dispatcher.clone(), health.clone())
                .with_auto_register(config.auto_register),
        );
        let commands = CommandPath::new(transport.clone(), config.sender_address());

        Self { config, registry, dispatcher, history, activity, transport, pipeline, commands, health }
    }

    /// Restores the device configuration and the last history snapshot.
    /// Missing or unreadable files leave the daemon empty, never stop it.
    pub fn load_state(&self) {
        match self.registry.load_config() {
            Ok(n) => info!("{} configured devices", n),
            Err(e) => warn!("device configuration not loaded: {}", e),
        }
        if let Err(e) = self.history.load() {
            warn!("history not restored: {}", e);
        }
    }

    /// Starts the receive loop. On failure the daemon keeps serving HTTP with running=false.
    pub fn start(&self) -> bool {
        let started = self.transport.start(self.pipeline.clone());
        if !started {
            error!("gateway on {} unavailable, serving API without it", self.config.serial.port);
        }
        started
    }

    /// Stops the transport and writes the final snapshots.
    pub fn shutdown(&self) {
        info!("shutting down");
        self.transport.disconnect();
        if let Err(e) = self.history.flush() {
            error!("final history flush failed: {}", e);
        }
        if let Err(e) = self.activity.flush() {
            error!("final activity flush failed: {}", e);
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            registry: self.registry.clone(),
            history: self.history.clone(),
            transport: self.transport.clone(),
            commands: self.commands.clone(),
            health: self.health.clone(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    pub fn transport(&self) -> &Arc<SerialTransport> {
        &self.transport
    }

    pub fn commands(&self) -> &CommandPath {
        &self.commands
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }
}
