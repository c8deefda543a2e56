/*!
Test harness: a full daemon on a temp data dir, wired to a `MockGateway`,
with reconnect backoff disabled and the HTTP API optionally served on a
loopback port.
*/

use crate::mock_gateway::MockGateway;
use anyhow::{Context, Result};
use purevent_daemon::config::BridgeConfig;
use purevent_daemon::http::build_router;
use purevent_daemon::transport::Sleeper;
use purevent_daemon::Daemon;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Never sleeps; counts how often the daemon asked to.
#[derive(Default)]
pub struct InstantSleeper {
    calls: AtomicUsize,
}

impl InstantSleeper {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "purevent_daemon=debug".into()),
        )
        .try_init()
        .ok();
}

pub struct TestHarness {
    pub gateway: Arc<MockGateway>,
    pub sleeper: Arc<InstantSleeper>,
    pub daemon: Arc<Daemon>,
    dir: TempDir,
}

impl TestHarness {
    /// Idle gateway, default configuration.
    pub fn new() -> Result<Self> {
        Self::with_gateway(MockGateway::new(), |_| {})
    }

    pub fn with_gateway<F>(gateway: MockGateway, configure: F) -> Result<Self>
    where
        F: FnOnce(&mut BridgeConfig),
    {
        init_tracing();
        let dir = tempfile::tempdir().context("creating temp data dir")?;
        let mut config = BridgeConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.serial.port = "/dev/mock-gateway".into();
        configure(&mut config);

        let gateway = Arc::new(gateway);
        let sleeper = Arc::new(InstantSleeper::default());
        let daemon = Arc::new(Daemon::with_backoff(config, gateway.clone(), sleeper.clone(), Duration::ZERO));
        Ok(Self { gateway, sleeper, daemon, dir })
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn start(&self) -> bool {
        self.daemon.load_state();
        self.daemon.start()
    }

    /// Polls `cond` until it holds or `timeout_ms` elapses.
    pub fn wait_for<F: FnMut() -> bool>(&self, timeout_ms: u64, mut cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    /// Pushes telegram bytes to the live gateway and waits until history grew by one.
    pub fn inject(&self, bytes: Vec<u8>) -> Result<()> {
        let before = self.daemon.history().appended_total();
        if !self.gateway.push(bytes) {
            anyhow::bail!("no gateway link open");
        }
        if !self.wait_for(2000, || self.daemon.history().appended_total() > before) {
            anyhow::bail!("telegram was not recorded within 2s");
        }
        Ok(())
    }

    /// Serves the HTTP API on 127.0.0.1 and returns its base URL.
    pub async fn serve(&self) -> Result<String> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = build_router(self.daemon.app_state());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("test server stopped: {}", e);
            }
        });
        Ok(format!("http://{addr}"))
    }

    pub fn shutdown(&self) {
        self.daemon.shutdown();
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.daemon.transport().disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram_builder::TelegramBuilder;

    #[test]
    fn test_harness_records_injected_telegram() {
        let harness = TestHarness::new().unwrap();
        assert!(harness.start());
        harness.inject(TelegramBuilder::new(0x0185A3F2).co2(2047).unwrap()).unwrap();
        assert!(harness.daemon.registry().contains("0185A3F2"));
        assert_eq!(harness.sleeper.calls(), 0);
    }
}
