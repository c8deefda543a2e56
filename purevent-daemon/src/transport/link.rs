//! The byte channel to the gateway. `SerialConnector` is the real one; tests
//! plug in scripted links through the same `Connector` seam.

use super::TransportError;
use crate::config::SerialSettings;
use parking_lot::Mutex;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub trait GatewayLink: Send + Sync {
    /// Blocks for at most the read timeout. `Ok(0)` means nothing arrived.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&self, frame: &[u8]) -> io::Result<()>;
    /// False once the underlying device went away or was closed.
    fn is_alive(&self) -> bool;
    fn close(&self);
}

pub trait Connector: Send + Sync {
    fn open(&self, settings: &SerialSettings) -> Result<Arc<dyn GatewayLink>, TransportError>;
}

pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, settings: &SerialSettings) -> Result<Arc<dyn GatewayLink>, TransportError> {
        let reader = serialport::new(&settings.port, settings.baud_rate)
            .timeout(settings.read_timeout())
            .open()?;
        let writer = reader.try_clone()?;
        info!("opened {} at {} baud", settings.port, settings.baud_rate);
        Ok(Arc::new(SerialLink {
            port: settings.port.clone(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            alive: AtomicBool::new(true),
        }))
    }
}

/// Reader and writer are separate handles on the same device so a send
/// never waits behind a blocked read.
pub struct SerialLink {
    port: String,
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    alive: AtomicBool,
}

fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "serial port closed")
}

impl GatewayLink for SerialLink {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.reader.lock();
        let port = guard.as_mut().ok_or_else(closed)?;
        match port.read(buf) {
            // a tty that reports EOF has been unplugged
            Ok(0) => {
                self.alive.store(false, Ordering::SeqCst);
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, format!("{} returned EOF", self.port)))
            }
            Ok(n) => Ok(n),
            Err(e) if is_transient(e.kind()) => Ok(0),
            Err(e) => {
                self.alive.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn write(&self, frame: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock();
        let port = guard.as_mut().ok_or_else(closed)?;
        let result = port.write_all(frame).and_then(|_| port.flush());
        if let Err(e) = &result {
            if !is_transient(e.kind()) {
                self.alive.store(false, Ordering::SeqCst);
            }
        }
        result
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.writer.lock().take();
        self.reader.lock().take();
        debug!("closed {}", self.port);
    }
}
