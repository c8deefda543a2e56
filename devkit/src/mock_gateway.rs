/*!
Mock EnOcean gateway for tests without a USB stick.

Implements the daemon's `Connector` seam. Each open consumes the next scripted
session; once the script is exhausted, opens either succeed with an idle link
or fail, depending on `refuse_when_exhausted`.
Bytes can also be pushed into the live link while the daemon runs.
*/

use parking_lot::Mutex;
use purevent_daemon::config::SerialSettings;
use purevent_daemon::transport::{Connector, GatewayLink, TransportError};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the link does after its scripted chunks are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// keep polling with nothing to read
    Idle,
    /// report the device as unplugged
    Unplug,
}

#[derive(Debug, Clone)]
pub enum Session {
    Open { chunks: Vec<Vec<u8>>, ending: Ending },
    Refuse,
}

pub struct MockLink {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    ending: Ending,
    alive: AtomicBool,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    poll: Duration,
}

impl MockLink {
    pub fn push(&self, bytes: Vec<u8>) {
        self.chunks.lock().push_back(bytes);
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl GatewayLink for MockLink {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let next = self.chunks.lock().pop_front();
        match next {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.chunks.lock().push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None => {
                if self.ending == Ending::Unplug {
                    self.alive.store(false, Ordering::SeqCst);
                }
                std::thread::sleep(self.poll);
                Ok(0)
            }
        }
    }

    fn write(&self, frame: &[u8]) -> io::Result<()> {
        if !self.is_alive() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock gateway unplugged"));
        }
        self.written.lock().push(frame.to_vec());
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

pub struct MockGateway {
    sessions: Mutex<VecDeque<Session>>,
    refuse_when_exhausted: bool,
    opens: AtomicUsize,
    current: Mutex<Option<Arc<MockLink>>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    poll: Duration,
}

impl MockGateway {
    /// Every open succeeds with an idle link.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
            refuse_when_exhausted: false,
            opens: AtomicUsize::new(0),
            current: Mutex::new(None),
            written: Arc::new(Mutex::new(Vec::new())),
            poll: Duration::from_millis(2),
        }
    }

    /// No gateway plugged in at all.
    pub fn absent() -> Self {
        Self::new().refuse_when_exhausted()
    }

    pub fn session(self, chunks: Vec<Vec<u8>>, ending: Ending) -> Self {
        self.sessions.lock().push_back(Session::Open { chunks, ending });
        self
    }

    pub fn refusal(self) -> Self {
        self.sessions.lock().push_back(Session::Refuse);
        self
    }

    pub fn refuse_when_exhausted(mut self) -> Self {
        self.refuse_when_exhausted = true;
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Frames the daemon wrote, oldest first.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }

    pub fn current_link(&self) -> Option<Arc<MockLink>> {
        self.current.lock().clone()
    }

    /// Queues bytes on the live link. Returns false if nothing is open.
    pub fn push(&self, bytes: Vec<u8>) -> bool {
        match self.current_link() {
            Some(link) => {
                link.push(bytes);
                true
            }
            None => false,
        }
    }

    /// Simulates pulling the USB stick out of the live link.
    pub fn unplug(&self) {
        if let Some(link) = self.current_link() {
            link.kill();
        }
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MockGateway {
    fn open(&self, settings: &SerialSettings) -> Result<Arc<dyn GatewayLink>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let session = self.sessions.lock().pop_front();
        let (chunks, ending) = match session {
            Some(Session::Open { chunks, ending }) => (chunks, ending),
            Some(Session::Refuse) => return Err(TransportError::Unavailable(settings.port.clone())),
            None if self.refuse_when_exhausted => return Err(TransportError::Unavailable(settings.port.clone())),
            None => (Vec::new(), Ending::Idle),
        };

        let link = Arc::new(MockLink {
            chunks: Mutex::new(chunks.into()),
            ending,
            alive: AtomicBool::new(true),
            written: self.written.clone(),
            poll: self.poll,
        });
        *self.current.lock() = Some(link.clone());
        Ok(link)
    }
}
