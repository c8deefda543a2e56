/**
 * HISTORY STORE - Bounded ring of recent telegram events
 *
 * ROLE: keeps the last `capacity` readings in memory for GET /api/history and
 * periodically writes the most recent `disk_capacity` of them to history.json.
 *
 * The in-memory ring is authoritative: a failed flush is logged and the next
 * one simply tries again.
 */

use crate::dispatch::{ReadingSubscriber, SubscriberError};
use crate::models::{HistoryEntry, Reading};
use crate::state::{new_state, Shared};
use crate::store::{self, StoreError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info};

pub const HISTORY_CAPACITY: usize = 10_000;
pub const HISTORY_DISK_CAPACITY: usize = 1_000;
pub const FLUSH_EVERY: u64 = 100;

pub struct HistoryStore {
    entries: Shared<VecDeque<HistoryEntry>>,
    capacity: usize,
    disk_capacity: usize,
    flush_every: u64,
    appended: AtomicU64,
    file: Option<PathBuf>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: new_state(VecDeque::with_capacity(capacity.min(HISTORY_CAPACITY))),
            capacity: capacity.max(1),
            disk_capacity: HISTORY_DISK_CAPACITY,
            flush_every: FLUSH_EVERY,
            appended: AtomicU64::new(0),
            file: None,
        }
    }

    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_disk_capacity(mut self, disk_capacity: usize) -> Self {
        self.disk_capacity = disk_capacity;
        self
    }

    /// Flush every `n` appends (0 disables periodic flushes).
    pub fn with_flush_every(mut self, n: u64) -> Self {
        self.flush_every = n;
        self
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds an entry, evicting the oldest ones past capacity. Every
    /// `flush_every`-th append also writes the snapshot to disk.
    pub fn append(&self, entry: HistoryEntry) {
        {
            let mut entries = self.entries.lock();
            entries.push_back(entry);
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }

        let count = self.appended.fetch_add(1, Ordering::Relaxed) + 1;
        if self.flush_every > 0 && count % self.flush_every == 0 {
            if let Err(e) = self.flush() {
                error!("history flush failed: {}", e);
            }
        }
    }

    /// Writes the most recent `disk_capacity` entries to the history file.
    pub fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.file else { return Ok(()) };
        let snapshot = self.query(self.disk_capacity);
        store::save_json(path, &snapshot)?;
        debug!("history saved ({} entries)", snapshot.len());
        Ok(())
    }

    /// The most recent `limit` entries, oldest first.
    pub fn query(&self, limit: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn appended_total(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Seeds the ring from the last flushed snapshot.
    pub fn load(&self) -> Result<usize, StoreError> {
        let Some(path) = &self.file else { return Ok(0) };
        let Some(saved) = store::load_json::<Vec<HistoryEntry>>(path)? else { return Ok(0) };
        let mut entries = self.entries.lock();
        entries.clear();
        let skip = saved.len().saturating_sub(self.capacity);
        entries.extend(saved.into_iter().skip(skip));
        info!("restored {} history entries from {}", entries.len(), path.display());
        Ok(entries.len())
    }
}

impl ReadingSubscriber for HistoryStore {
    fn name(&self) -> &str {
        "history"
    }

    fn on_reading(&self, reading: &Reading) -> Result<(), SubscriberError> {
        self.append(HistoryEntry::from(reading));
        Ok(())
    }
}
