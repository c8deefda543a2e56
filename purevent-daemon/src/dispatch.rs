//! Fan-out of decoded readings to subscribers.
//!
//! Every subscriber sees every reading, in registration order. A subscriber
//! that returns an error or panics is logged and skipped; the others and the
//! receive loop carry on.

use crate::models::Reading;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("{0}")]
    Failed(String),
}

pub trait ReadingSubscriber: Send + Sync {
    fn name(&self) -> &str;
    fn on_reading(&self, reading: &Reading) -> Result<(), SubscriberError>;
}

/// Adapter so plain closures can subscribe.
pub struct FnSubscriber<F> {
    name: String,
    f: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&Reading) -> Result<(), SubscriberError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> ReadingSubscriber for FnSubscriber<F>
where
    F: Fn(&Reading) -> Result<(), SubscriberError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_reading(&self, reading: &Reading) -> Result<(), SubscriberError> {
        (self.f)(reading)
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    subscribers: RwLock<Vec<Arc<dyn ReadingSubscriber>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn ReadingSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Delivers `reading` to every subscriber. Returns how many succeeded.
    pub fn dispatch(&self, reading: &Reading) -> usize {
        // snapshot so a subscriber may call subscribe() without deadlocking
        let subscribers: Vec<_> = self.subscribers.read().clone();
        let mut delivered = 0;
        for subscriber in subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_reading(reading))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => error!("subscriber '{}' failed on {}: {}", subscriber.name(), reading.device_id, e),
                Err(_) => error!("subscriber '{}' panicked on {}", subscriber.name(), reading.device_id),
            }
        }
        delivered
    }
}
