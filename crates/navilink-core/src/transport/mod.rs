//! Transport contract.
//!
//! The protocol layer only needs to publish, manage subscriptions and
//! read one ordered stream of inbound messages. Connection lifecycle,
//! credentials and reconnection belong to the adapter.

mod memory;

pub use memory::MemoryTransport;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// A message delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Last-will registration handed to the adapter before connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Ordered stream of every message matching any active subscription.
pub type InboundStream = mpsc::Receiver<InboundMessage>;

/// Publish/subscribe transport used by a device session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Add a subscription. `+` matches one level.
    async fn subscribe(&self, pattern: &str) -> Result<(), TransportError>;

    /// Remove a subscription.
    async fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError>;

    /// Take the inbound stream. Only the first call returns it.
    fn take_inbound(&self) -> Option<InboundStream>;
}

/// MQTT filter matching (`+` one level, trailing `#` any remainder).
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        if part == "#" {
            return true;
        }
        match levels.next() {
            Some(level) if part == "+" || part == level => {}
            _ => return false,
        }
    }
    levels.next().is_none()
}
