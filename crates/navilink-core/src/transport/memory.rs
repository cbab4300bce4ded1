//! In-process loopback transport.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use super::{InboundMessage, InboundStream, LastWill, Transport, filter_matches};
use crate::config::defaults;
use crate::error::TransportError;

/// Transport that keeps everything in memory.
///
/// Published messages are recorded and broadcast to watchers; messages
/// injected with [`inject`](Self::inject) are delivered to the inbound
/// stream when they match an active subscription, the way a broker
/// would.
pub struct MemoryTransport {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<InboundMessage>>,
    publish_tx: broadcast::Sender<InboundMessage>,
    last_will: Mutex<Option<LastWill>>,
    fail_publish: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(defaults::INBOUND_CAPACITY)
    }

    /// Transport whose inbound stream buffers at most `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        let (publish_tx, _) = broadcast::channel(defaults::EVENT_CAPACITY);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            subscriptions: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            publish_tx,
            last_will: Mutex::new(None),
            fail_publish: AtomicBool::new(false),
        }
    }

    /// Register a last will, as a broker connection would.
    pub fn with_last_will(self, will: LastWill) -> Self {
        *self.last_will.lock() = Some(will);
        self
    }

    /// Deliver a message if a subscription matches. Returns whether it
    /// was delivered.
    pub async fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        if !self.is_subscribed(topic) {
            return false;
        }
        self.inbound_tx
            .send(InboundMessage::new(topic, payload))
            .await
            .is_ok()
    }

    /// Deliver the last will to every subscriber, as a broker does when
    /// the connection drops.
    pub async fn trigger_last_will(&self) -> bool {
        let will = self.last_will.lock().clone();
        match will {
            Some(will) => self.inject(&will.topic, will.payload).await,
            None => false,
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .lock()
            .iter()
            .any(|filter| filter_matches(filter, topic))
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn published(&self) -> Vec<InboundMessage> {
        self.published.lock().clone()
    }

    pub fn last_will(&self) -> Option<LastWill> {
        self.last_will.lock().clone()
    }

    /// Stream of future publishes.
    pub fn watch_published(&self) -> broadcast::Receiver<InboundMessage> {
        self.publish_tx.subscribe()
    }

    /// Make subsequent publishes fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed(format!("{topic}: rejected")));
        }
        let msg = InboundMessage::new(topic, payload);
        self.published.lock().push(msg.clone());
        let _ = self.publish_tx.send(msg);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), TransportError> {
        let mut subs = self.subscriptions.lock();
        if !subs.iter().any(|s| s == pattern) {
            subs.push(pattern.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.subscriptions.lock().retain(|s| s != pattern);
        Ok(())
    }

    fn take_inbound(&self) -> Option<InboundStream> {
        self.inbound_rx.lock().take()
    }
}
