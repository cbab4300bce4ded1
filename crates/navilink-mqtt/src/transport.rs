//! Transport over an MQTT broker using rumqttc.

use std::sync::Arc;

use async_trait::async_trait;
use navilink_core::transport::{InboundMessage, InboundStream, LastWill, Transport};
use navilink_core::TransportError;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;

/// MQTT transport.
///
/// rumqttc reconnects on the next poll after an error; active
/// subscriptions are re-sent on every reconnect so a clean session does
/// not silently lose them.
pub struct MqttTransport {
    client: AsyncClient,
    qos: QoS,
    subscriptions: Arc<Mutex<Vec<String>>>,
    inbound: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    event_loop: JoinHandle<()>,
}

impl MqttTransport {
    /// Create the client and spawn its event loop. Must run inside a
    /// tokio runtime.
    pub fn connect(config: &MqttConfig, last_will: Option<&LastWill>) -> Self {
        Self::connect_with_inbound(config, last_will, config.channel_capacity)
    }

    /// Like [`connect`](Self::connect), buffering at most
    /// `inbound_capacity` received messages for the consumer.
    pub fn connect_with_inbound(
        config: &MqttConfig,
        last_will: Option<&LastWill>,
        inbound_capacity: usize,
    ) -> Self {
        let opts = config.options(last_will);
        let (client, event_loop) = AsyncClient::new(opts, config.channel_capacity.max(1));
        let (tx, rx) = mpsc::channel(inbound_capacity.max(1));
        let subscriptions = Arc::new(Mutex::new(Vec::new()));

        info!(broker = %config.broker_addr(), tls = config.tls, "Connecting to MQTT broker");

        let handle = tokio::spawn(run_event_loop(
            event_loop,
            client.clone(),
            config.qos.into(),
            subscriptions.clone(),
            tx,
            config.reconnect_interval(),
        ));

        Self {
            client,
            qos: config.qos.into(),
            subscriptions,
            inbound: Mutex::new(Some(rx)),
            event_loop: handle,
        }
    }

    /// Send a disconnect and stop the event loop.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| TransportError::Other(e.to_string()));
        self.event_loop.abort();
        result
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    qos: QoS,
    subscriptions: Arc<Mutex<Vec<String>>>,
    tx: mpsc::Sender<InboundMessage>,
    reconnect_interval: std::time::Duration,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let msg = InboundMessage::new(p.topic, p.payload.to_vec());
                if tx.send(msg).await.is_err() {
                    debug!("Inbound receiver dropped, stopping MQTT event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "MQTT connected");
                for topic in subscriptions.lock().iter() {
                    // the request channel is drained by this loop, so never block here
                    if let Err(e) = client.try_subscribe(topic, qos) {
                        warn!(topic = %topic, error = %e, "Resubscribe failed");
                    }
                }
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                info!("MQTT disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection error");
                tokio::time::sleep(reconnect_interval).await;
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(pattern, self.qos)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        let mut subs = self.subscriptions.lock();
        if !subs.iter().any(|s| s == pattern) {
            subs.push(pattern.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.subscriptions.lock().retain(|s| s != pattern);
        self.client
            .unsubscribe(pattern)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }

    fn take_inbound(&self) -> Option<InboundStream> {
        self.inbound.lock().take()
    }
}
