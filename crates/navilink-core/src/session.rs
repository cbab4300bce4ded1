//! Device session.
//!
//! A [`DeviceSession`] owns everything needed to talk to one device: the
//! transport, the topic matcher, the pending request table, the state
//! translator and the dispatch task that drains the inbound stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{Command, EncodeContext};
use crate::config::SessionConfig;
use crate::correlator::{Correlator, Response};
use crate::envelope::{Envelope, RequestParams, SessionIdGenerator, build_request_body};
use crate::error::{ProtocolError, Result, TransportError};
use crate::events::{DeviceEvent, UnrecognizedEvent, classify};
use crate::identity::{DeviceIdentity, SessionContext};
use crate::registry::{CodecRegistry, CommandDescriptor, Operation};
use crate::state::{DeviceState, StateTranslator};
use crate::topic::{TopicContext, TopicMatch, TopicMatcher, build_request_topic, build_response_topic};
use crate::transport::{InboundMessage, LastWill, Transport};

/// Something observers of a session may want to know about.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A channel snapshot was rebuilt.
    State(Arc<DeviceState>),
    /// An unsolicited message was classified.
    Device(DeviceEvent),
}

/// Outcome of routing one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// A pending request was resolved with a response.
    Resolved {
        operation: Operation,
        session_id: String,
    },
    /// A pending request was failed.
    Failed {
        operation: Operation,
        error: String,
    },
    /// An unsolicited message was classified.
    Event(DeviceEvent),
    /// A response nobody was waiting for.
    Unmatched { topic: String },
}

struct Inner {
    identity: DeviceIdentity,
    session: SessionContext,
    client_id: String,
    registry: &'static CodecRegistry,
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    matcher: TopicMatcher,
    correlator: Correlator,
    translator: StateTranslator,
    /// Subscription pattern -> number of holders.
    subscriptions: Mutex<HashMap<String, usize>>,
    session_ids: SessionIdGenerator,
    events: broadcast::Sender<SessionEvent>,
    dispatcher: SyncMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Protocol session bound to one device.
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<Inner>,
}

impl DeviceSession {
    /// Start a session: take the transport's inbound stream, subscribe to
    /// the device's event topics and spawn the dispatch task.
    pub async fn start(
        identity: DeviceIdentity,
        session: SessionContext,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Result<Self> {
        let registry = CodecRegistry::standard()?;
        let generation = identity.generation();
        let client_id = session.client_id_or_generate();
        let session = SessionContext {
            client_id: Some(client_id.clone()),
            ..session
        };
        let matcher = TopicMatcher::new(
            registry.table(generation),
            TopicContext::new(&identity, &session),
        )?;

        let mut inbound = transport
            .take_inbound()
            .ok_or_else(|| TransportError::Other("inbound stream already taken".into()))?;

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(Inner {
            correlator: Correlator::new(identity.clone()),
            translator: StateTranslator::new(generation),
            identity,
            session,
            client_id,
            registry,
            config,
            transport,
            matcher,
            subscriptions: Mutex::new(HashMap::new()),
            session_ids: SessionIdGenerator::new(),
            events,
            dispatcher: SyncMutex::new(None),
            closed: AtomicBool::new(false),
        });

        for pattern in inner.matcher.event_patterns() {
            inner.acquire(&pattern).await?;
        }

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let handle = tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.dispatch(msg);
            }
            if let Some(inner) = weak.upgrade() {
                debug!(device = %inner.identity, "Inbound stream ended");
                inner.correlator.fail_all(ProtocolError::SessionClosed);
            }
        });
        *inner.dispatcher.lock() = Some(handle);

        info!(
            device = %inner.identity,
            generation = %generation,
            "Device session started"
        );

        Ok(Self { inner })
    }

    /// Last will the transport should register before connecting.
    ///
    /// Pass the same `session` later given to [`start`](Self::start) so
    /// the announced client id matches.
    pub fn last_will(identity: &DeviceIdentity, session: &SessionContext) -> Result<LastWill> {
        let registry = CodecRegistry::standard()?;
        let template = registry.table(identity.generation()).last_will_template();
        let topic = template
            .render(&TopicContext::new(identity, session))
            .ok_or_else(|| ProtocolError::InvalidParameter(format!("cannot render '{template}'")))?;
        let envelope = Envelope::last_will(
            identity,
            session.client_id_or_generate(),
            SessionIdGenerator::new().next_id(),
            topic.clone(),
        );
        Ok(LastWill {
            topic,
            payload: envelope.to_bytes()?,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Issue one operation and wait for its response.
    pub async fn send(&self, operation: Operation, params: RequestParams) -> Result<Response> {
        self.inner.clone().send(operation, params).await
    }

    /// Encode a logical command for this device and send it.
    pub async fn execute(&self, command: Command) -> Result<Response> {
        let translator = &self.inner.translator;
        let channel = command.channel();
        let ctx = EncodeContext {
            generation: translator.generation(),
            unit: translator.temperature_unit(channel),
            setpoint_range: translator.setpoint_range(channel),
            unit_count: translator.unit_count(channel),
        };
        let (operation, params) = command.encode(&ctx)?;
        let mut response = self.send(operation, params).await?;

        if command.vacation_days().is_some() {
            if let Some(state) = translator.mark_vacation_started(Utc::now()) {
                let _ = self.inner.events.send(SessionEvent::State(state.clone()));
                response.states.push(state);
            }
        }
        Ok(response)
    }

    /// Channel info (legacy) or feature (current) exchange.
    pub async fn request_info(&self) -> Result<Response> {
        self.execute(Command::RequestInfo).await
    }

    pub async fn refresh_status(&self, channel: u8) -> Result<Response> {
        self.execute(Command::RefreshStatus { channel }).await
    }

    /// Route one inbound message directly, bypassing the inbound stream.
    pub fn dispatch(&self, msg: InboundMessage) -> Dispatched {
        self.inner.dispatch(msg)
    }

    /// Latest snapshot of a channel.
    pub fn state(&self, channel: u8) -> Option<Arc<DeviceState>> {
        self.inner.translator.snapshot(channel)
    }

    pub fn states(&self) -> Vec<Arc<DeviceState>> {
        self.inner.translator.snapshots()
    }

    /// Channels known for this device.
    pub fn channels(&self) -> Vec<u8> {
        self.inner.translator.channels()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop dispatching, fail outstanding requests and drop every
    /// subscription.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.dispatcher.lock().take() {
            handle.abort();
        }
        self.inner.correlator.fail_all(ProtocolError::SessionClosed);

        let patterns: Vec<String> = self.inner.subscriptions.lock().await.drain().map(|(p, _)| p).collect();
        for pattern in patterns {
            if let Err(e) = self.inner.transport.unsubscribe(&pattern).await {
                warn!(device = %self.inner.identity, pattern = %pattern, error = %e, "Unsubscribe failed");
            }
        }
        info!(device = %self.inner.identity, "Device session closed");
    }
}

impl Inner {
    async fn send(self: Arc<Self>, operation: Operation, params: RequestParams) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::SessionClosed);
        }

        let descriptor = self.registry.resolve(self.identity.generation(), operation)?;
        let (request_topic, response_topic) = self.topics(descriptor)?;
        let body = build_request_body(&self.identity, descriptor, &params)?;
        let session_id = self.session_ids.next_id();
        let payload = Envelope::request(
            descriptor.generation,
            self.client_id.clone(),
            session_id.clone(),
            request_topic.clone(),
            response_topic,
            body,
        )
        .to_bytes()?;

        let handle = self.correlator.register(operation, &session_id, descriptor.class)?;

        let pattern = self.matcher.pattern(descriptor.response_template());
        if let Err(e) = self.acquire(&pattern).await {
            self.correlator.cancel(operation, &session_id);
            return Err(e);
        }

        // Runs on every exit, including the caller dropping this future.
        let _cleanup = scopeguard::guard(
            (self.clone(), session_id.clone(), pattern),
            move |(inner, session_id, pattern)| {
                inner.correlator.cancel(operation, &session_id);
                if let Ok(rt) = tokio::runtime::Handle::try_current() {
                    rt.spawn(async move { inner.release(&pattern).await });
                }
            },
        );

        debug!(
            device = %self.identity,
            operation = ?operation,
            session_id = %session_id,
            topic = %request_topic,
            "Publishing request"
        );
        self.transport.publish(&request_topic, payload).await?;

        match tokio::time::timeout(self.config.timeout_for(descriptor.class), handle.reply).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ProtocolError::SessionClosed),
            Err(_) => {
                warn!(
                    device = %self.identity,
                    operation = ?operation,
                    session_id = %session_id,
                    "Request timed out"
                );
                Err(ProtocolError::Timeout {
                    device: self.identity.to_string(),
                    operation,
                })
            }
        }
    }

    fn topics(&self, descriptor: &CommandDescriptor) -> Result<(String, String)> {
        let request = build_request_topic(&self.identity, descriptor);
        let response = build_response_topic(&self.identity, descriptor, &self.session);
        match (request, response) {
            (Some(request), Some(response)) => Ok((request, response)),
            _ => Err(ProtocolError::InvalidParameter(format!(
                "session segments required for {:?}",
                descriptor.operation
            ))),
        }
    }

    async fn acquire(&self, pattern: &str) -> Result<()> {
        let mut subs = self.subscriptions.lock().await;
        match subs.get_mut(pattern) {
            Some(count) => *count += 1,
            None => {
                self.transport.subscribe(pattern).await?;
                subs.insert(pattern.to_string(), 1);
            }
        }
        Ok(())
    }

    async fn release(&self, pattern: &str) {
        let mut subs = self.subscriptions.lock().await;
        let Some(count) = subs.get_mut(pattern) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            subs.remove(pattern);
            if let Err(e) = self.transport.unsubscribe(pattern).await {
                warn!(device = %self.identity, pattern = %pattern, error = %e, "Unsubscribe failed");
            }
        }
    }

    fn dispatch(&self, msg: InboundMessage) -> Dispatched {
        match self.matcher.match_topic(&msg.topic) {
            TopicMatch::Response(candidates) => self.dispatch_response(candidates, &msg),
            TopicMatch::Event(kind) => {
                let event = classify(kind, &self.identity, &msg.topic, &msg.payload);
                self.dispatch_event(&event);
                let _ = self.events.send(SessionEvent::Device(event.clone()));
                Dispatched::Event(event)
            }
            TopicMatch::Unmatched => {
                debug!(device = %self.identity, topic = %msg.topic, "No route for topic");
                let event = DeviceEvent::Unrecognized(UnrecognizedEvent::new(&msg.topic, &msg.payload));
                let _ = self.events.send(SessionEvent::Device(event.clone()));
                Dispatched::Event(event)
            }
        }
    }

    fn dispatch_response(&self, candidates: &[Operation], msg: &InboundMessage) -> Dispatched {
        let envelope = match Envelope::parse(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                return match self.correlator.claim(candidates, None) {
                    Some(claimed) => {
                        let operation = claimed.operation;
                        warn!(device = %self.identity, operation = ?operation, error = %e, "Malformed response");
                        claimed.complete(Err(e.clone()));
                        Dispatched::Failed {
                            operation,
                            error: e.to_string(),
                        }
                    }
                    None => self.unmatched(msg),
                };
            }
        };

        let Some(claimed) = self
            .correlator
            .claim(candidates, envelope.session_id.as_deref())
        else {
            return self.unmatched(msg);
        };
        let operation = claimed.operation;
        let session_id = claimed.session_id.clone();

        match self.decode(operation, &envelope) {
            Ok(states) => {
                for state in &states {
                    let _ = self.events.send(SessionEvent::State(state.clone()));
                }
                debug!(
                    device = %self.identity,
                    operation = ?operation,
                    session_id = %session_id,
                    "Response resolved"
                );
                claimed.complete(Ok(Response {
                    operation,
                    session_id: session_id.clone(),
                    envelope,
                    states,
                }));
                Dispatched::Resolved {
                    operation,
                    session_id,
                }
            }
            Err(e) => {
                warn!(device = %self.identity, operation = ?operation, error = %e, "Response rejected");
                let error = e.to_string();
                claimed.complete(Err(e));
                Dispatched::Failed { operation, error }
            }
        }
    }

    fn decode(&self, operation: Operation, envelope: &Envelope) -> Result<Vec<Arc<DeviceState>>> {
        envelope.expect_generation(self.identity.generation())?;
        let descriptor = self.registry.resolve(self.identity.generation(), operation)?;
        let body: &Value = envelope
            .response
            .as_ref()
            .ok_or_else(|| ProtocolError::Decode("envelope has no response body".into()))?;
        self.translator.apply(descriptor.response, body, Utc::now())
    }

    fn dispatch_event(&self, event: &DeviceEvent) {
        match event {
            DeviceEvent::ControlFail(fail) => {
                if fail.is_rate_limited() {
                    error!(device = %self.identity, fail_code = fail.fail_code, "Control rate lockout");
                } else {
                    warn!(device = %self.identity, fail_code = fail.fail_code, "Control failed");
                }
                if let Some(claimed) = self.correlator.claim_control(fail.session_id.as_deref()) {
                    claimed.complete(Err(ProtocolError::ControlFailure {
                        code: fail.fail_code,
                    }));
                }
            }
            DeviceEvent::Connection(conn) if !conn.online => {
                warn!(device = %self.identity, status = conn.status, "Device reported offline");
            }
            DeviceEvent::Connection(conn) => {
                debug!(device = %self.identity, status = conn.status, "Device heartbeat");
            }
            DeviceEvent::TransportDisconnect(_) => {
                warn!(device = %self.identity, "Broker announced a disconnect");
            }
            DeviceEvent::Unrecognized(u) => {
                debug!(device = %self.identity, topic = %u.topic, "Unrecognized event payload");
            }
        }
    }

    fn unmatched(&self, msg: &InboundMessage) -> Dispatched {
        warn!(device = %self.identity, topic = %msg.topic, "Dropping unmatched response");
        Dispatched::Unmatched {
            topic: msg.topic.clone(),
        }
    }
}
