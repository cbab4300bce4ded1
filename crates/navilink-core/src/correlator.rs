//! Request/response correlation.
//!
//! At most one request per `(device, operation)` may be outstanding.
//! A request registers itself before it is published and receives its
//! outcome over a oneshot channel; the dispatch loop claims the entry
//! when a response or control failure arrives.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::identity::DeviceIdentity;
use crate::registry::{Operation, OperationClass};
use crate::state::DeviceState;

/// Correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CorrelationKey {
    pub device: DeviceIdentity,
    pub operation: Operation,
}

/// Successful outcome of a request.
#[derive(Debug, Clone)]
pub struct Response {
    pub operation: Operation,
    pub session_id: String,
    pub envelope: Envelope,
    /// Snapshots rebuilt from this response.
    pub states: Vec<Arc<DeviceState>>,
}

pub type Reply = Result<Response, ProtocolError>;

struct Pending {
    session_id: String,
    class: OperationClass,
    issued_at: DateTime<Utc>,
    reply: oneshot::Sender<Reply>,
}

/// Registered request awaiting its reply.
pub struct PendingHandle {
    pub key: CorrelationKey,
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    pub reply: oneshot::Receiver<Reply>,
}

/// A pending request removed from the table by the dispatch loop.
pub struct Claimed {
    pub operation: Operation,
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    reply: oneshot::Sender<Reply>,
}

impl Claimed {
    /// Deliver the outcome. Returns false if the caller already gave up.
    pub fn complete(self, reply: Reply) -> bool {
        self.reply.send(reply).is_ok()
    }
}

/// Pending request table of one device.
pub struct Correlator {
    device: DeviceIdentity,
    pending: Mutex<HashMap<Operation, Pending>>,
}

impl Correlator {
    pub fn new(device: DeviceIdentity) -> Self {
        Self {
            device,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// Register a request. Fails with `Busy` when the key is taken; the
    /// existing entry is left alone.
    pub fn register(
        &self,
        operation: Operation,
        session_id: &str,
        class: OperationClass,
    ) -> Result<PendingHandle, ProtocolError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&operation) {
            return Err(ProtocolError::Busy {
                device: self.device.to_string(),
                operation,
            });
        }

        let (tx, rx) = oneshot::channel();
        let issued_at = Utc::now();
        pending.insert(
            operation,
            Pending {
                session_id: session_id.to_string(),
                class,
                issued_at,
                reply: tx,
            },
        );

        Ok(PendingHandle {
            key: CorrelationKey {
                device: self.device.clone(),
                operation,
            },
            session_id: session_id.to_string(),
            issued_at,
            reply: rx,
        })
    }

    /// Remove a request if it is still the one with `session_id`.
    pub fn cancel(&self, operation: Operation, session_id: &str) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(&operation) {
            Some(p) if p.session_id == session_id => {
                pending.remove(&operation);
                true
            }
            _ => false,
        }
    }

    /// Claim the request a response belongs to.
    ///
    /// `candidates` are the operations answering on the response topic.
    /// With a session id only an exact match is claimed; without one the
    /// oldest candidate is.
    pub fn claim(&self, candidates: &[Operation], session_id: Option<&str>) -> Option<Claimed> {
        let mut pending = self.pending.lock();
        let operation = select(&pending, session_id, |op, _| candidates.contains(op))?;
        pending.remove(&operation).map(|p| claimed(operation, p))
    }

    /// Claim the control request a control failure belongs to.
    pub fn claim_control(&self, session_id: Option<&str>) -> Option<Claimed> {
        let mut pending = self.pending.lock();
        let operation = select(&pending, session_id, |_, p| p.class == OperationClass::Control)?;
        pending.remove(&operation).map(|p| claimed(operation, p))
    }

    /// Fail every outstanding request.
    pub fn fail_all(&self, error: ProtocolError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, p) in drained {
            let _ = p.reply.send(Err(error.clone()));
        }
        count
    }

    pub fn is_pending(&self, operation: Operation) -> bool {
        self.pending.lock().contains_key(&operation)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

fn claimed(operation: Operation, p: Pending) -> Claimed {
    Claimed {
        operation,
        session_id: p.session_id,
        issued_at: p.issued_at,
        reply: p.reply,
    }
}

fn select(
    pending: &HashMap<Operation, Pending>,
    session_id: Option<&str>,
    eligible: impl Fn(&Operation, &Pending) -> bool,
) -> Option<Operation> {
    let mut candidates = pending.iter().filter(|(op, p)| eligible(*op, *p));
    match session_id {
        Some(id) => candidates.find(|(_, p)| p.session_id == id).map(|(op, _)| *op),
        None => candidates.min_by_key(|(_, p)| p.issued_at).map(|(op, _)| *op),
    }
}
