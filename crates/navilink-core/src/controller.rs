//! Multi-device front door.
//!
//! Routes calls to the [`DeviceSession`] owning each device. Sessions
//! share nothing, so one device being slow never blocks another.

use dashmap::DashMap;
use futures::future::join_all;

use crate::command::Command;
use crate::correlator::Response;
use crate::envelope::RequestParams;
use crate::error::{ProtocolError, Result};
use crate::identity::DeviceIdentity;
use crate::registry::Operation;
use crate::session::DeviceSession;

#[derive(Default)]
pub struct Controller {
    sessions: DashMap<DeviceIdentity, DeviceSession>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a started session, returning the one it replaces.
    pub fn add(&self, session: DeviceSession) -> Option<DeviceSession> {
        self.sessions.insert(session.identity().clone(), session)
    }

    /// Remove and close a device's session.
    pub async fn remove(&self, identity: &DeviceIdentity) -> Option<DeviceSession> {
        let (_, session) = self.sessions.remove(identity)?;
        session.close().await;
        Some(session)
    }

    pub fn get(&self, identity: &DeviceIdentity) -> Option<DeviceSession> {
        self.sessions.get(identity).map(|s| s.value().clone())
    }

    pub fn devices(&self) -> Vec<DeviceIdentity> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub async fn send(
        &self,
        identity: &DeviceIdentity,
        operation: Operation,
        params: RequestParams,
    ) -> Result<Response> {
        self.session(identity)?.send(operation, params).await
    }

    pub async fn execute(&self, identity: &DeviceIdentity, command: Command) -> Result<Response> {
        self.session(identity)?.execute(command).await
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<DeviceSession> = self.sessions.iter().map(|e| e.value().clone()).collect();
        self.sessions.clear();
        join_all(sessions.iter().map(DeviceSession::close)).await;
    }

    // Clone out of the map so no shard lock is held across an await.
    fn session(&self, identity: &DeviceIdentity) -> Result<DeviceSession> {
        self.get(identity).ok_or_else(|| {
            ProtocolError::InvalidParameter(format!("no session for device {identity}"))
        })
    }
}
