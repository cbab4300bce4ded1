//! Error types for the protocol layer.

use crate::registry::Operation;
use crate::identity::ProtocolGeneration;

/// Errors surfaced by the transport adapter.
///
/// The protocol layer treats these as opaque: it never inspects the
/// message, only propagates it to the caller of `send`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Transport is not connected.
    #[error("Transport not connected")]
    NotConnected,

    /// Publish failed.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Subscribe or unsubscribe failed.
    #[error("Subscription failed: {0}")]
    SubscribeFailed(String),

    /// Anything else reported by the adapter.
    #[error("Transport error: {0}")]
    Other(String),
}

/// Errors raised while loading or validating a codec table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A topic template could not be parsed.
    #[error("Invalid topic template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// Two templates can match the same topic with equal specificity.
    #[error("Ambiguous topic templates '{first}' and '{second}'")]
    AmbiguousTemplates { first: String, second: String },

    /// An operation appears twice in one generation table.
    #[error("Duplicate operation {0:?}")]
    DuplicateOperation(Operation),

    /// Two entries share command id, request topic and mode.
    #[error("Duplicate command {command_id} on '{request_suffix}'")]
    DuplicateCommand {
        command_id: u32,
        request_suffix: String,
    },

    /// A response suffix could not be derived and no override was given.
    #[error("No response topic for {0:?}")]
    MissingResponse(Operation),
}

/// Errors returned by protocol operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    /// The generation has no codec entry for the operation.
    #[error("Operation {operation:?} is not supported by the {generation} generation")]
    UnknownOperation {
        generation: ProtocolGeneration,
        operation: Operation,
    },

    /// A request with the same correlation key is still outstanding.
    #[error("Request {operation:?} for {device} already in flight")]
    Busy { device: String, operation: Operation },

    /// No response arrived within the configured timeout.
    #[error("Request {operation:?} for {device} timed out")]
    Timeout { device: String, operation: Operation },

    /// The device rejected a control command.
    #[error("Control command failed with code {code}")]
    ControlFailure { code: i64 },

    /// Transport adapter failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A command parameter is out of range or missing.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The owning session was shut down.
    #[error("Session closed")]
    SessionClosed,

    /// Codec table failed validation.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ProtocolError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. } | Self::Timeout { .. } | Self::Transport(_)
        ) || matches!(self, Self::ControlFailure { code } if *code == crate::events::FAIL_CODE_RATE_LIMITED)
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
