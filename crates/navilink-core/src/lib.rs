//! Protocol translation layer for NaviLink water heaters.
//!
//! Provides:
//! - Per-generation codec tables (command ids, topics, payload shapes)
//! - Numeric encoders (half/tenth degree, weekday masks, polarity)
//! - Topic rendering and inbound routing
//! - Request/response correlation over any publish/subscribe transport
//! - Event classification and canonical device state

pub mod command;
pub mod config;
pub mod controller;
pub mod correlator;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod events;
pub mod identity;
pub mod registry;
pub mod session;
pub mod state;
pub mod topic;
pub mod transport;

// Re-exports
pub use command::{Command, EncodeContext};
pub use config::SessionConfig;
pub use controller::Controller;
pub use correlator::{CorrelationKey, Correlator, Response};
pub use encoding::{BinaryState, Polarity, TemperatureUnit, WeekdaySet};
pub use envelope::{Envelope, ReservationProgram, RequestParams};
pub use error::{ProtocolError, RegistryError, Result, TransportError};
pub use events::{
    ConnectionEvent, ControlFailEvent, DeviceEvent, TransportDisconnectEvent, UnrecognizedEvent,
};
pub use identity::{DeviceIdentity, ProtocolGeneration, SessionContext};
pub use registry::{CodecRegistry, CommandDescriptor, Operation, OperationClass};
pub use session::{DeviceSession, Dispatched, SessionEvent};
pub use state::{DeviceState, OperationMode, ReservationEntry, VacationSchedule};
pub use transport::{InboundMessage, LastWill, MemoryTransport, Transport};
