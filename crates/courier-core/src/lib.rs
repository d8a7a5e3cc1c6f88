//! Courier Core
//!
//! Delivery tracking, reply ordering and connection lifecycle for clients of
//! a conversational service. This crate holds the data model and the pure
//! state machines; `courier-runtime` drives them from a single event loop.
//!
//! ## Architecture
//!
//! - **Outgoing pipeline**: correlates submissions with their echo-back
//! - **Ordering pipeline**: suppresses duplicates and orders replies after
//!   their parents
//! - **Delivery ledger**: shared record of pending sends and delivered ids
//! - **Connection state machine**: gates traffic and drives reconnects

pub mod activity;
pub mod channel;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod protocol;
pub mod transport;
pub mod types;

pub use activity::{
    Activity, ActivityBody, ActivityKind, ChannelData, DeliveryStatus, DraftActivity,
    OutboundPayload, RawActivity, RawParticipant,
};
pub use channel::{
    AppEvent, Command, DeliveredFeed, Diagnostic, Effect, EngineStatus, SendCompletion, SubmitHandle,
};
pub use config::{
    ChannelConfig, CourierConfig, DeliveryConfig, HistoryConfig, LedgerConfig, OfflinePolicy,
    OrderingConfig, ReconnectConfig,
};
pub use errors::{
    CourierError, CourierResult, DeliveryFailure, IngestError, Result, StateTransitionError,
    TransportError,
};
pub use ledger::{DeliveryLedger, LedgerStats, PendingSend};
pub use protocol::{ConnectionState, DeliveryUpdate};
pub use transport::{InboundStream, StatusStream, TransportAdapter, TransportStatus};
pub use types::{ActivityId, ClientId, Participant, Role, SystemTimeSource, TimeSource, Timestamp};
