//! Delivery protocol state machines
//!
//! Pure, sans-IO components driven by the engine task:
//! - `connection_state`: connection lifecycle transition table
//! - `backoff`: reconnect delay schedule
//! - `outgoing`: submission tracking and echo reconciliation
//! - `ordering`: inbound duplicate suppression and reply ordering

pub mod backoff;
pub mod connection_state;
pub mod ordering;
pub mod outgoing;

pub use backoff::Backoff;
pub use connection_state::{
    AuditEntry, ConnectionEffect, ConnectionEvent, ConnectionState, ConnectionStats,
    StateTransition,
};
pub use ordering::{DeferredInbound, OrderingEvent, OrderingPipeline, OrderingStats};
pub use outgoing::{
    DeliveryUpdate, EchoMatch, OutgoingPipeline, OutgoingStats, StatusChange, SubmitAction,
    Submission,
};
