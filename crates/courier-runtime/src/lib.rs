//! Courier Runtime Engine
//!
//! Drives the `courier-core` state machines against a live transport:
//! - `EngineBuilder` / `EngineHandle`: the consumer-facing API
//! - `EngineTask`: the single event loop that owns all session state
//! - `ConnectionSupervisor`: connection lifecycle with jittered reconnects
//! - `DeliveredHistory`: replay buffer for late subscribers
//!
//! `courier-core` provides the stable types and pure logic; this crate adds
//! the tokio plumbing around them.

pub mod builder;
pub mod clock;
pub mod logic;
pub mod managers;

pub use builder::{EngineBuilder, EngineHandle};
pub use clock::TokioTimeSource;
pub use logic::{EngineStats, EngineTask};
pub use managers::*;

// Re-export core types for convenience
pub use courier_core::{
    channel::utils::{AppEventReceiver, AppEventSender},
    Activity, AppEvent, ConnectionState, CourierConfig, CourierError, CourierResult,
    DeliveredFeed, DeliveryFailure, DeliveryUpdate, Diagnostic, DraftActivity, EngineStatus,
    Participant, SubmitHandle, TransportAdapter,
};
