//! Engine Communication Types
//!
//! Messages exchanged between consumers, the engine task and the transport:
//!
//! - [`Command`]: consumer handle → engine
//! - [`SendCompletion`]: spawned transport send → engine
//! - [`Effect`]: engine → transport executor
//! - [`AppEvent`]: engine → consumers

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::activity::{Activity, DraftActivity, OutboundPayload};
use crate::channel::utils::{DeliveredFeed, SubmitHandle};
use crate::errors::{CourierResult, TransportError};
use crate::ledger::LedgerStats;
use crate::protocol::connection_state::{ConnectionState, ConnectionStats};
use crate::protocol::ordering::OrderingStats;
use crate::protocol::outgoing::{DeliveryUpdate, OutgoingStats};
use crate::types::{ActivityId, ClientId, Timestamp};

// ----------------------------------------------------------------------------
// Commands (Consumer → Engine)
// ----------------------------------------------------------------------------

/// Requests from consumer handles to the engine task
#[derive(Debug)]
pub enum Command {
    /// Start (or restart) a connection
    Connect,
    /// Close the connection, failing pending sends
    Disconnect,
    /// Submit a new draft
    Submit {
        draft: DraftActivity,
        responder: oneshot::Sender<CourierResult<SubmitHandle>>,
    },
    /// Submit a failed draft again under a new client id
    Resubmit {
        client_id: ClientId,
        responder: oneshot::Sender<CourierResult<SubmitHandle>>,
    },
    /// Abandon a pending send
    Cancel {
        client_id: ClientId,
        responder: oneshot::Sender<bool>,
    },
    /// Subscribe to delivered activities with replay
    SubscribeDelivered {
        responder: oneshot::Sender<DeliveredFeed>,
    },
    /// Report engine status
    GetStatus {
        responder: oneshot::Sender<EngineStatus>,
    },
    /// Stop the engine task
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect => "Connect",
            Command::Disconnect => "Disconnect",
            Command::Submit { .. } => "Submit",
            Command::Resubmit { .. } => "Resubmit",
            Command::Cancel { .. } => "Cancel",
            Command::SubscribeDelivered { .. } => "SubscribeDelivered",
            Command::GetStatus { .. } => "GetStatus",
            Command::Shutdown => "Shutdown",
        }
    }
}

// ----------------------------------------------------------------------------
// Send Completions (Transport → Engine)
// ----------------------------------------------------------------------------

/// Result of a spawned transport send
#[derive(Debug, Clone, PartialEq)]
pub struct SendCompletion {
    pub client_id: ClientId,
    pub result: Result<(), TransportError>,
}

// ----------------------------------------------------------------------------
// Effects (Engine → Transport)
// ----------------------------------------------------------------------------

/// Transport operations requested by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Subscribe to the transport's status and inbound streams
    OpenTransport,
    /// Drop the current subscriptions and close the transport
    CloseTransport,
    /// Hand a payload to the transport
    Transmit {
        client_id: ClientId,
        payload: OutboundPayload,
    },
}

// ----------------------------------------------------------------------------
// App Events (Engine → Consumers)
// ----------------------------------------------------------------------------

/// Observable engine events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEvent {
    /// The connection state changed
    ConnectionStateChanged {
        from: ConnectionState,
        to: ConnectionState,
        reason: Option<String>,
    },
    /// A submission's delivery status changed
    DeliveryStatusChanged {
        client_id: ClientId,
        update: DeliveryUpdate,
    },
    /// An activity was delivered to consumers
    ActivityDelivered(Activity),
    /// A non-fatal observation
    Diagnostic(Diagnostic),
}

/// Non-fatal engine observations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// A reply was delivered without the activity it answers
    DependencyTimeout {
        activity_id: ActivityId,
        awaited_id: ActivityId,
    },
    /// A reconnect attempt was scheduled
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    /// The reconnect budget is spent; the connection is terminally failed
    ReconnectExhausted { attempts: u32 },
    /// An echo reused a confirmed client id with a different server id
    ClientIdCollision {
        client_id: ClientId,
        confirmed_id: ActivityId,
        incoming_id: ActivityId,
    },
    /// An echo arrived after its send had already failed
    LateEcho {
        client_id: ClientId,
        activity_id: ActivityId,
    },
    /// An inbound item failed validation
    RejectedInbound { reason: String },
}

impl Diagnostic {
    /// Whether this indicates a defect rather than a network condition
    pub fn is_defect(&self) -> bool {
        matches!(self, Diagnostic::ClientIdCollision { .. })
    }
}

// ----------------------------------------------------------------------------
// Engine Status
// ----------------------------------------------------------------------------

/// Snapshot of engine state and counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: ConnectionState,
    /// Sends awaiting their echo, including queued ones
    pub pending_sends: usize,
    /// Sends held until the connection is online
    pub queued_sends: usize,
    /// Inbound replies waiting for their parent
    pub deferred_inbound: usize,
    /// Delivered ids remembered for duplicate suppression
    pub delivered_ids: usize,
    pub reconnect_attempt: u32,
    pub next_retry_at: Option<Timestamp>,
    pub connection: ConnectionStats,
    pub outgoing: OutgoingStats,
    pub ordering: OrderingStats,
    pub ledger: LedgerStats,
}
