//! Transport abstraction for the Courier engine
//!
//! The engine never talks to the network itself. A [`TransportAdapter`]
//! carries outgoing payloads to the service and exposes the service's
//! connection status and inbound activities as channels, keeping delivery
//! logic cleanly separated from the wire protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::activity::{OutboundPayload, RawActivity};
use crate::errors::TransportError;

// ----------------------------------------------------------------------------
// Transport Status
// ----------------------------------------------------------------------------

/// Connection status reported by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportStatus {
    /// A connect attempt is under way
    Connecting,
    /// The transport can carry traffic
    Ready,
    /// An established connection was lost
    Dropped { reason: String },
    /// A connect attempt failed or the transport errored
    Error { reason: String },
    /// The transport was closed
    Closed,
}

impl TransportStatus {
    pub fn dropped(reason: impl Into<String>) -> Self {
        Self::Dropped {
            reason: reason.into(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }
}

/// Stream of status updates from one subscription
pub type StatusStream = mpsc::Receiver<TransportStatus>;

/// Stream of inbound activities from one subscription
pub type InboundStream = mpsc::Receiver<RawActivity>;

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Contract between the engine and the service connection
///
/// Subscriptions are cold: nothing happens until the engine subscribes, and
/// each fresh status subscription is one connect attempt. Closing the
/// returned receivers' senders ends the corresponding stream.
#[async_trait]
pub trait TransportAdapter: Send + Sync + 'static {
    /// Hand a payload to the service. Success means the transport accepted
    /// it, not that the service has processed it.
    async fn send(&self, payload: OutboundPayload) -> Result<(), TransportError>;

    /// Subscribe to connection status, starting a connect attempt
    async fn status_events(&self) -> Result<StatusStream, TransportError>;

    /// Subscribe to inbound activities
    async fn inbound_events(&self) -> Result<InboundStream, TransportError>;

    /// Release transport resources. Must be idempotent.
    async fn close(&self);

    /// Name used in log output
    fn name(&self) -> &str {
        "transport"
    }
}
