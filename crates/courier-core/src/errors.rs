//! Error types for the Courier engine
//!
//! This module contains the error types used throughout the engine: transport
//! errors reported by adapters, ingestion errors for malformed inbound items,
//! delivery failure reasons surfaced to consumers, and the CourierError type
//! that unifies them all.

use crate::protocol::connection_state::ConnectionState;
use crate::types::ClientId;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors reported by a transport adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Transport timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
}

/// Errors raised while validating an inbound item at the ingestion boundary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("Field must not be empty: {field}")]
    EmptyField { field: &'static str },
    #[error("Unknown participant role: {role}")]
    UnknownRole { role: String },
}

/// State machine transition errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition {
        from: ConnectionState,
        event: String,
    },
}

// ----------------------------------------------------------------------------
// Delivery Failure Reasons
// ----------------------------------------------------------------------------

/// Reason an outgoing activity reached the `Failed` status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum DeliveryFailure {
    /// The transport refused or failed the send
    #[error("transport error: {0}")]
    Transport(TransportError),
    /// The service did not echo the activity back in time
    #[error("no echo received within {waited_ms}ms")]
    EchoTimeout { waited_ms: u64 },
    /// The connection left `Online` while the send was unresolved
    #[error("connection lost before confirmation")]
    ConnectionLost,
    /// The caller cancelled the send
    #[error("cancelled by caller")]
    Cancelled,
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Main error type for the Courier engine
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("Cannot submit while {state}: connection is not online")]
    NotOnline { state: ConnectionState },

    #[error("Offline queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    #[error("Unknown submission: {client_id}")]
    UnknownSubmission { client_id: ClientId },

    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CourierError {
    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an unknown submission error
    pub fn unknown_submission(client_id: ClientId) -> Self {
        Self::UnknownSubmission { client_id }
    }

    /// Whether the engine can keep running after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Channel { .. } | Self::Configuration { .. })
    }
}

/// Result type alias for Courier operations
pub type Result<T> = core::result::Result<T, CourierError>;

/// Alternative result type alias for Courier operations
pub type CourierResult<T> = core::result::Result<T, CourierError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_failure_messages() {
        assert_eq!(
            DeliveryFailure::EchoTimeout { waited_ms: 5000 }.to_string(),
            "no echo received within 5000ms"
        );
        let failure = DeliveryFailure::Transport(TransportError::SendFailed {
            reason: "socket closed".into(),
        });
        assert_eq!(failure.to_string(), "transport error: Send failed: socket closed");
    }

    #[test]
    fn transport_errors_convert() {
        let err: CourierError = TransportError::NotConnected.into();
        assert!(matches!(err, CourierError::Transport(TransportError::NotConnected)));
        assert!(err.is_recoverable());
        assert!(!CourierError::channel("closed").is_recoverable());
    }

    #[test]
    fn not_online_names_the_state() {
        let err = CourierError::NotOnline {
            state: ConnectionState::Reconnecting,
        };
        assert_eq!(
            err.to_string(),
            "Cannot submit while Reconnecting: connection is not online"
        );
    }
}
