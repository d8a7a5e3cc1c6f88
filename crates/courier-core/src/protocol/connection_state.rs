//! Connection State Machine
//!
//! Pure transition table for the connection lifecycle. Every transition
//! yields the effects the supervisor must carry out and an audit entry; the
//! machine itself owns no timers and performs no I/O.

use crate::errors::StateTransitionError;
use crate::types::Timestamp;
use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

/// Lifecycle state of the connection to the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No connect has been requested yet
    #[default]
    Uninitialized,
    /// Initial connect in progress
    Connecting,
    /// Traffic may flow
    Online,
    /// Connection dropped; retrying with backoff
    Reconnecting,
    /// Closed on request; terminal until the next `connect`
    Disconnected,
    /// Connect failed; terminal once the retry budget is spent
    Failed,
}

impl ConnectionState {
    /// Get state name for logging
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "Uninitialized",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Online => "Online",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Failed => "Failed",
        }
    }

    /// Only `Online` permits transmission
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Online)
    }

    /// Whether a transport session is open or being opened
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Online | ConnectionState::Reconnecting
        )
    }

    /// Apply an event, producing the next state and its effects
    pub fn transition(
        self,
        event: ConnectionEvent,
        now: Timestamp,
    ) -> Result<StateTransition, StateTransitionError> {
        use ConnectionEffect::*;
        use ConnectionEvent::*;
        use ConnectionState::*;

        let (to, effects) = match (self, &event) {
            (Uninitialized | Disconnected, Connect) => {
                (Connecting, vec![ResetBackoff, OpenTransport])
            }
            (Failed, Connect) => (Connecting, vec![CancelRetry, ResetBackoff, OpenTransport]),
            (Failed, RetryDue) => (Connecting, vec![OpenTransport]),

            (Connecting | Reconnecting, TransportReady) => {
                (Online, vec![ResetBackoff, FlushQueuedSends])
            }
            (Connecting, TransportError { .. } | TransportDropped { .. }) => {
                (Failed, vec![CloseTransport, ScheduleRetry])
            }

            (Online, TransportError { .. } | TransportDropped { .. }) => (
                Reconnecting,
                vec![FailInFlightSends, CloseTransport, ScheduleRetry],
            ),

            (Reconnecting, RetryDue) => (Reconnecting, vec![OpenTransport]),
            (Reconnecting, TransportError { .. } | TransportDropped { .. }) => {
                (Reconnecting, vec![CloseTransport, ScheduleRetry])
            }
            (Reconnecting, AttemptsExhausted) => {
                (Failed, vec![CloseTransport, FailQueuedSends])
            }

            (Connecting | Online | Reconnecting | Failed, Disconnect) => (
                Disconnected,
                vec![
                    CancelRetry,
                    FailInFlightSends,
                    FailQueuedSends,
                    ReleaseDeferred,
                    CloseTransport,
                ],
            ),

            (from, event) => {
                return Err(StateTransitionError::InvalidTransition {
                    from,
                    event: event.event_name().to_string(),
                })
            }
        };

        let audit_entry = AuditEntry {
            timestamp: now,
            from_state: self,
            to_state: to,
            event: event.describe(),
            effects_count: effects.len(),
        };

        Ok(StateTransition {
            from: self,
            to,
            effects,
            audit_entry,
        })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

// ----------------------------------------------------------------------------
// State Transition Events
// ----------------------------------------------------------------------------

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Consumer requested a connection
    Connect,
    /// Transport reports it can carry traffic
    TransportReady,
    /// Transport failed to connect or errored
    TransportError { reason: String },
    /// Established transport connection was lost
    TransportDropped { reason: String },
    /// A scheduled retry is due
    RetryDue,
    /// The retry budget is spent
    AttemptsExhausted,
    /// Consumer requested a disconnect
    Disconnect,
}

impl ConnectionEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connect => "Connect",
            ConnectionEvent::TransportReady => "TransportReady",
            ConnectionEvent::TransportError { .. } => "TransportError",
            ConnectionEvent::TransportDropped { .. } => "TransportDropped",
            ConnectionEvent::RetryDue => "RetryDue",
            ConnectionEvent::AttemptsExhausted => "AttemptsExhausted",
            ConnectionEvent::Disconnect => "Disconnect",
        }
    }

    /// Event name with its reason, if any
    pub fn describe(&self) -> String {
        match self {
            ConnectionEvent::TransportError { reason }
            | ConnectionEvent::TransportDropped { reason } => {
                format!("{}: {}", self.event_name(), reason)
            }
            other => other.event_name().to_string(),
        }
    }

    /// Reason carried by transport failure events
    pub fn reason(&self) -> Option<&str> {
        match self {
            ConnectionEvent::TransportError { reason }
            | ConnectionEvent::TransportDropped { reason } => Some(reason),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// State Transition Results
// ----------------------------------------------------------------------------

/// Instruction produced by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionEffect {
    /// Subscribe to the transport, starting a connect attempt
    OpenTransport,
    /// Drop transport subscriptions and close it
    CloseTransport,
    /// Consume one retry attempt and arm the backoff timer
    ScheduleRetry,
    /// Disarm the backoff timer
    CancelRetry,
    /// Forget the attempt count and backoff streak
    ResetBackoff,
    /// Fail transmitted sends with `ConnectionLost`
    FailInFlightSends,
    /// Fail offline-queued sends with `ConnectionLost`
    FailQueuedSends,
    /// Transmit offline-queued sends
    FlushQueuedSends,
    /// Release every deferred inbound item without waiting
    ReleaseDeferred,
}

/// Result of a state transition
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// Effects to execute as result of transition, in order
    pub effects: Vec<ConnectionEffect>,
    pub audit_entry: AuditEntry,
}

impl StateTransition {
    /// Whether the state actually changed
    pub fn is_change(&self) -> bool {
        self.from != self.to
    }
}

/// Record of a transition for the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub from_state: ConnectionState,
    pub to_state: ConnectionState,
    pub event: String,
    pub effects_count: usize,
}

/// Connection lifecycle counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Transitions applied, including self-transitions
    pub transitions: u64,
    /// Events rejected by the state machine
    pub invalid_transitions: u64,
    /// Transport subscriptions opened
    pub connect_attempts: u64,
    /// Times the connection reached `Online`
    pub times_online: u64,
    /// Times an online connection was lost
    pub connections_lost: u64,
    /// Times the retry budget was spent
    pub exhaustions: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionEffect::*;

    fn now() -> Timestamp {
        Timestamp::new(1_000)
    }

    fn dropped() -> ConnectionEvent {
        ConnectionEvent::TransportDropped {
            reason: "socket closed".into(),
        }
    }

    #[test]
    fn happy_path_to_online() {
        let t = ConnectionState::Uninitialized
            .transition(ConnectionEvent::Connect, now())
            .unwrap();
        assert_eq!(t.to, ConnectionState::Connecting);
        assert_eq!(t.effects, vec![ResetBackoff, OpenTransport]);

        let t = t.to.transition(ConnectionEvent::TransportReady, now()).unwrap();
        assert_eq!(t.to, ConnectionState::Online);
        assert!(t.to.can_send());
        assert!(t.effects.contains(&FlushQueuedSends));
    }

    #[test]
    fn drop_while_online_fails_in_flight_and_retries() {
        let t = ConnectionState::Online.transition(dropped(), now()).unwrap();
        assert_eq!(t.to, ConnectionState::Reconnecting);
        assert_eq!(t.effects, vec![FailInFlightSends, CloseTransport, ScheduleRetry]);
        assert_eq!(t.audit_entry.event, "TransportDropped: socket closed");
    }

    #[test]
    fn reconnect_attempts_loop_until_exhausted() {
        let t = ConnectionState::Reconnecting
            .transition(ConnectionEvent::RetryDue, now())
            .unwrap();
        assert_eq!(t.to, ConnectionState::Reconnecting);
        assert!(!t.is_change());

        let t = ConnectionState::Reconnecting
            .transition(ConnectionEvent::AttemptsExhausted, now())
            .unwrap();
        assert_eq!(t.to, ConnectionState::Failed);
        assert!(t.effects.contains(&FailQueuedSends));
    }

    #[test]
    fn initial_connect_failure_goes_to_failed() {
        let t = ConnectionState::Connecting
            .transition(
                ConnectionEvent::TransportError {
                    reason: "refused".into(),
                },
                now(),
            )
            .unwrap();
        assert_eq!(t.to, ConnectionState::Failed);
        assert!(t.effects.contains(&ScheduleRetry));

        let t = t.to.transition(ConnectionEvent::RetryDue, now()).unwrap();
        assert_eq!(t.to, ConnectionState::Connecting);
    }

    #[test]
    fn disconnect_from_every_active_state() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Online,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
        ] {
            let t = state.transition(ConnectionEvent::Disconnect, now()).unwrap();
            assert_eq!(t.to, ConnectionState::Disconnected);
            assert!(t.effects.contains(&FailInFlightSends));
            assert!(t.effects.contains(&ReleaseDeferred));
        }
    }

    #[test]
    fn rejects_invalid_transitions() {
        let err = ConnectionState::Online
            .transition(ConnectionEvent::Connect, now())
            .unwrap_err();
        assert_eq!(
            err,
            StateTransitionError::InvalidTransition {
                from: ConnectionState::Online,
                event: "Connect".into(),
            }
        );
        assert!(ConnectionState::Disconnected
            .transition(ConnectionEvent::TransportReady, now())
            .is_err());
        assert!(ConnectionState::Uninitialized
            .transition(ConnectionEvent::Disconnect, now())
            .is_err());
    }

    #[test]
    fn only_online_can_send() {
        for state in [
            ConnectionState::Uninitialized,
            ConnectionState::Connecting,
            ConnectionState::Reconnecting,
            ConnectionState::Disconnected,
            ConnectionState::Failed,
        ] {
            assert!(!state.can_send(), "{state}");
        }
    }
}
