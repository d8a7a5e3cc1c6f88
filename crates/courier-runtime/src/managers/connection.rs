//! Connection supervision for the Courier runtime
//!
//! The [`ConnectionSupervisor`] owns the connection state machine together
//! with everything the pure transition table leaves out: the retry attempt
//! counter, the backoff schedule, the armed retry deadline and the audit trail.

use std::collections::VecDeque;
use std::time::Duration;

use courier_core::{
    protocol::{
        AuditEntry, Backoff, ConnectionEffect, ConnectionEvent, ConnectionState, ConnectionStats,
        StateTransition,
    },
    ReconnectConfig, StateTransitionError, Timestamp, TransportStatus,
};
use tracing::debug;

/// Audit entries kept before the oldest are discarded
const AUDIT_TRAIL_CAPACITY: usize = 256;

// ----------------------------------------------------------------------------
// Supervisor Steps
// ----------------------------------------------------------------------------

/// A reconnect attempt armed by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    /// 1-based attempt number within the current failure streak
    pub attempt: u32,
    pub delay: Duration,
    pub at: Timestamp,
}

/// One applied transition and the work it leaves for the engine
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorStep {
    pub transition: StateTransition,
    /// Effects the engine must carry out, in order. Timer and backoff
    /// bookkeeping has already been handled by the supervisor.
    pub effects: Vec<ConnectionEffect>,
    pub retry: Option<ScheduledRetry>,
    /// Set when the retry budget was spent; carries the attempts made
    pub exhausted: Option<u32>,
}

// ----------------------------------------------------------------------------
// Connection Supervisor
// ----------------------------------------------------------------------------

/// Drives the connection lifecycle for one engine session
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    config: ReconnectConfig,
    backoff: Backoff,
    attempt: u32,
    retry_at: Option<Timestamp>,
    audit_trail: VecDeque<AuditEntry>,
    stats: ConnectionStats,
}

impl ConnectionSupervisor {
    pub fn new(config: ReconnectConfig) -> Self {
        let backoff = Backoff::new(&config);
        Self::with_backoff(config, backoff)
    }

    /// Create a supervisor with reproducible jitter
    pub fn with_seed(config: ReconnectConfig, seed: u64) -> Self {
        let backoff = Backoff::with_seed(&config, seed);
        Self::with_backoff(config, backoff)
    }

    fn with_backoff(config: ReconnectConfig, backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Uninitialized,
            config,
            backoff,
            attempt: 0,
            retry_at: None,
            audit_trail: VecDeque::new(),
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retry attempts consumed in the current failure streak
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// When the armed retry is due
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.retry_at
    }

    /// Recent transitions, oldest first
    pub fn audit_trail(&self) -> impl Iterator<Item = &AuditEntry> {
        self.audit_trail.iter()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Consumer requested a connection
    pub fn connect(&mut self, now: Timestamp) -> Result<Vec<SupervisorStep>, StateTransitionError> {
        self.apply(ConnectionEvent::Connect, now)
    }

    /// Consumer requested a disconnect
    pub fn disconnect(
        &mut self,
        now: Timestamp,
    ) -> Result<Vec<SupervisorStep>, StateTransitionError> {
        self.apply(ConnectionEvent::Disconnect, now)
    }

    /// Feed a status update from the transport
    pub fn on_transport_status(
        &mut self,
        status: TransportStatus,
        now: Timestamp,
    ) -> Result<Vec<SupervisorStep>, StateTransitionError> {
        let event = match status {
            TransportStatus::Connecting => return Ok(Vec::new()),
            TransportStatus::Ready => ConnectionEvent::TransportReady,
            TransportStatus::Dropped { reason } => ConnectionEvent::TransportDropped { reason },
            TransportStatus::Closed => ConnectionEvent::TransportDropped {
                reason: "transport closed".to_string(),
            },
            TransportStatus::Error { reason } => ConnectionEvent::TransportError { reason },
        };
        self.apply(event, now)
    }

    /// Fire the armed retry if it is due
    pub fn poll_retry(&mut self, now: Timestamp) -> Result<Vec<SupervisorStep>, StateTransitionError> {
        match self.retry_at {
            Some(at) if at <= now => {
                self.retry_at = None;
                self.apply(ConnectionEvent::RetryDue, now)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn apply(
        &mut self,
        event: ConnectionEvent,
        now: Timestamp,
    ) -> Result<Vec<SupervisorStep>, StateTransitionError> {
        let mut steps = Vec::new();
        let mut next = Some(event);

        while let Some(event) = next.take() {
            let transition = self.state.transition(event, now).map_err(|e| {
                self.stats.invalid_transitions += 1;
                e
            })?;
            self.record(&transition);

            let mut step = SupervisorStep {
                effects: Vec::with_capacity(transition.effects.len()),
                transition,
                retry: None,
                exhausted: None,
            };

            for effect in step.transition.effects.clone() {
                match effect {
                    ConnectionEffect::ResetBackoff => {
                        self.attempt = 0;
                        self.backoff.reset();
                    }
                    ConnectionEffect::CancelRetry => self.retry_at = None,
                    ConnectionEffect::ScheduleRetry => {
                        if let Some(retry) = self.schedule_retry(step.transition.to, now) {
                            step.retry = Some(retry);
                        } else {
                            self.stats.exhaustions += 1;
                            step.exhausted = Some(self.attempt);
                            if step.transition.to == ConnectionState::Reconnecting {
                                next = Some(ConnectionEvent::AttemptsExhausted);
                            } else {
                                // A failed initial connect is already in `Failed`
                                step.effects.push(ConnectionEffect::FailQueuedSends);
                            }
                        }
                    }
                    ConnectionEffect::OpenTransport => {
                        self.stats.connect_attempts += 1;
                        step.effects.push(effect);
                    }
                    other => step.effects.push(other),
                }
            }

            steps.push(step);
        }

        Ok(steps)
    }

    fn schedule_retry(&mut self, to: ConnectionState, now: Timestamp) -> Option<ScheduledRetry> {
        let allowed = to != ConnectionState::Failed || self.config.retry_initial_connect;
        if !allowed || self.attempt >= self.config.max_attempts {
            return None;
        }

        let delay = self.backoff.next_delay(self.attempt);
        self.attempt += 1;
        let at = now + delay;
        self.retry_at = Some(at);
        debug!(attempt = self.attempt, ?delay, "Scheduled reconnect attempt");

        Some(ScheduledRetry {
            attempt: self.attempt,
            delay,
            at,
        })
    }

    fn record(&mut self, transition: &StateTransition) {
        self.state = transition.to;
        self.stats.transitions += 1;
        if transition.is_change() {
            match (transition.from, transition.to) {
                (_, ConnectionState::Online) => self.stats.times_online += 1,
                (ConnectionState::Online, ConnectionState::Reconnecting) => {
                    self.stats.connections_lost += 1
                }
                _ => {}
            }
        }

        if self.audit_trail.len() >= AUDIT_TRAIL_CAPACITY {
            self.audit_trail.pop_front();
        }
        self.audit_trail.push_back(transition.audit_entry.clone());
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
