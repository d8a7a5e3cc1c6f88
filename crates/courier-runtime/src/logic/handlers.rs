//! Engine Command and Event Handlers
//!
//! Each handler applies one input to the [`SessionState`] and returns the
//! resulting [`Outcome`]: transport effects to execute and app events to
//! publish. Handlers never perform I/O.

use courier_core::{
    channel::utils::create_update_channel,
    protocol::{ConnectionEffect, EchoMatch, OrderingEvent, StatusChange, SubmitAction, Submission},
    Activity, AppEvent, ClientId, CourierResult, DeliveryFailure, DeliveryUpdate, Diagnostic,
    DraftActivity, Effect, RawActivity, SendCompletion, StateTransitionError, SubmitHandle,
    Timestamp, TransportStatus,
};
use tracing::{debug, error, info, warn};

use super::state::SessionState;
use crate::managers::SupervisorStep;

// ----------------------------------------------------------------------------
// Handler Outcome
// ----------------------------------------------------------------------------

/// Work produced by a handler
#[derive(Debug, Default)]
pub struct Outcome {
    pub effects: Vec<Effect>,
    pub events: Vec<AppEvent>,
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.events.is_empty()
    }

    fn status(&mut self, change: StatusChange) {
        self.events.push(AppEvent::DeliveryStatusChanged {
            client_id: change.client_id,
            update: change.update,
        });
    }

    fn statuses(&mut self, changes: impl IntoIterator<Item = StatusChange>) {
        for change in changes {
            self.status(change);
        }
    }

    fn diagnostic(&mut self, diagnostic: Diagnostic) {
        self.events.push(AppEvent::Diagnostic(diagnostic));
    }

    fn ordering(&mut self, events: Vec<OrderingEvent>) {
        for event in events {
            match event {
                OrderingEvent::Delivered(activity) => {
                    self.events.push(AppEvent::ActivityDelivered(activity));
                }
                OrderingEvent::DependencyTimeout { id, awaited_id } => {
                    self.diagnostic(Diagnostic::DependencyTimeout {
                        activity_id: id,
                        awaited_id,
                    });
                }
                OrderingEvent::Duplicate { .. } | OrderingEvent::Deferred { .. } => {}
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Handlers
// ----------------------------------------------------------------------------

/// Command and event handlers for the engine task
pub struct EngineHandlers;

impl EngineHandlers {
    /// Handle connect command
    pub fn handle_connect(state: &mut SessionState, now: Timestamp) -> Outcome {
        let steps = state.supervisor.connect(now);
        Self::apply_supervisor(state, steps, "connect", now)
    }

    /// Handle disconnect command
    pub fn handle_disconnect(state: &mut SessionState, now: Timestamp) -> Outcome {
        let steps = state.supervisor.disconnect(now);
        Self::apply_supervisor(state, steps, "disconnect", now)
    }

    /// Handle submit command
    pub fn handle_submit(
        state: &mut SessionState,
        draft: DraftActivity,
        now: Timestamp,
    ) -> CourierResult<(SubmitHandle, Outcome)> {
        let connection = state.supervisor.state();
        let submission = state
            .outgoing
            .submit(&mut state.ledger, draft, connection, now)?;
        Ok(Self::accept_submission(state, submission))
    }

    /// Handle resubmit command
    pub fn handle_resubmit(
        state: &mut SessionState,
        failed: &ClientId,
        now: Timestamp,
    ) -> CourierResult<(SubmitHandle, Outcome)> {
        let connection = state.supervisor.state();
        let submission = state
            .outgoing
            .resubmit(&mut state.ledger, failed, connection, now)?;
        Ok(Self::accept_submission(state, submission))
    }

    fn accept_submission(state: &mut SessionState, submission: Submission) -> (SubmitHandle, Outcome) {
        let (updates_tx, updates_rx) = create_update_channel();
        state
            .subscribers
            .insert(submission.client_id.clone(), updates_tx);

        let mut outcome = Outcome::default();
        outcome.events.push(AppEvent::DeliveryStatusChanged {
            client_id: submission.client_id.clone(),
            update: DeliveryUpdate::Pending,
        });
        if let SubmitAction::Transmit(payload) = submission.action {
            outcome.effects.push(Effect::Transmit {
                client_id: submission.client_id.clone(),
                payload,
            });
        }

        let handle = SubmitHandle::new(submission.client_id, submission.attempt, updates_rx);
        (handle, outcome)
    }

    /// Handle cancel command; reports whether a pending send was cancelled
    pub fn handle_cancel(state: &mut SessionState, client_id: &ClientId) -> (bool, Outcome) {
        let mut outcome = Outcome::default();
        match state.outgoing.cancel(&mut state.ledger, client_id) {
            Some(change) => {
                debug!(client_id = %client_id, "Cancelled pending send");
                outcome.status(change);
                (true, outcome)
            }
            None => (false, outcome),
        }
    }

    /// Handle a status update from the transport
    pub fn handle_transport_status(
        state: &mut SessionState,
        status: TransportStatus,
        now: Timestamp,
    ) -> Outcome {
        let steps = state.supervisor.on_transport_status(status, now);
        Self::apply_supervisor(state, steps, "transport status", now)
    }

    /// Handle an inbound activity from the transport
    pub fn handle_inbound(
        state: &mut SessionState,
        raw: RawActivity,
        now: Timestamp,
    ) -> CourierResult<Outcome> {
        let mut outcome = Outcome::default();

        let activity = match Activity::try_from(raw) {
            Ok(activity) => activity,
            Err(e) => {
                warn!(error = %e, "Rejected malformed inbound activity");
                state.stats.inbound_rejected += 1;
                outcome.diagnostic(Diagnostic::RejectedInbound {
                    reason: e.to_string(),
                });
                return Ok(outcome);
            }
        };

        let to_order = match state.outgoing.match_echo(&mut state.ledger, &activity) {
            EchoMatch::Confirmed {
                client_id,
                activity,
            } => {
                debug!(client_id = %client_id, id = %activity.log_id(), "Send confirmed by echo");
                outcome.status(StatusChange {
                    client_id,
                    update: DeliveryUpdate::Confirmed(activity.clone()),
                });
                activity
            }
            EchoMatch::Duplicate { client_id, id } => {
                debug!(client_id = %client_id, id = %id, "Dropped repeated echo");
                return Ok(outcome);
            }
            EchoMatch::Collision {
                client_id,
                confirmed_id,
                incoming_id,
            } => {
                error!(
                    client_id = %client_id,
                    confirmed = %confirmed_id,
                    incoming = %incoming_id,
                    "Client id already confirmed under another id; dropping echo"
                );
                outcome.diagnostic(Diagnostic::ClientIdCollision {
                    client_id,
                    confirmed_id,
                    incoming_id,
                });
                return Ok(outcome);
            }
            EchoMatch::Late { client_id } => {
                warn!(client_id = %client_id, id = %activity.log_id(), "Echo arrived after the send failed");
                if let Some(activity_id) = activity.id.clone() {
                    outcome.diagnostic(Diagnostic::LateEcho {
                        client_id,
                        activity_id,
                    });
                }
                activity
            }
            EchoMatch::Unmatched => activity,
        };

        let events = state.ordering.ingest(&mut state.ledger, to_order, now)?;
        outcome.ordering(events);
        Ok(outcome)
    }

    /// Handle the result of a spawned transport send
    pub fn handle_send_completed(state: &mut SessionState, completion: SendCompletion) -> Outcome {
        let mut outcome = Outcome::default();
        let SendCompletion { client_id, result } = completion;

        let change = match result {
            Ok(()) => state.outgoing.mark_sent(&mut state.ledger, &client_id),
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Transport rejected send");
                state.outgoing.transmit_failed(&mut state.ledger, &client_id, e)
            }
        };
        match change {
            Some(change) => outcome.status(change),
            // The send already reached a terminal status
            None => debug!(client_id = %client_id, "Ignoring late send completion"),
        }
        outcome
    }

    /// Handle elapsed echo, dependency and reconnect deadlines
    pub fn handle_timers(state: &mut SessionState, now: Timestamp) -> Outcome {
        let mut outcome = Outcome::default();

        let expired = state.outgoing.expire(&mut state.ledger, now);
        outcome.statuses(expired);

        let released = state.ordering.expire(&mut state.ledger, now);
        outcome.ordering(released);

        let steps = state.supervisor.poll_retry(now);
        let retry = Self::apply_supervisor(state, steps, "retry timer", now);
        outcome.effects.extend(retry.effects);
        outcome.events.extend(retry.events);
        outcome
    }

    // ------------------------------------------------------------------------
    // Connection Effects
    // ------------------------------------------------------------------------

    fn apply_supervisor(
        state: &mut SessionState,
        steps: Result<Vec<SupervisorStep>, StateTransitionError>,
        context: &str,
        now: Timestamp,
    ) -> Outcome {
        match steps {
            Ok(steps) => Self::apply_steps(state, steps, now),
            Err(e) => {
                debug!(context, error = %e, "Ignoring connection event");
                Outcome::default()
            }
        }
    }

    fn apply_steps(state: &mut SessionState, steps: Vec<SupervisorStep>, now: Timestamp) -> Outcome {
        let mut outcome = Outcome::default();

        for step in steps {
            let transition = &step.transition;
            if transition.is_change() {
                info!(
                    from = %transition.from,
                    to = %transition.to,
                    event = %transition.audit_entry.event,
                    "Connection state changed"
                );
                outcome.events.push(AppEvent::ConnectionStateChanged {
                    from: transition.from,
                    to: transition.to,
                    reason: Some(transition.audit_entry.event.clone()),
                });
            }

            if let Some(retry) = step.retry {
                info!(attempt = retry.attempt, delay_ms = retry.delay.as_millis() as u64, "Reconnect scheduled");
                outcome.diagnostic(Diagnostic::ReconnectScheduled {
                    attempt: retry.attempt,
                    delay_ms: retry.delay.as_millis() as u64,
                });
            }
            if let Some(attempts) = step.exhausted {
                error!(attempts, "Reconnect attempts exhausted; connection failed");
                outcome.diagnostic(Diagnostic::ReconnectExhausted { attempts });
            }

            for effect in step.effects {
                match effect {
                    ConnectionEffect::OpenTransport => outcome.effects.push(Effect::OpenTransport),
                    ConnectionEffect::CloseTransport => outcome.effects.push(Effect::CloseTransport),
                    ConnectionEffect::FailInFlightSends => {
                        let failed = state
                            .outgoing
                            .fail_in_flight(&mut state.ledger, DeliveryFailure::ConnectionLost);
                        outcome.statuses(failed);
                    }
                    ConnectionEffect::FailQueuedSends => {
                        let failed = state
                            .outgoing
                            .fail_queued(&mut state.ledger, DeliveryFailure::ConnectionLost);
                        outcome.statuses(failed);
                    }
                    ConnectionEffect::FlushQueuedSends => {
                        for (client_id, payload) in state.outgoing.flush_queue(&mut state.ledger, now) {
                            outcome.effects.push(Effect::Transmit { client_id, payload });
                        }
                    }
                    ConnectionEffect::ReleaseDeferred => {
                        let released = state.ordering.release_all(&mut state.ledger);
                        outcome.ordering(released);
                    }
                    // Bookkeeping effects are consumed by the supervisor
                    ConnectionEffect::ScheduleRetry
                    | ConnectionEffect::CancelRetry
                    | ConnectionEffect::ResetBackoff => {}
                }
            }
        }

        outcome
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{ConnectionState, CourierConfig, CourierError, Participant, TransportError};

    fn now() -> Timestamp {
        Timestamp::new(10_000)
    }

    fn session() -> SessionState {
        SessionState::new(&CourierConfig::testing(), Participant::user("me"), Some(1))
    }

    fn online_session() -> SessionState {
        let mut state = session();
        EngineHandlers::handle_connect(&mut state, now());
        EngineHandlers::handle_transport_status(&mut state, TransportStatus::Ready, now());
        assert_eq!(state.supervisor.state(), ConnectionState::Online);
        state
    }

    fn submit(state: &mut SessionState, text: &str) -> (SubmitHandle, Outcome) {
        EngineHandlers::handle_submit(state, DraftActivity::message(text), now()).unwrap()
    }

    fn transmitted(outcome: &Outcome) -> RawActivity {
        match &outcome.effects[..] {
            [Effect::Transmit { payload, .. }] => payload.to_raw(),
            other => panic!("expected one transmit, got {other:?}"),
        }
    }

    #[test]
    fn connect_emits_state_change_and_opens_transport() {
        let mut state = session();
        let outcome = EngineHandlers::handle_connect(&mut state, now());

        assert_eq!(outcome.effects, vec![Effect::OpenTransport]);
        assert!(matches!(
            outcome.events[..],
            [AppEvent::ConnectionStateChanged {
                from: ConnectionState::Uninitialized,
                to: ConnectionState::Connecting,
                ..
            }]
        ));
    }

    #[test]
    fn repeated_connect_is_ignored() {
        let mut state = online_session();
        assert!(EngineHandlers::handle_connect(&mut state, now()).is_empty());
    }

    #[test]
    fn submit_offline_is_rejected() {
        let mut state = session();
        let err = EngineHandlers::handle_submit(&mut state, DraftActivity::message("hi"), now())
            .unwrap_err();
        assert!(matches!(err, CourierError::NotOnline { .. }));
    }

    #[test]
    fn echo_confirms_and_delivers() {
        let mut state = online_session();
        let (handle, outcome) = submit(&mut state, "hello");
        let mut echo = transmitted(&outcome);
        echo.id = Some("srv-1".into());

        let outcome = EngineHandlers::handle_inbound(&mut state, echo.clone(), now()).unwrap();
        assert!(matches!(
            &outcome.events[0],
            AppEvent::DeliveryStatusChanged { client_id, update: DeliveryUpdate::Confirmed(_) }
                if client_id == handle.client_id()
        ));
        assert!(matches!(&outcome.events[1], AppEvent::ActivityDelivered(_)));
        assert_eq!(state.ledger.pending_count(), 0);

        // Replayed echo is dropped silently
        let outcome = EngineHandlers::handle_inbound(&mut state, echo, now()).unwrap();
        assert!(outcome.is_empty());
    }

    #[test]
    fn collision_is_reported_and_dropped() {
        let mut state = online_session();
        let (_handle, outcome) = submit(&mut state, "hello");
        let mut echo = transmitted(&outcome);
        echo.id = Some("srv-1".into());
        EngineHandlers::handle_inbound(&mut state, echo.clone(), now()).unwrap();

        echo.id = Some("srv-2".into());
        let outcome = EngineHandlers::handle_inbound(&mut state, echo, now()).unwrap();
        assert!(matches!(
            &outcome.events[..],
            [AppEvent::Diagnostic(Diagnostic::ClientIdCollision { .. })]
        ));
        assert_eq!(state.ledger.delivered_count(), 1);
    }

    #[test]
    fn malformed_inbound_becomes_diagnostic() {
        let mut state = online_session();
        let raw = RawActivity {
            kind: "message".into(),
            ..RawActivity::default()
        };
        let outcome = EngineHandlers::handle_inbound(&mut state, raw, now()).unwrap();
        assert!(matches!(
            &outcome.events[..],
            [AppEvent::Diagnostic(Diagnostic::RejectedInbound { .. })]
        ));
        assert_eq!(state.stats.inbound_rejected, 1);
    }

    #[test]
    fn send_completion_marks_sent_or_failed() {
        let mut state = online_session();
        let (first, _) = submit(&mut state, "a");
        let (second, _) = submit(&mut state, "b");

        let outcome = EngineHandlers::handle_send_completed(
            &mut state,
            SendCompletion {
                client_id: first.client_id().clone(),
                result: Ok(()),
            },
        );
        assert!(matches!(
            &outcome.events[..],
            [AppEvent::DeliveryStatusChanged { update: DeliveryUpdate::Sent, .. }]
        ));

        let outcome = EngineHandlers::handle_send_completed(
            &mut state,
            SendCompletion {
                client_id: second.client_id().clone(),
                result: Err(TransportError::NotConnected),
            },
        );
        assert!(matches!(
            &outcome.events[..],
            [AppEvent::DeliveryStatusChanged {
                update: DeliveryUpdate::Failed(DeliveryFailure::Transport(TransportError::NotConnected)),
                ..
            }]
        ));
        assert!(state.outgoing.can_resubmit(second.client_id()));
    }

    #[test]
    fn drop_fails_in_flight_and_schedules_retry() {
        let mut state = online_session();
        submit(&mut state, "a");
        submit(&mut state, "b");

        let outcome = EngineHandlers::handle_transport_status(
            &mut state,
            TransportStatus::dropped("reset"),
            now(),
        );

        let lost = outcome
            .events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    AppEvent::DeliveryStatusChanged {
                        update: DeliveryUpdate::Failed(DeliveryFailure::ConnectionLost),
                        ..
                    }
                )
            })
            .count();
        assert_eq!(lost, 2);
        assert!(outcome
            .events
            .iter()
            .any(|event| matches!(event, AppEvent::Diagnostic(Diagnostic::ReconnectScheduled { attempt: 1, .. }))));
        assert_eq!(outcome.effects, vec![Effect::CloseTransport]);
        assert_eq!(state.supervisor.state(), ConnectionState::Reconnecting);
    }
}
