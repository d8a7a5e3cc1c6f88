//! Outgoing delivery pipeline
//!
//! Assigns correlation identities to submitted drafts, tracks them in the
//! [`DeliveryLedger`] and reconciles the service's echo-back. The pipeline
//! performs no I/O: callers pass the current time and connection state in and
//! carry out the returned transmissions and status changes.

use crate::activity::{Activity, DeliveryStatus, DraftActivity, OutboundPayload};
use crate::config::{DeliveryConfig, OfflinePolicy};
use crate::errors::{CourierError, DeliveryFailure, Result};
use crate::ledger::{DeliveryLedger, PendingSend};
use crate::protocol::connection_state::ConnectionState;
use crate::types::{ActivityId, ClientId, Participant, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Status Updates
// ----------------------------------------------------------------------------

/// A delivery status transition reported to the submitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeliveryUpdate {
    Pending,
    Sent,
    /// Terminal: the echo arrived; carries the activity with its server id
    Confirmed(Activity),
    /// Terminal
    Failed(DeliveryFailure),
}

impl DeliveryUpdate {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryUpdate::Pending => DeliveryStatus::Pending,
            DeliveryUpdate::Sent => DeliveryStatus::Sent,
            DeliveryUpdate::Confirmed(_) => DeliveryStatus::Confirmed,
            DeliveryUpdate::Failed(_) => DeliveryStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// A status update for one submission
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub client_id: ClientId,
    pub update: DeliveryUpdate,
}

impl StatusChange {
    fn new(client_id: ClientId, update: DeliveryUpdate) -> Self {
        Self { client_id, update }
    }
}

// ----------------------------------------------------------------------------
// Submission Results
// ----------------------------------------------------------------------------

/// What the caller must do with an accepted submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitAction {
    /// Hand the payload to the transport now
    Transmit(OutboundPayload),
    /// Held until the connection is online
    Queued,
}

/// An accepted submission
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub client_id: ClientId,
    pub attempt: u32,
    /// The stamped activity in `Pending` status
    pub activity: Activity,
    pub action: SubmitAction,
}

/// How an inbound item carrying a client id relates to local sends
#[derive(Debug, Clone, PartialEq)]
pub enum EchoMatch {
    /// Resolved a pending send; the activity now carries the server id
    Confirmed {
        client_id: ClientId,
        activity: Activity,
    },
    /// Repeat of an echo already confirmed with the same id
    Duplicate { client_id: ClientId, id: ActivityId },
    /// A client id already confirmed under a different server id
    Collision {
        client_id: ClientId,
        confirmed_id: ActivityId,
        incoming_id: ActivityId,
    },
    /// Echo for a send that already failed
    Late { client_id: ClientId },
    /// Not an echo of anything sent in this session
    Unmatched,
}

// ----------------------------------------------------------------------------
// Pipeline Statistics
// ----------------------------------------------------------------------------

/// Counters for outgoing delivery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingStats {
    pub submitted: u64,
    pub resubmitted: u64,
    pub queued: u64,
    pub transmitted: u64,
    pub sent: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub collisions: u64,
    pub late_echoes: u64,
}

#[derive(Debug, Clone)]
struct FailedDraft {
    draft: DraftActivity,
    attempt: u32,
}

// ----------------------------------------------------------------------------
// Outgoing Pipeline
// ----------------------------------------------------------------------------

/// Tracks outgoing activities from submission to a terminal status
#[derive(Debug)]
pub struct OutgoingPipeline {
    config: DeliveryConfig,
    local: Participant,
    offline_queue: VecDeque<ClientId>,
    failed: HashMap<ClientId, FailedDraft>,
    failed_order: VecDeque<ClientId>,
    stats: OutgoingStats,
}

impl OutgoingPipeline {
    /// Create a pipeline that stamps submissions with `local` as sender
    pub fn new(config: DeliveryConfig, local: Participant) -> Self {
        Self {
            config,
            local,
            offline_queue: VecDeque::new(),
            failed: HashMap::new(),
            failed_order: VecDeque::new(),
            stats: OutgoingStats::default(),
        }
    }

    pub fn local_participant(&self) -> &Participant {
        &self.local
    }

    /// Accept a draft for delivery
    pub fn submit(
        &mut self,
        ledger: &mut DeliveryLedger,
        draft: DraftActivity,
        state: ConnectionState,
        now: Timestamp,
    ) -> Result<Submission> {
        self.accept(ledger, draft, 1, state, now)
    }

    /// Submit a failed draft again under a new client id
    pub fn resubmit(
        &mut self,
        ledger: &mut DeliveryLedger,
        failed_client_id: &ClientId,
        state: ConnectionState,
        now: Timestamp,
    ) -> Result<Submission> {
        let failed = self
            .take_failed(failed_client_id)
            .ok_or_else(|| CourierError::unknown_submission(failed_client_id.clone()))?;

        match self.accept(ledger, failed.draft.clone(), failed.attempt + 1, state, now) {
            Ok(submission) => {
                self.stats.resubmitted += 1;
                debug!(
                    previous = %failed_client_id,
                    client_id = %submission.client_id,
                    attempt = submission.attempt,
                    "Resubmitted failed activity"
                );
                Ok(submission)
            }
            Err(e) => {
                self.retain_failed(failed_client_id.clone(), failed);
                Err(e)
            }
        }
    }

    fn accept(
        &mut self,
        ledger: &mut DeliveryLedger,
        draft: DraftActivity,
        attempt: u32,
        state: ConnectionState,
        now: Timestamp,
    ) -> Result<Submission> {
        let online = state.can_send();
        if !online {
            match self.config.offline_policy {
                OfflinePolicy::Reject => return Err(CourierError::NotOnline { state }),
                OfflinePolicy::QueueUntilOnline
                    if self.offline_queue.len() >= self.config.max_offline_queue =>
                {
                    return Err(CourierError::QueueFull {
                        capacity: self.config.max_offline_queue,
                    })
                }
                OfflinePolicy::QueueUntilOnline => {}
            }
        }

        let client_id = ClientId::generate();
        let activity = draft.stamp(client_id.clone(), self.local.clone(), now);
        let deadline = online.then(|| now + self.config.echo_timeout);

        ledger.record_pending(PendingSend {
            client_id: client_id.clone(),
            submitted_at: now,
            attempt,
            deadline,
            status: DeliveryStatus::Pending,
            activity: activity.clone(),
        });
        self.stats.submitted += 1;

        let action = if online {
            self.stats.transmitted += 1;
            SubmitAction::Transmit(OutboundPayload::from_activity(client_id.clone(), &activity))
        } else {
            self.stats.queued += 1;
            self.offline_queue.push_back(client_id.clone());
            SubmitAction::Queued
        };

        debug!(
            client_id = %client_id,
            kind = ?activity.kind(),
            queued = !online,
            "Accepted submission"
        );

        Ok(Submission {
            client_id,
            attempt,
            activity,
            action,
        })
    }

    /// The transport accepted a transmission
    pub fn mark_sent(
        &mut self,
        ledger: &mut DeliveryLedger,
        client_id: &ClientId,
    ) -> Option<StatusChange> {
        let pending = ledger.pending_mut(client_id)?;
        if pending.status != DeliveryStatus::Pending {
            return None;
        }
        pending.status = DeliveryStatus::Sent;
        pending.activity.delivery_status = Some(DeliveryStatus::Sent);
        self.stats.sent += 1;
        Some(StatusChange::new(client_id.clone(), DeliveryUpdate::Sent))
    }

    /// The transport rejected a transmission
    pub fn transmit_failed(
        &mut self,
        ledger: &mut DeliveryLedger,
        client_id: &ClientId,
        error: crate::errors::TransportError,
    ) -> Option<StatusChange> {
        let pending = ledger.resolve_pending(client_id)?;
        Some(self.fail(pending, DeliveryFailure::Transport(error)))
    }

    /// Match an inbound item against local sends by its client id
    pub fn match_echo(&mut self, ledger: &mut DeliveryLedger, echo: &Activity) -> EchoMatch {
        let (Some(client_id), Some(id)) = (echo.client_id.clone(), echo.id.clone()) else {
            return EchoMatch::Unmatched;
        };

        if let Some(pending) = ledger.resolve_pending(&client_id) {
            self.offline_queue.retain(|queued| queued != &client_id);
            let mut activity = pending.activity;
            activity.id = Some(id.clone());
            activity.delivery_status = Some(DeliveryStatus::Confirmed);
            ledger.record_confirmed(client_id.clone(), id);
            self.stats.confirmed += 1;
            return EchoMatch::Confirmed {
                client_id,
                activity,
            };
        }

        if let Some(confirmed_id) = ledger.confirmed_id(&client_id) {
            if confirmed_id == &id {
                return EchoMatch::Duplicate { client_id, id };
            }
            self.stats.collisions += 1;
            return EchoMatch::Collision {
                client_id,
                confirmed_id: confirmed_id.clone(),
                incoming_id: id,
            };
        }

        // The service has it after all; resubmitting would duplicate it
        if self.take_failed(&client_id).is_some() {
            self.stats.late_echoes += 1;
            return EchoMatch::Late { client_id };
        }

        EchoMatch::Unmatched
    }

    /// Fail every transmitted send whose echo deadline has elapsed
    pub fn expire(&mut self, ledger: &mut DeliveryLedger, now: Timestamp) -> Vec<StatusChange> {
        let waited_ms = self.config.echo_timeout.as_millis() as u64;
        ledger
            .resolve_pending_where(|pending| pending.is_expired(now))
            .into_iter()
            .map(|pending| {
                warn!(client_id = %pending.client_id, waited_ms, "No echo received");
                self.fail(pending, DeliveryFailure::EchoTimeout { waited_ms })
            })
            .collect()
    }

    /// Fail every transmitted send
    pub fn fail_in_flight(
        &mut self,
        ledger: &mut DeliveryLedger,
        reason: DeliveryFailure,
    ) -> Vec<StatusChange> {
        ledger
            .resolve_pending_where(PendingSend::is_in_flight)
            .into_iter()
            .map(|pending| self.fail(pending, reason.clone()))
            .collect()
    }

    /// Fail every send held in the offline queue
    pub fn fail_queued(
        &mut self,
        ledger: &mut DeliveryLedger,
        reason: DeliveryFailure,
    ) -> Vec<StatusChange> {
        self.offline_queue.clear();
        ledger
            .resolve_pending_where(|pending| !pending.is_in_flight())
            .into_iter()
            .map(|pending| self.fail(pending, reason.clone()))
            .collect()
    }

    /// Arm echo deadlines for queued sends and return them for transmission
    pub fn flush_queue(
        &mut self,
        ledger: &mut DeliveryLedger,
        now: Timestamp,
    ) -> Vec<(ClientId, OutboundPayload)> {
        let deadline = now + self.config.echo_timeout;
        let mut payloads = Vec::with_capacity(self.offline_queue.len());
        while let Some(client_id) = self.offline_queue.pop_front() {
            let Some(pending) = ledger.pending_mut(&client_id) else {
                continue;
            };
            pending.deadline = Some(deadline);
            let payload = OutboundPayload::from_activity(client_id.clone(), &pending.activity);
            self.stats.transmitted += 1;
            payloads.push((client_id, payload));
        }
        payloads
    }

    /// Abandon a send at the caller's request
    pub fn cancel(
        &mut self,
        ledger: &mut DeliveryLedger,
        client_id: &ClientId,
    ) -> Option<StatusChange> {
        let pending = ledger.resolve_pending(client_id)?;
        self.offline_queue.retain(|queued| queued != client_id);
        self.stats.cancelled += 1;
        Some(self.fail(pending, DeliveryFailure::Cancelled))
    }

    /// Earliest echo deadline among transmitted sends
    pub fn next_deadline(&self, ledger: &DeliveryLedger) -> Option<Timestamp> {
        ledger.pending_sends().filter_map(|pending| pending.deadline).min()
    }

    pub fn queued_count(&self) -> usize {
        self.offline_queue.len()
    }

    /// Whether a failed draft is retained for resubmission
    pub fn can_resubmit(&self, client_id: &ClientId) -> bool {
        self.failed.contains_key(client_id)
    }

    pub fn stats(&self) -> &OutgoingStats {
        &self.stats
    }

    fn fail(&mut self, pending: PendingSend, reason: DeliveryFailure) -> StatusChange {
        self.stats.failed += 1;
        debug!(client_id = %pending.client_id, %reason, "Send failed");
        let draft = DraftActivity {
            body: pending.activity.body,
            reply_to_id: pending.activity.reply_to_id,
        };
        self.retain_failed(
            pending.client_id.clone(),
            FailedDraft {
                draft,
                attempt: pending.attempt,
            },
        );
        StatusChange::new(pending.client_id, DeliveryUpdate::Failed(reason))
    }

    fn retain_failed(&mut self, client_id: ClientId, failed: FailedDraft) {
        if self.config.max_failed_retained == 0 {
            return;
        }
        if self.failed.insert(client_id.clone(), failed).is_none() {
            self.failed_order.push_back(client_id);
        }
        while self.failed_order.len() > self.config.max_failed_retained {
            if let Some(oldest) = self.failed_order.pop_front() {
                self.failed.remove(&oldest);
            }
        }
    }

    fn take_failed(&mut self, client_id: &ClientId) -> Option<FailedDraft> {
        let failed = self.failed.remove(client_id)?;
        self.failed_order.retain(|retained| retained != client_id);
        Some(failed)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
