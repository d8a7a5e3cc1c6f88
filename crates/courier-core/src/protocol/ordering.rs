//! Incoming ordering pipeline
//!
//! Suppresses duplicate inbound activities and holds replies back until the
//! activity they answer has been delivered. A held reply is released as soon
//! as its parent is delivered, or unordered once its deadline passes, so a
//! missing parent never blocks delivery indefinitely.

use crate::activity::Activity;
use crate::config::OrderingConfig;
use crate::errors::{IngestError, Result};
use crate::ledger::DeliveryLedger;
use crate::types::{ActivityId, Timestamp};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Ordering Types
// ----------------------------------------------------------------------------

/// An inbound activity waiting for the activity it replies to
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredInbound {
    pub id: ActivityId,
    pub activity: Activity,
    pub awaited_id: ActivityId,
    pub deadline: Timestamp,
}

/// Outcome of feeding an activity through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum OrderingEvent {
    /// Ready for consumers, in delivery order
    Delivered(Activity),
    /// Dropped because the id was already delivered or deferred
    Duplicate { id: ActivityId },
    /// Held until `awaited_id` is delivered
    Deferred { id: ActivityId, awaited_id: ActivityId },
    /// Released without its parent; the `Delivered` event follows
    DependencyTimeout { id: ActivityId, awaited_id: ActivityId },
}

/// Counters for inbound ordering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingStats {
    pub delivered: u64,
    pub duplicates: u64,
    pub deferred: u64,
    pub released_in_order: u64,
    pub dependency_timeouts: u64,
    pub released_on_disconnect: u64,
}

// ----------------------------------------------------------------------------
// Ordering Pipeline
// ----------------------------------------------------------------------------

/// Orders inbound activities by their reply dependencies
#[derive(Debug)]
pub struct OrderingPipeline {
    config: OrderingConfig,
    /// Deferred items by (deadline, sequence) so the earliest expires first
    deferred: BTreeMap<(Timestamp, u64), DeferredInbound>,
    /// Sequence number to deadline, for lookups by sequence
    deadlines: HashMap<u64, Timestamp>,
    /// Deferred activity id to its sequence number
    deferred_ids: HashMap<ActivityId, u64>,
    /// Awaited id to the sequence numbers waiting on it, in arrival order
    waiters: HashMap<ActivityId, SmallVec<[u64; 4]>>,
    next_seq: u64,
    stats: OrderingStats,
}

impl OrderingPipeline {
    pub fn new(config: OrderingConfig) -> Self {
        Self {
            config,
            deferred: BTreeMap::new(),
            deadlines: HashMap::new(),
            deferred_ids: HashMap::new(),
            waiters: HashMap::new(),
            next_seq: 0,
            stats: OrderingStats::default(),
        }
    }

    /// Feed one inbound activity through duplicate and dependency checks
    pub fn ingest(
        &mut self,
        ledger: &mut DeliveryLedger,
        activity: Activity,
        now: Timestamp,
    ) -> Result<Vec<OrderingEvent>> {
        let id = activity
            .id
            .clone()
            .ok_or(IngestError::MissingField { field: "id" })?;
        let mut events = Vec::new();

        if ledger.is_delivered(&id) || self.deferred_ids.contains_key(&id) {
            self.stats.duplicates += 1;
            debug!(id = %id, "Dropped duplicate activity");
            events.push(OrderingEvent::Duplicate { id });
            return Ok(events);
        }

        if let Some(awaited_id) = self.unmet_dependency(ledger, &activity, &id) {
            if self.deferred.len() >= self.config.max_deferred {
                self.release_earliest(ledger, &mut events);
            }
            self.defer(ledger, activity, id.clone(), awaited_id.clone(), now);
            events.push(OrderingEvent::Deferred { id, awaited_id });
            return Ok(events);
        }

        self.deliver(ledger, activity, id, &mut events);
        Ok(events)
    }

    /// Release every deferred item whose deadline has passed
    pub fn expire(&mut self, ledger: &mut DeliveryLedger, now: Timestamp) -> Vec<OrderingEvent> {
        let mut events = Vec::new();
        while let Some(&(deadline, seq)) = self.deferred.keys().next() {
            if deadline > now {
                break;
            }
            self.release_timed_out(ledger, seq, &mut events);
        }
        events
    }

    /// Release every deferred item immediately, without ordering guarantees
    pub fn release_all(&mut self, ledger: &mut DeliveryLedger) -> Vec<OrderingEvent> {
        let mut seqs: Vec<u64> = self.deadlines.keys().copied().collect();
        seqs.sort_unstable();

        let mut events = Vec::new();
        for seq in seqs {
            // Earlier releases may already have cascaded into this one
            if let Some(item) = self.take_deferred(ledger, seq) {
                self.stats.released_on_disconnect += 1;
                self.deliver(ledger, item.activity, item.id, &mut events);
            }
        }
        if !events.is_empty() {
            debug!(released = events.len(), "Released deferred activities");
        }
        events
    }

    /// Earliest deferral deadline
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deferred.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Whether an activity id is currently held back
    pub fn is_deferred(&self, id: &ActivityId) -> bool {
        self.deferred_ids.contains_key(id)
    }

    pub fn stats(&self) -> &OrderingStats {
        &self.stats
    }

    fn unmet_dependency(
        &self,
        ledger: &DeliveryLedger,
        activity: &Activity,
        id: &ActivityId,
    ) -> Option<ActivityId> {
        let parent = activity.reply_to_id.as_ref()?;
        if parent == id || ledger.is_delivered(parent) {
            return None;
        }
        Some(parent.clone())
    }

    fn defer(
        &mut self,
        ledger: &mut DeliveryLedger,
        activity: Activity,
        id: ActivityId,
        awaited_id: ActivityId,
        now: Timestamp,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let deadline = now + self.config.dependency_timeout;

        debug!(id = %id, awaited = %awaited_id, "Deferring reply until parent is delivered");
        ledger.pin(&awaited_id);
        self.waiters.entry(awaited_id.clone()).or_default().push(seq);
        self.deferred_ids.insert(id.clone(), seq);
        self.deadlines.insert(seq, deadline);
        self.deferred.insert(
            (deadline, seq),
            DeferredInbound {
                id,
                activity,
                awaited_id,
                deadline,
            },
        );
        self.stats.deferred += 1;
    }

    fn take_deferred(&mut self, ledger: &mut DeliveryLedger, seq: u64) -> Option<DeferredInbound> {
        let deadline = self.deadlines.remove(&seq)?;
        let item = self.deferred.remove(&(deadline, seq))?;

        self.deferred_ids.remove(&item.id);
        if let Some(waiting) = self.waiters.get_mut(&item.awaited_id) {
            waiting.retain(|waiting_seq| *waiting_seq != seq);
            if waiting.is_empty() {
                self.waiters.remove(&item.awaited_id);
            }
        }
        ledger.unpin(&item.awaited_id);
        Some(item)
    }

    fn release_timed_out(
        &mut self,
        ledger: &mut DeliveryLedger,
        seq: u64,
        events: &mut Vec<OrderingEvent>,
    ) {
        let Some(item) = self.take_deferred(ledger, seq) else {
            return;
        };
        let id = item.id;
        warn!(
            id = %id,
            awaited = %item.awaited_id,
            "Parent activity never arrived; delivering reply out of order"
        );
        self.stats.dependency_timeouts += 1;
        events.push(OrderingEvent::DependencyTimeout {
            id: id.clone(),
            awaited_id: item.awaited_id,
        });
        self.deliver(ledger, item.activity, id, events);
    }

    fn release_earliest(&mut self, ledger: &mut DeliveryLedger, events: &mut Vec<OrderingEvent>) {
        if let Some(&(_, seq)) = self.deferred.keys().next() {
            warn!(limit = self.config.max_deferred, "Deferral limit reached");
            self.release_timed_out(ledger, seq, events);
        }
    }

    /// Deliver an activity and, breadth-first, every reply waiting on it
    fn deliver(
        &mut self,
        ledger: &mut DeliveryLedger,
        activity: Activity,
        id: ActivityId,
        events: &mut Vec<OrderingEvent>,
    ) {
        let mut ready = VecDeque::from([(activity, id)]);
        let mut first = true;

        while let Some((activity, id)) = ready.pop_front() {
            if !ledger.mark_delivered(id.clone()) {
                self.stats.duplicates += 1;
                events.push(OrderingEvent::Duplicate { id });
                continue;
            }
            if !first {
                self.stats.released_in_order += 1;
            }
            first = false;
            self.stats.delivered += 1;
            events.push(OrderingEvent::Delivered(activity));

            let Some(waiting) = self.waiters.remove(&id) else {
                continue;
            };
            for seq in waiting {
                if let Some(item) = self.take_deferred(ledger, seq) {
                    ready.push_back((item.activity, item.id));
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityBody;
    use crate::config::LedgerConfig;
    use crate::types::Participant;
    use core::time::Duration;

    fn setup() -> (OrderingPipeline, DeliveryLedger) {
        (
            OrderingPipeline::new(OrderingConfig {
                dependency_timeout: Duration::from_secs(5),
                max_deferred: 3,
            }),
            DeliveryLedger::new(LedgerConfig::default()),
        )
    }

    fn activity(id: &str, reply_to: Option<&str>) -> Activity {
        Activity {
            id: Some(ActivityId::new(id)),
            client_id: None,
            body: ActivityBody::Message {
                text: format!("text of {id}"),
            },
            sender: Participant::bot("bot"),
            created_at: Timestamp::new(0),
            reply_to_id: reply_to.map(ActivityId::new),
            delivery_status: None,
        }
    }

    fn delivered_ids(events: &[OrderingEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                OrderingEvent::Delivered(activity) => activity.id.as_ref().map(|id| id.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn delivers_independent_activity_immediately() {
        let (mut pipeline, mut ledger) = setup();
        let events = pipeline
            .ingest(&mut ledger, activity("a", None), Timestamp::new(0))
            .unwrap();
        assert_eq!(delivered_ids(&events), vec!["a"]);
        assert!(ledger.is_delivered(&ActivityId::new("a")));
    }

    #[test]
    fn drops_duplicates() {
        let (mut pipeline, mut ledger) = setup();
        pipeline.ingest(&mut ledger, activity("a", None), Timestamp::new(0)).unwrap();
        let events = pipeline
            .ingest(&mut ledger, activity("a", None), Timestamp::new(1))
            .unwrap();
        assert_eq!(
            events,
            vec![OrderingEvent::Duplicate {
                id: ActivityId::new("a")
            }]
        );
    }

    #[test]
    fn defers_reply_until_parent_arrives() {
        let (mut pipeline, mut ledger) = setup();
        let events = pipeline
            .ingest(&mut ledger, activity("b", Some("a")), Timestamp::new(0))
            .unwrap();
        assert_eq!(
            events,
            vec![OrderingEvent::Deferred {
                id: ActivityId::new("b"),
                awaited_id: ActivityId::new("a"),
            }]
        );
        assert!(ledger.is_pinned(&ActivityId::new("a")));
        assert_eq!(pipeline.next_deadline(), Some(Timestamp::new(5_000)));

        let events = pipeline
            .ingest(&mut ledger, activity("a", None), Timestamp::new(1_000))
            .unwrap();
        assert_eq!(delivered_ids(&events), vec!["a", "b"]);
        assert_eq!(pipeline.deferred_count(), 0);
        assert!(!ledger.is_pinned(&ActivityId::new("a")));
        assert_eq!(pipeline.stats().released_in_order, 1);
    }

    #[test]
    fn releases_reply_on_timeout_with_warning() {
        let (mut pipeline, mut ledger) = setup();
        pipeline
            .ingest(&mut ledger, activity("b", Some("a")), Timestamp::new(0))
            .unwrap();

        assert!(pipeline.expire(&mut ledger, Timestamp::new(4_999)).is_empty());
        let events = pipeline.expire(&mut ledger, Timestamp::new(5_000));
        assert_eq!(
            events[0],
            OrderingEvent::DependencyTimeout {
                id: ActivityId::new("b"),
                awaited_id: ActivityId::new("a"),
            }
        );
        assert_eq!(delivered_ids(&events), vec!["b"]);
        assert_eq!(pipeline.next_deadline(), None);
    }

    #[test]
    fn cascades_through_chains() {
        let (mut pipeline, mut ledger) = setup();
        let now = Timestamp::new(0);
        pipeline.ingest(&mut ledger, activity("c", Some("b")), now).unwrap();
        pipeline.ingest(&mut ledger, activity("b", Some("a")), now).unwrap();
        pipeline.ingest(&mut ledger, activity("b2", Some("a")), now).unwrap();

        let events = pipeline.ingest(&mut ledger, activity("a", None), now).unwrap();
        assert_eq!(delivered_ids(&events), vec!["a", "b", "b2", "c"]);
    }

    #[test]
    fn deferred_id_arriving_again_is_duplicate() {
        let (mut pipeline, mut ledger) = setup();
        let now = Timestamp::new(0);
        pipeline.ingest(&mut ledger, activity("b", Some("a")), now).unwrap();
        let events = pipeline.ingest(&mut ledger, activity("b", Some("a")), now).unwrap();
        assert!(matches!(events[0], OrderingEvent::Duplicate { .. }));

        let events = pipeline.ingest(&mut ledger, activity("a", None), now).unwrap();
        assert_eq!(delivered_ids(&events), vec!["a", "b"]);
    }

    #[test]
    fn independent_chains_do_not_block_each_other() {
        let (mut pipeline, mut ledger) = setup();
        let now = Timestamp::new(0);
        pipeline.ingest(&mut ledger, activity("y", Some("x")), now).unwrap();
        let events = pipeline.ingest(&mut ledger, activity("z", None), now).unwrap();
        assert_eq!(delivered_ids(&events), vec!["z"]);
        assert!(pipeline.is_deferred(&ActivityId::new("y")));
    }

    #[test]
    fn release_all_empties_the_pipeline() {
        let (mut pipeline, mut ledger) = setup();
        let now = Timestamp::new(0);
        pipeline.ingest(&mut ledger, activity("b", Some("a")), now).unwrap();
        pipeline.ingest(&mut ledger, activity("d", Some("c")), now).unwrap();

        let events = pipeline.release_all(&mut ledger);
        assert_eq!(delivered_ids(&events), vec!["b", "d"]);
        assert_eq!(pipeline.deferred_count(), 0);
        assert!(!ledger.is_pinned(&ActivityId::new("a")));
    }

    #[test]
    fn deferral_limit_releases_the_oldest() {
        let (mut pipeline, mut ledger) = setup();
        for (n, id) in ["r1", "r2", "r3"].iter().enumerate() {
            pipeline
                .ingest(&mut ledger, activity(id, Some("missing")), Timestamp::new(n as u64))
                .unwrap();
        }
        let events = pipeline
            .ingest(&mut ledger, activity("r4", Some("missing")), Timestamp::new(10))
            .unwrap();
        assert_eq!(delivered_ids(&events), vec!["r1"]);
        assert_eq!(pipeline.deferred_count(), 3);
    }

    #[test]
    fn self_reply_is_not_a_dependency() {
        let (mut pipeline, mut ledger) = setup();
        let events = pipeline
            .ingest(&mut ledger, activity("a", Some("a")), Timestamp::new(0))
            .unwrap();
        assert_eq!(delivered_ids(&events), vec!["a"]);
    }

    #[test]
    fn rejects_activity_without_id() {
        let (mut pipeline, mut ledger) = setup();
        let mut anonymous = activity("a", None);
        anonymous.id = None;
        assert!(pipeline.ingest(&mut ledger, anonymous, Timestamp::new(0)).is_err());
    }
}
