//! Delivery ledger
//!
//! Session-scoped bookkeeping shared by the outgoing and incoming pipelines:
//! unresolved sends keyed by [`ClientId`], a bounded FIFO set of delivered
//! activity ids used for duplicate suppression, and a bounded table of
//! confirmed client ids used to detect echo collisions.

use crate::activity::{Activity, DeliveryStatus};
use crate::config::LedgerConfig;
use crate::types::{ActivityId, ClientId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

// ----------------------------------------------------------------------------
// Pending Send
// ----------------------------------------------------------------------------

/// An outgoing activity awaiting its echo
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    pub client_id: ClientId,
    pub submitted_at: Timestamp,
    /// 1 for a first submission, incremented on each resubmission
    pub attempt: u32,
    /// Echo deadline; `None` while held in the offline queue
    pub deadline: Option<Timestamp>,
    /// `Pending` or `Sent`
    pub status: DeliveryStatus,
    /// The stamped activity
    pub activity: Activity,
}

impl PendingSend {
    /// Whether the send has been handed to the transport
    pub fn is_in_flight(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the echo deadline has elapsed
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.deadline.map_or(false, |deadline| now >= deadline)
    }
}

// ----------------------------------------------------------------------------
// Ledger Statistics
// ----------------------------------------------------------------------------

/// Statistics for ledger activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Ids newly marked delivered
    pub delivered: u64,
    /// Ids rejected because they were already delivered
    pub duplicates_rejected: u64,
    /// Ids evicted from the delivered set
    pub evictions: u64,
    /// Sends recorded as pending
    pub pending_recorded: u64,
    /// Sends resolved (confirmed, failed or cancelled)
    pub pending_resolved: u64,
}

impl LedgerStats {
    /// Fraction of marked ids that were duplicates
    pub fn duplicate_rate(&self) -> f64 {
        let total = self.delivered + self.duplicates_rejected;
        if total == 0 {
            0.0
        } else {
            self.duplicates_rejected as f64 / total as f64
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery Ledger
// ----------------------------------------------------------------------------

/// Tracks pending sends and delivered activity ids for one session
#[derive(Debug)]
pub struct DeliveryLedger {
    config: LedgerConfig,
    pending: HashMap<ClientId, PendingSend>,
    delivered: HashSet<ActivityId>,
    /// Insertion order of `delivered`, oldest first
    delivered_order: VecDeque<ActivityId>,
    /// Ids protected from eviction, with a reference count
    pins: HashMap<ActivityId, usize>,
    confirmed: HashMap<ClientId, ActivityId>,
    confirmed_order: VecDeque<ClientId>,
    stats: LedgerStats,
}

impl DeliveryLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            delivered: HashSet::new(),
            delivered_order: VecDeque::new(),
            pins: HashMap::new(),
            confirmed: HashMap::new(),
            confirmed_order: VecDeque::new(),
            stats: LedgerStats::default(),
        }
    }

    // ------------------------------------------------------------------------
    // Delivered set
    // ------------------------------------------------------------------------

    /// Mark an id as delivered
    /// Returns false if the id was already delivered
    pub fn mark_delivered(&mut self, id: ActivityId) -> bool {
        if self.delivered.contains(&id) {
            self.stats.duplicates_rejected += 1;
            return false;
        }

        self.delivered.insert(id.clone());
        self.delivered_order.push_back(id);
        self.stats.delivered += 1;
        self.evict_overflow();
        true
    }

    /// Whether an id has been delivered (and not yet evicted)
    pub fn is_delivered(&self, id: &ActivityId) -> bool {
        self.delivered.contains(id)
    }

    /// Number of delivered ids currently remembered
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// Protect an id from eviction until a matching `unpin`
    pub fn pin(&mut self, id: &ActivityId) {
        *self.pins.entry(id.clone()).or_insert(0) += 1;
    }

    pub fn unpin(&mut self, id: &ActivityId) {
        if let Some(count) = self.pins.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(id);
            }
        }
    }

    pub fn is_pinned(&self, id: &ActivityId) -> bool {
        self.pins.contains_key(id)
    }

    /// Evict oldest unpinned ids until the set fits its capacity.
    /// If every remembered id is pinned the set temporarily exceeds capacity.
    fn evict_overflow(&mut self) {
        let mut budget = self.delivered_order.len();
        while self.delivered_order.len() > self.config.delivered_capacity && budget > 0 {
            budget -= 1;
            let Some(oldest) = self.delivered_order.pop_front() else {
                break;
            };
            if self.pins.contains_key(&oldest) {
                self.delivered_order.push_back(oldest);
                continue;
            }
            self.delivered.remove(&oldest);
            self.stats.evictions += 1;
        }
    }

    // ------------------------------------------------------------------------
    // Pending sends
    // ------------------------------------------------------------------------

    /// Record a new pending send
    pub fn record_pending(&mut self, pending: PendingSend) {
        debug_assert!(
            !self.pending.contains_key(&pending.client_id),
            "client id {} recorded twice",
            pending.client_id
        );
        self.stats.pending_recorded += 1;
        self.pending.insert(pending.client_id.clone(), pending);
    }

    /// Remove and return a pending send
    pub fn resolve_pending(&mut self, client_id: &ClientId) -> Option<PendingSend> {
        let resolved = self.pending.remove(client_id);
        if resolved.is_some() {
            self.stats.pending_resolved += 1;
        }
        resolved
    }

    pub fn pending(&self, client_id: &ClientId) -> Option<&PendingSend> {
        self.pending.get(client_id)
    }

    pub fn pending_mut(&mut self, client_id: &ClientId) -> Option<&mut PendingSend> {
        self.pending.get_mut(client_id)
    }

    pub fn is_pending(&self, client_id: &ClientId) -> bool {
        self.pending.contains_key(client_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Iterate over all unresolved sends
    pub fn pending_sends(&self) -> impl Iterator<Item = &PendingSend> {
        self.pending.values()
    }

    /// Remove every pending send matching the predicate, oldest submission first
    pub fn resolve_pending_where<F>(&mut self, mut predicate: F) -> Vec<PendingSend>
    where
        F: FnMut(&PendingSend) -> bool,
    {
        let mut client_ids: Vec<(Timestamp, ClientId)> = self
            .pending
            .values()
            .filter(|pending| predicate(pending))
            .map(|pending| (pending.submitted_at, pending.client_id.clone()))
            .collect();
        client_ids.sort();

        client_ids
            .into_iter()
            .filter_map(|(_, client_id)| self.resolve_pending(&client_id))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Confirmed client ids
    // ------------------------------------------------------------------------

    /// Remember the server id a client id was confirmed with
    pub fn record_confirmed(&mut self, client_id: ClientId, id: ActivityId) {
        if self.config.confirmed_capacity == 0 {
            return;
        }
        if self.confirmed.insert(client_id.clone(), id).is_none() {
            self.confirmed_order.push_back(client_id);
        }
        while self.confirmed_order.len() > self.config.confirmed_capacity {
            if let Some(oldest) = self.confirmed_order.pop_front() {
                self.confirmed.remove(&oldest);
            }
        }
    }

    /// Server id a client id was confirmed with, if still remembered
    pub fn confirmed_id(&self, client_id: &ClientId) -> Option<&ActivityId> {
        self.confirmed.get(client_id)
    }

    pub fn stats(&self) -> &LedgerStats {
        &self.stats
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::DraftActivity;
    use crate::types::Participant;

    fn ledger(capacity: usize) -> DeliveryLedger {
        DeliveryLedger::new(LedgerConfig {
            delivered_capacity: capacity,
            confirmed_capacity: 2,
        })
    }

    fn pending(client_id: &str, submitted_at: u64, in_flight: bool) -> PendingSend {
        let client_id = ClientId::new(client_id);
        let now = Timestamp::new(submitted_at);
        PendingSend {
            client_id: client_id.clone(),
            submitted_at: now,
            attempt: 1,
            deadline: in_flight.then(|| now + 5_000u64),
            status: DeliveryStatus::Pending,
            activity: DraftActivity::message("hi").stamp(client_id, Participant::user("me"), now),
        }
    }

    #[test]
    fn marks_each_id_once() {
        let mut ledger = ledger(8);
        assert!(ledger.mark_delivered(ActivityId::new("a")));
        assert!(!ledger.mark_delivered(ActivityId::new("a")));
        assert!(ledger.is_delivered(&ActivityId::new("a")));
        assert_eq!(ledger.stats().duplicates_rejected, 1);
        assert_eq!(ledger.stats().duplicate_rate(), 0.5);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut ledger = ledger(2);
        for id in ["a", "b", "c"] {
            ledger.mark_delivered(ActivityId::new(id));
        }
        assert!(!ledger.is_delivered(&ActivityId::new("a")));
        assert!(ledger.is_delivered(&ActivityId::new("b")));
        assert!(ledger.is_delivered(&ActivityId::new("c")));
        assert_eq!(ledger.stats().evictions, 1);
    }

    #[test]
    fn pinned_ids_survive_eviction() {
        let mut ledger = ledger(2);
        let a = ActivityId::new("a");
        ledger.mark_delivered(a.clone());
        ledger.pin(&a);
        ledger.mark_delivered(ActivityId::new("b"));
        ledger.mark_delivered(ActivityId::new("c"));

        assert!(ledger.is_delivered(&a));
        assert!(!ledger.is_delivered(&ActivityId::new("b")));

        ledger.unpin(&a);
        assert!(!ledger.is_pinned(&a));
        ledger.mark_delivered(ActivityId::new("d"));
        assert!(!ledger.is_delivered(&a));
    }

    #[test]
    fn fully_pinned_set_exceeds_capacity_instead_of_looping() {
        let mut ledger = ledger(1);
        let a = ActivityId::new("a");
        let b = ActivityId::new("b");
        ledger.pin(&a);
        ledger.pin(&b);
        ledger.mark_delivered(a.clone());
        ledger.mark_delivered(b.clone());
        assert_eq!(ledger.delivered_count(), 2);
    }

    #[test]
    fn pending_lifecycle() {
        let mut ledger = ledger(8);
        ledger.record_pending(pending("c-1", 10, true));
        assert!(ledger.is_pending(&ClientId::new("c-1")));
        assert_eq!(ledger.pending_count(), 1);

        let resolved = ledger.resolve_pending(&ClientId::new("c-1")).unwrap();
        assert_eq!(resolved.attempt, 1);
        assert!(ledger.resolve_pending(&ClientId::new("c-1")).is_none());
        assert_eq!(ledger.stats().pending_resolved, 1);
    }

    #[test]
    fn resolves_matching_pending_in_submission_order() {
        let mut ledger = ledger(8);
        ledger.record_pending(pending("late", 30, true));
        ledger.record_pending(pending("queued", 5, false));
        ledger.record_pending(pending("early", 10, true));

        let in_flight = ledger.resolve_pending_where(PendingSend::is_in_flight);
        let ids: Vec<_> = in_flight.iter().map(|p| p.client_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(ledger.pending_count(), 1);
    }

    #[test]
    fn expiry_uses_deadline() {
        let send = pending("c-1", 0, true);
        assert!(!send.is_expired(Timestamp::new(4_999)));
        assert!(send.is_expired(Timestamp::new(5_000)));
        assert!(!pending("c-2", 0, false).is_expired(Timestamp::new(u64::MAX)));
    }

    #[test]
    fn confirmed_table_is_bounded() {
        let mut ledger = ledger(8);
        ledger.record_confirmed(ClientId::new("c-1"), ActivityId::new("a-1"));
        ledger.record_confirmed(ClientId::new("c-2"), ActivityId::new("a-2"));
        ledger.record_confirmed(ClientId::new("c-3"), ActivityId::new("a-3"));

        assert_eq!(ledger.confirmed_id(&ClientId::new("c-1")), None);
        assert_eq!(
            ledger.confirmed_id(&ClientId::new("c-3")),
            Some(&ActivityId::new("a-3"))
        );
    }
}
