//! Engine State Management
//!
//! Everything the engine task owns for one session.

use std::collections::HashMap;

use courier_core::{
    channel::utils::UpdateSender,
    protocol::{OrderingPipeline, OutgoingPipeline},
    ClientId, CourierConfig, DeliveryLedger, EngineStatus, Participant,
};

use crate::managers::{ConnectionSupervisor, DeliveredHistory};

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Session state owned exclusively by the engine task
#[derive(Debug)]
pub struct SessionState {
    /// Pending sends and delivered ids shared by both pipelines
    pub ledger: DeliveryLedger,
    pub outgoing: OutgoingPipeline,
    pub ordering: OrderingPipeline,
    pub supervisor: ConnectionSupervisor,
    pub history: DeliveredHistory,
    /// Status channels of submissions that have not reached a terminal status
    pub subscribers: HashMap<ClientId, UpdateSender>,
    pub stats: EngineStats,
}

impl SessionState {
    pub fn new(config: &CourierConfig, local: Participant, jitter_seed: Option<u64>) -> Self {
        let supervisor = match jitter_seed {
            Some(seed) => ConnectionSupervisor::with_seed(config.reconnect.clone(), seed),
            None => ConnectionSupervisor::new(config.reconnect.clone()),
        };

        Self {
            ledger: DeliveryLedger::new(config.ledger.clone()),
            outgoing: OutgoingPipeline::new(config.delivery.clone(), local),
            ordering: OrderingPipeline::new(config.ordering.clone()),
            supervisor,
            history: DeliveredHistory::new(&config.history, config.channels.app_event_buffer_size),
            subscribers: HashMap::new(),
            stats: EngineStats::default(),
        }
    }

    /// Snapshot for `EngineHandle::status`
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.supervisor.state(),
            pending_sends: self.ledger.pending_count(),
            queued_sends: self.outgoing.queued_count(),
            deferred_inbound: self.ordering.deferred_count(),
            delivered_ids: self.ledger.delivered_count(),
            reconnect_attempt: self.supervisor.attempt(),
            next_retry_at: self.supervisor.next_deadline(),
            connection: self.supervisor.stats().clone(),
            outgoing: self.outgoing.stats().clone(),
            ordering: self.ordering.stats().clone(),
            ledger: self.ledger.stats().clone(),
        }
    }
}

/// Statistics for the engine task
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub commands_processed: u64,
    pub status_events_processed: u64,
    pub inbound_processed: u64,
    pub inbound_rejected: u64,
    pub completions_processed: u64,
    pub effects_executed: u64,
    pub app_events_emitted: u64,
}
