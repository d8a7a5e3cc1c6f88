//! Test utilities for deterministic testing of the delivery pipelines
//!
//! Provides a controllable clock and fixtures for building inbound
//! activities and echoes.

#![allow(dead_code)]

use courier_core::{
    Activity, ActivityBody, ActivityId, ClientId, DeliveryLedger, LedgerConfig, Participant,
    RawActivity, TimeSource, Timestamp,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
///
/// Tests advance time explicitly, so timeout behaviour is exact and fast.
#[derive(Debug, Clone)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Create a new mock time source starting at time 0
    pub fn new() -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a new mock time source starting at a specific time
    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    /// Advance time by the specified number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the time to a specific value
    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl Default for MockTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

/// Create a ledger large enough that eviction never interferes
pub fn create_test_ledger() -> DeliveryLedger {
    DeliveryLedger::new(LedgerConfig {
        delivered_capacity: 10_000,
        confirmed_capacity: 1_000,
    })
}

/// Create a validated inbound bot message
pub fn inbound(id: &str, reply_to: Option<&str>) -> Activity {
    Activity {
        id: Some(ActivityId::new(id)),
        client_id: None,
        body: ActivityBody::Message {
            text: format!("message {id}"),
        },
        sender: Participant::bot("bot").with_name("Helper"),
        created_at: Timestamp::new(0),
        reply_to_id: reply_to.map(ActivityId::new),
        delivery_status: None,
    }
}

/// Build the service's echo of an outgoing activity
pub fn echo_of(outgoing: &Activity, server_id: &str) -> Activity {
    let mut echo = outgoing.clone();
    echo.id = Some(ActivityId::new(server_id));
    echo.delivery_status = None;
    echo
}

/// Build a raw inbound message as the service would send it
pub fn raw_message(id: &str, text: &str, client_id: Option<&ClientId>) -> RawActivity {
    let json = serde_json::json!({
        "id": id,
        "type": "message",
        "text": text,
        "from": { "id": "bot", "role": "bot" },
        "timestamp": 1_000,
        "channelData": { "clientId": client_id.map(|c| c.as_str().to_string()) },
    });
    serde_json::from_value(json).expect("valid raw activity")
}
