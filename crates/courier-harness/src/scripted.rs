//! Scripted Transport for Testing
//!
//! A transport whose every move is made by the test: status changes and
//! inbound activities are pushed through a [`TransportController`], sent
//! payloads are captured, and send or connect failures can be injected.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use courier_core::{
    channel::utils::{create_inbound_channel, create_status_channel, InboundSender, StatusSender},
    ActivityId, ChannelConfig, InboundStream, OutboundPayload, RawActivity, StatusStream,
    TransportAdapter, TransportError, TransportStatus,
};
use tokio::sync::Notify;
use tracing::debug;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Behaviour of a [`ScriptedTransport`] when the engine subscribes
#[derive(Debug, Clone)]
pub struct ScriptedConfig {
    /// Report `Ready` as soon as the status stream is subscribed
    pub auto_ready: bool,
    /// Sizes the status and inbound channels
    pub channels: ChannelConfig,
}

impl Default for ScriptedConfig {
    fn default() -> Self {
        Self {
            auto_ready: true,
            channels: ChannelConfig::testing(),
        }
    }
}

impl ScriptedConfig {
    /// Leave every status change to the test
    pub fn manual() -> Self {
        Self {
            auto_ready: false,
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ScriptState {
    auto_ready: bool,
    status_tx: Option<StatusSender>,
    inbound_tx: Option<InboundSender>,
    sent: Vec<OutboundPayload>,
    read_cursor: usize,
    send_failures: VecDeque<TransportError>,
    connect_failures: u32,
    status_subscriptions: u32,
    inbound_subscriptions: u32,
    closes: u32,
}

#[derive(Debug)]
struct Shared {
    channels: ChannelConfig,
    state: Mutex<ScriptState>,
    sent_signal: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ----------------------------------------------------------------------------
// Scripted Transport
// ----------------------------------------------------------------------------

/// Transport half handed to the engine
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    /// Create a transport that reports `Ready` on every subscription
    pub fn new() -> (Self, TransportController) {
        Self::with_config(ScriptedConfig::default())
    }

    /// Create a transport whose status is driven entirely by the controller
    pub fn manual() -> (Self, TransportController) {
        Self::with_config(ScriptedConfig::manual())
    }

    pub fn with_config(config: ScriptedConfig) -> (Self, TransportController) {
        let shared = Arc::new(Shared {
            channels: config.channels,
            state: Mutex::new(ScriptState {
                auto_ready: config.auto_ready,
                ..ScriptState::default()
            }),
            sent_signal: Notify::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            TransportController { shared },
        )
    }
}

#[async_trait]
impl TransportAdapter for ScriptedTransport {
    async fn send(&self, payload: OutboundPayload) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if let Some(error) = state.send_failures.pop_front() {
            debug!(client_id = %payload.client_id, %error, "Scripted send failure");
            return Err(error);
        }
        if state.status_tx.is_none() {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(payload);
        drop(state);
        self.shared.sent_signal.notify_one();
        Ok(())
    }

    async fn status_events(&self) -> Result<StatusStream, TransportError> {
        let (tx, rx) = create_status_channel(&self.shared.channels);
        let mut state = self.shared.lock();
        state.status_subscriptions += 1;

        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            let _ = tx.try_send(TransportStatus::error("scripted connect failure"));
        } else {
            let _ = tx.try_send(TransportStatus::Connecting);
            if state.auto_ready {
                let _ = tx.try_send(TransportStatus::Ready);
            }
        }
        state.status_tx = Some(tx);
        Ok(rx)
    }

    async fn inbound_events(&self) -> Result<InboundStream, TransportError> {
        let (tx, rx) = create_inbound_channel(&self.shared.channels);
        let mut state = self.shared.lock();
        state.inbound_subscriptions += 1;
        state.inbound_tx = Some(tx);
        Ok(rx)
    }

    async fn close(&self) {
        let mut state = self.shared.lock();
        state.closes += 1;
        state.status_tx = None;
        state.inbound_tx = None;
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ----------------------------------------------------------------------------
// Transport Controller
// ----------------------------------------------------------------------------

/// Test half: drives the transport and inspects what the engine sent
#[derive(Debug, Clone)]
pub struct TransportController {
    shared: Arc<Shared>,
}

impl TransportController {
    fn push_status(&self, status: TransportStatus) -> bool {
        let state = self.shared.lock();
        match &state.status_tx {
            Some(tx) => tx.try_send(status).is_ok(),
            None => false,
        }
    }

    /// Report the connection as usable
    pub fn set_ready(&self) -> bool {
        self.push_status(TransportStatus::Ready)
    }

    /// Report the loss of an established connection
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.push_status(TransportStatus::dropped(reason))
    }

    /// Report a transport error
    pub fn fail(&self, reason: &str) -> bool {
        self.push_status(TransportStatus::error(reason))
    }

    /// Deliver a raw activity to the engine
    pub fn push_inbound(&self, activity: RawActivity) -> bool {
        let state = self.shared.lock();
        match &state.inbound_tx {
            Some(tx) => tx.try_send(activity).is_ok(),
            None => false,
        }
    }

    /// Echo a sent payload back under a server id
    pub fn echo(&self, payload: &OutboundPayload, id: &str) -> bool {
        self.push_inbound(echo_of(payload, id))
    }

    /// Make the next `count` status subscriptions fail to connect
    pub fn fail_next_connects(&self, count: u32) {
        self.shared.lock().connect_failures += count;
    }

    /// Make the next send return `error`
    pub fn fail_next_send(&self, error: TransportError) {
        self.shared.lock().send_failures.push_back(error);
    }

    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.shared.lock().auto_ready = auto_ready;
    }

    /// Every payload accepted so far
    pub fn sent(&self) -> Vec<OutboundPayload> {
        self.shared.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.shared.lock().sent.len()
    }

    /// Wait for the next payload not yet returned by this method
    pub async fn next_sent(&self) -> OutboundPayload {
        loop {
            let notified = self.shared.sent_signal.notified();
            {
                let mut state = self.shared.lock();
                if let Some(payload) = state.sent.get(state.read_cursor).cloned() {
                    state.read_cursor += 1;
                    return payload;
                }
            }
            notified.await;
        }
    }

    /// Number of connect attempts the engine has made
    pub fn status_subscriptions(&self) -> u32 {
        self.shared.lock().status_subscriptions
    }

    pub fn inbound_subscriptions(&self) -> u32 {
        self.shared.lock().inbound_subscriptions
    }

    pub fn closes(&self) -> u32 {
        self.shared.lock().closes
    }

    /// Whether the engine currently holds a status subscription
    pub fn is_open(&self) -> bool {
        self.shared
            .lock()
            .status_tx
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

/// The service's echo of an outgoing payload
pub fn echo_of(payload: &OutboundPayload, id: &str) -> RawActivity {
    let mut raw = payload.to_raw();
    raw.id = Some(id.to_string());
    raw
}

/// A bot reply to `parent`, as the service would send it
pub fn bot_reply(id: &str, parent: &ActivityId, text: &str) -> RawActivity {
    bot_message(id, text, Some(parent.as_str()))
}

/// A bot message, optionally answering another activity
pub fn bot_message(id: &str, text: &str, reply_to: Option<&str>) -> RawActivity {
    RawActivity {
        id: Some(id.to_string()),
        kind: "message".to_string(),
        text: Some(text.to_string()),
        from: Some(courier_core::RawParticipant {
            id: "bot".to_string(),
            name: Some("Bot".to_string()),
            role: Some("bot".to_string()),
        }),
        timestamp: Some(courier_core::Timestamp::now().as_millis()),
        reply_to_id: reply_to.map(str::to_string),
        ..RawActivity::default()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{ClientId, DraftActivity, Participant, Timestamp};

    fn payload(text: &str) -> OutboundPayload {
        let client_id = ClientId::generate();
        let activity =
            DraftActivity::message(text).stamp(client_id.clone(), Participant::user("me"), Timestamp::new(5));
        OutboundPayload::from_activity(client_id, &activity)
    }

    #[tokio::test]
    async fn auto_ready_reports_connecting_then_ready() {
        let (transport, controller) = ScriptedTransport::new();
        let mut status = transport.status_events().await.unwrap();

        assert_eq!(status.recv().await, Some(TransportStatus::Connecting));
        assert_eq!(status.recv().await, Some(TransportStatus::Ready));
        assert_eq!(controller.status_subscriptions(), 1);
    }

    #[tokio::test]
    async fn injected_connect_failure_consumes_one_subscription() {
        let (transport, controller) = ScriptedTransport::new();
        controller.fail_next_connects(1);

        let mut first = transport.status_events().await.unwrap();
        assert!(matches!(first.recv().await, Some(TransportStatus::Error { .. })));

        let mut second = transport.status_events().await.unwrap();
        assert_eq!(second.recv().await, Some(TransportStatus::Connecting));
    }

    #[tokio::test]
    async fn captures_sends_and_echoes_them() {
        let (transport, controller) = ScriptedTransport::manual();
        let _status = transport.status_events().await.unwrap();
        let mut inbound = transport.inbound_events().await.unwrap();

        let sent = payload("hi");
        transport.send(sent.clone()).await.unwrap();
        let captured = controller.next_sent().await;
        assert_eq!(captured, sent);

        assert!(controller.echo(&captured, "srv-1"));
        let echo = inbound.recv().await.unwrap();
        assert_eq!(echo.id.as_deref(), Some("srv-1"));
        assert_eq!(echo.client_id(), Some(sent.client_id.as_str()));
    }

    #[tokio::test]
    async fn injected_send_failure() {
        let (transport, controller) = ScriptedTransport::new();
        let _status = transport.status_events().await.unwrap();
        controller.fail_next_send(TransportError::SendFailed {
            reason: "boom".into(),
        });

        assert!(transport.send(payload("a")).await.is_err());
        assert!(transport.send(payload("b")).await.is_ok());
        assert_eq!(controller.sent_count(), 1);
    }

    #[tokio::test]
    async fn close_ends_streams_and_is_idempotent() {
        let (transport, controller) = ScriptedTransport::manual();
        let mut status = transport.status_events().await.unwrap();
        assert_eq!(status.recv().await, Some(TransportStatus::Connecting));

        transport.close().await;
        transport.close().await;
        assert_eq!(controller.closes(), 2);
        assert!(status.recv().await.is_none());
        assert!(!controller.set_ready());
        assert_eq!(
            transport.send(payload("late")).await,
            Err(TransportError::NotConnected)
        );
    }
}
