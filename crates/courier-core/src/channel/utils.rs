//! Channel Utilities
//!
//! Channel type aliases and constructors sized from [`ChannelConfig`], plus
//! the consumer-side receivers handed out by the engine: [`SubmitHandle`] for
//! one submission's status updates and [`DeliveredFeed`] for the ordered
//! stream of delivered activities.

use std::collections::VecDeque;

use futures::stream::{self, Stream};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::activity::{Activity, RawActivity};
use crate::channel::communication::{AppEvent, Command, SendCompletion};
use crate::config::ChannelConfig;
use crate::errors::DeliveryFailure;
use crate::protocol::outgoing::DeliveryUpdate;
use crate::transport::TransportStatus;
use crate::types::ClientId;

// ----------------------------------------------------------------------------
// Channel Types
// ----------------------------------------------------------------------------

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;
pub type StatusSender = mpsc::Sender<TransportStatus>;
pub type StatusReceiver = mpsc::Receiver<TransportStatus>;
pub type InboundSender = mpsc::Sender<RawActivity>;
pub type InboundReceiver = mpsc::Receiver<RawActivity>;
pub type CompletionSender = mpsc::UnboundedSender<SendCompletion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<SendCompletion>;
pub type AppEventSender = broadcast::Sender<AppEvent>;
pub type AppEventReceiver = broadcast::Receiver<AppEvent>;
pub type UpdateSender = mpsc::UnboundedSender<DeliveryUpdate>;
pub type UpdateReceiver = mpsc::UnboundedReceiver<DeliveryUpdate>;

/// Create the consumer → engine command channel
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

/// Create a transport status channel for one subscription
pub fn create_status_channel(config: &ChannelConfig) -> (StatusSender, StatusReceiver) {
    mpsc::channel(config.transport_buffer_size)
}

/// Create a transport inbound channel for one subscription
pub fn create_inbound_channel(config: &ChannelConfig) -> (InboundSender, InboundReceiver) {
    mpsc::channel(config.transport_buffer_size)
}

/// Create the channel carrying send completions back into the engine.
/// Unbounded so spawned sends never block on a busy engine.
pub fn create_completion_channel() -> (CompletionSender, CompletionReceiver) {
    mpsc::unbounded_channel()
}

/// Create the engine → consumers event broadcast
pub fn create_app_event_channel(config: &ChannelConfig) -> AppEventSender {
    let (sender, _) = broadcast::channel(config.app_event_buffer_size);
    sender
}

/// Create the status channel for a single submission (at most three updates)
pub fn create_update_channel() -> (UpdateSender, UpdateReceiver) {
    mpsc::unbounded_channel()
}

// ----------------------------------------------------------------------------
// Submit Handle
// ----------------------------------------------------------------------------

/// Status updates for one accepted submission
///
/// Yields `Pending` first, possibly `Sent`, then exactly one terminal update.
#[derive(Debug)]
pub struct SubmitHandle {
    client_id: ClientId,
    attempt: u32,
    updates: UpdateReceiver,
}

impl SubmitHandle {
    pub fn new(client_id: ClientId, attempt: u32, updates: UpdateReceiver) -> Self {
        Self {
            client_id,
            attempt,
            updates,
        }
    }

    /// Correlation identity assigned to this submission
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// 1 for a first submission, higher for resubmissions
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Next status update; `None` once the terminal update was consumed
    pub async fn next_update(&mut self) -> Option<DeliveryUpdate> {
        self.updates.recv().await
    }

    /// Wait for the terminal status.
    /// An engine that stops before resolving the send counts as a lost connection.
    pub async fn outcome(mut self) -> Result<Activity, DeliveryFailure> {
        while let Some(update) = self.updates.recv().await {
            match update {
                DeliveryUpdate::Confirmed(activity) => return Ok(activity),
                DeliveryUpdate::Failed(reason) => return Err(reason),
                DeliveryUpdate::Pending | DeliveryUpdate::Sent => {}
            }
        }
        Err(DeliveryFailure::ConnectionLost)
    }
}

// ----------------------------------------------------------------------------
// Delivered Feed
// ----------------------------------------------------------------------------

/// Ordered delivered activities: a replayed backlog followed by live ones
#[derive(Debug)]
pub struct DeliveredFeed {
    backlog: VecDeque<Activity>,
    live: broadcast::Receiver<Activity>,
}

impl DeliveredFeed {
    pub fn new(backlog: impl IntoIterator<Item = Activity>, live: broadcast::Receiver<Activity>) -> Self {
        Self {
            backlog: backlog.into_iter().collect(),
            live,
        }
    }

    /// Activities still to be replayed before live ones
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Next delivered activity; `None` once the engine has stopped
    pub async fn next(&mut self) -> Option<Activity> {
        if let Some(activity) = self.backlog.pop_front() {
            return Some(activity);
        }
        loop {
            match self.live.recv().await {
                Ok(activity) => return Some(activity),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Delivered feed subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt the feed into a `Stream`
    pub fn into_stream(self) -> impl Stream<Item = Activity> {
        stream::unfold(self, |mut feed| async move {
            let activity = feed.next().await?;
            Some((activity, feed))
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::DraftActivity;
    use crate::types::{Participant, Timestamp};
    use futures::StreamExt;

    fn activity(text: &str) -> Activity {
        DraftActivity::message(text).stamp(
            ClientId::generate(),
            Participant::user("me"),
            Timestamp::new(0),
        )
    }

    #[tokio::test]
    async fn submit_handle_resolves_to_terminal_update() {
        let (tx, rx) = create_update_channel();
        let handle = SubmitHandle::new(ClientId::new("c-1"), 1, rx);
        tx.send(DeliveryUpdate::Pending).unwrap();
        tx.send(DeliveryUpdate::Sent).unwrap();
        tx.send(DeliveryUpdate::Failed(DeliveryFailure::Cancelled)).unwrap();

        assert_eq!(handle.outcome().await, Err(DeliveryFailure::Cancelled));
    }

    #[tokio::test]
    async fn submit_handle_reports_engine_loss() {
        let (tx, rx) = create_update_channel();
        let handle = SubmitHandle::new(ClientId::new("c-1"), 1, rx);
        tx.send(DeliveryUpdate::Pending).unwrap();
        drop(tx);

        assert_eq!(handle.outcome().await, Err(DeliveryFailure::ConnectionLost));
    }

    #[tokio::test]
    async fn feed_replays_backlog_before_live() {
        let (live_tx, live_rx) = broadcast::channel(8);
        let mut feed = DeliveredFeed::new(vec![activity("old")], live_rx);
        assert_eq!(feed.backlog_len(), 1);

        live_tx.send(activity("new")).unwrap();
        assert_eq!(feed.next().await.unwrap().body.text(), Some("old"));
        assert_eq!(feed.next().await.unwrap().body.text(), Some("new"));

        drop(live_tx);
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn feed_as_stream() {
        let (live_tx, live_rx) = broadcast::channel(8);
        let feed = DeliveredFeed::new(Vec::new(), live_rx);
        live_tx.send(activity("a")).unwrap();
        live_tx.send(activity("b")).unwrap();
        drop(live_tx);

        let texts: Vec<String> = feed
            .into_stream()
            .map(|a| a.body.text().unwrap_or_default().to_string())
            .collect()
            .await;
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn lagging_feed_skips_ahead() {
        let (live_tx, live_rx) = broadcast::channel(2);
        let mut feed = DeliveredFeed::new(Vec::new(), live_rx);
        for text in ["1", "2", "3", "4"] {
            live_tx.send(activity(text)).unwrap();
        }
        assert_eq!(feed.next().await.unwrap().body.text(), Some("3"));
    }
}
