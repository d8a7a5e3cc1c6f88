//! Delivered activity history
//!
//! Keeps a bounded replay buffer of delivered activities and fans live
//! deliveries out to every [`DeliveredFeed`].

use std::collections::VecDeque;

use courier_core::{Activity, DeliveredFeed, HistoryConfig};
use tokio::sync::broadcast;

/// Replay buffer plus live broadcast of delivered activities
#[derive(Debug)]
pub struct DeliveredHistory {
    entries: VecDeque<Activity>,
    capacity: usize,
    live: broadcast::Sender<Activity>,
}

impl DeliveredHistory {
    /// `live_buffer` bounds how far a slow feed may fall behind
    pub fn new(config: &HistoryConfig, live_buffer: usize) -> Self {
        let (live, _) = broadcast::channel(live_buffer.max(1));
        Self {
            entries: VecDeque::with_capacity(config.replay_capacity),
            capacity: config.replay_capacity,
            live,
        }
    }

    /// Record a delivery and publish it to live feeds
    pub fn push(&mut self, activity: Activity) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(activity.clone());
        // No live feeds is fine; the backlog still has it
        let _ = self.live.send(activity);
    }

    /// A feed replaying the backlog, then following live deliveries
    pub fn subscribe(&self) -> DeliveredFeed {
        DeliveredFeed::new(self.entries.iter().cloned(), self.live.subscribe())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{ActivityBody, ActivityId, Participant, Timestamp};

    fn activity(id: &str) -> Activity {
        Activity {
            id: Some(ActivityId::new(id)),
            client_id: None,
            body: ActivityBody::Message { text: id.to_string() },
            sender: Participant::bot("bot"),
            created_at: Timestamp::new(0),
            reply_to_id: None,
            delivery_status: None,
        }
    }

    fn id_of(activity: &Activity) -> &str {
        activity.id.as_ref().map(ActivityId::as_str).unwrap_or_default()
    }

    #[tokio::test]
    async fn replays_bounded_backlog_then_live() {
        let mut history = DeliveredHistory::new(&HistoryConfig { replay_capacity: 2 }, 8);
        history.push(activity("a"));
        history.push(activity("b"));
        history.push(activity("c"));
        assert_eq!(history.len(), 2);

        let mut feed = history.subscribe();
        assert_eq!(feed.backlog_len(), 2);
        history.push(activity("d"));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(id_of(&feed.next().await.unwrap()).to_string());
        }
        assert_eq!(seen, vec!["b", "c", "d"]);
    }
}
