//! Loopback Transport
//!
//! An in-process stand-in for the conversational service. Every accepted
//! payload is echoed back under a fresh server id after a simulated latency,
//! and an optional bot answers messages with threaded replies. Latency,
//! duplication, reply reordering and connection drops are configurable so the
//! engine's delivery guarantees can be exercised without a network.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{
    channel::utils::{create_inbound_channel, create_status_channel, InboundSender, StatusSender},
    ActivityBody, ChannelConfig, InboundStream, OutboundPayload, RawActivity, StatusStream,
    TransportAdapter, TransportError, TransportStatus,
};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::scripted::{bot_message, echo_of};

// ----------------------------------------------------------------------------
// Loopback Configuration
// ----------------------------------------------------------------------------

/// Simulated service behaviour
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Echo latency range (min, max) in milliseconds
    pub latency_range: (u64, u64),
    /// Time from subscription to `Ready`
    pub connect_delay: Duration,
    /// Probability that an echo is delivered twice
    pub duplication_rate: f64,
    /// Probability that the connection drops after a send
    pub drop_rate: f64,
    /// Whether a bot answers each message
    pub bot_replies: bool,
    /// Bot thinking time range (min, max) in milliseconds, counted from the echo
    pub reply_delay_range: (u64, u64),
    /// Probability that the bot's reply overtakes the echo it answers
    pub reply_overtake_rate: f64,
    /// Sizes the status and inbound channels
    pub channels: ChannelConfig,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            latency_range: (20, 80),
            connect_delay: Duration::from_millis(50),
            duplication_rate: 0.0,
            drop_rate: 0.0,
            bot_replies: true,
            reply_delay_range: (100, 400),
            reply_overtake_rate: 0.0,
            channels: ChannelConfig::default(),
        }
    }
}

impl LoopbackConfig {
    /// Instant, lossless service without a bot
    pub fn ideal() -> Self {
        Self {
            latency_range: (1, 2),
            connect_delay: Duration::from_millis(1),
            bot_replies: false,
            reply_delay_range: (1, 2),
            ..Self::default()
        }
    }

    /// Slow service that duplicates echoes, reorders replies and drops connections
    pub fn unreliable() -> Self {
        Self {
            latency_range: (100, 1_500),
            connect_delay: Duration::from_millis(300),
            duplication_rate: 0.1,
            drop_rate: 0.05,
            bot_replies: true,
            reply_delay_range: (0, 500),
            reply_overtake_rate: 0.3,
            channels: ChannelConfig::default(),
        }
    }

    pub fn with_bot_replies(mut self, enabled: bool) -> Self {
        self.bot_replies = enabled;
        self
    }
}

// ----------------------------------------------------------------------------
// Loopback Transport
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct LoopbackState {
    status_tx: Option<StatusSender>,
    inbound_tx: Option<InboundSender>,
    next_id: u64,
    rng: fastrand::Rng,
}

/// In-process echo service
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    config: LoopbackConfig,
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new(config: LoopbackConfig) -> Self {
        Self::with_rng(config, fastrand::Rng::new())
    }

    /// Create a transport with reproducible latency and fault decisions
    pub fn with_seed(config: LoopbackConfig, seed: u64) -> Self {
        Self::with_rng(config, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(config: LoopbackConfig, rng: fastrand::Rng) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(LoopbackState {
                status_tx: None,
                inbound_tx: None,
                next_id: 0,
                rng,
            })),
        }
    }

    pub fn ideal() -> Self {
        Self::new(LoopbackConfig::ideal())
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pick(rng: &mut fastrand::Rng, (min, max): (u64, u64)) -> Duration {
        Duration::from_millis(rng.u64(min..=max.max(min)))
    }

    fn reply_to(payload: &OutboundPayload, server_id: &str, reply_id: String) -> Option<RawActivity> {
        let ActivityBody::Message { text } = &payload.body else {
            return None;
        };
        Some(bot_message(
            &reply_id,
            &format!("You said: {text}"),
            Some(server_id),
        ))
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

#[async_trait]
impl TransportAdapter for LoopbackTransport {
    async fn send(&self, payload: OutboundPayload) -> Result<(), TransportError> {
        let mut state = self.lock();
        let inbound = state.inbound_tx.clone().ok_or(TransportError::NotConnected)?;
        let status = state.status_tx.clone().ok_or(TransportError::NotConnected)?;

        state.next_id += 1;
        let server_id = format!("loopback-{}", state.next_id);
        let latency = Self::pick(&mut state.rng, self.config.latency_range);
        let duplicate = state.rng.f64() < self.config.duplication_rate;
        let drop_after = state.rng.f64() < self.config.drop_rate;

        let reply = if self.config.bot_replies {
            state.next_id += 1;
            let reply_id = format!("loopback-{}", state.next_id);
            let delay = if state.rng.f64() < self.config.reply_overtake_rate {
                // Arrives before the echo of the message it answers
                latency / 2
            } else {
                latency + Self::pick(&mut state.rng, self.config.reply_delay_range)
            };
            Self::reply_to(&payload, &server_id, reply_id).map(|reply| (reply, delay))
        } else {
            None
        };
        drop(state);

        debug!(client_id = %payload.client_id, %server_id, ?latency, "Loopback accepted payload");

        let echo = echo_of(&payload, &server_id);
        let echo_inbound = inbound.clone();
        tokio::spawn(async move {
            sleep(latency).await;
            let _ = echo_inbound.send(echo.clone()).await;
            if duplicate {
                let _ = echo_inbound.send(echo).await;
            }
            if drop_after {
                info!("Loopback simulating a dropped connection");
                let _ = status.send(TransportStatus::dropped("loopback connection reset")).await;
            }
        });

        if let Some((reply, delay)) = reply {
            tokio::spawn(async move {
                sleep(delay).await;
                let _ = inbound.send(reply).await;
            });
        }

        Ok(())
    }

    async fn status_events(&self) -> Result<StatusStream, TransportError> {
        let (tx, rx) = create_status_channel(&self.config.channels);
        self.lock().status_tx = Some(tx.clone());

        let connect_delay = self.config.connect_delay;
        tokio::spawn(async move {
            let _ = tx.send(TransportStatus::Connecting).await;
            sleep(connect_delay).await;
            let _ = tx.send(TransportStatus::Ready).await;
        });
        Ok(rx)
    }

    async fn inbound_events(&self) -> Result<InboundStream, TransportError> {
        let (tx, rx) = create_inbound_channel(&self.config.channels);
        self.lock().inbound_tx = Some(tx);
        Ok(rx)
    }

    async fn close(&self) {
        let mut state = self.lock();
        state.status_tx = None;
        state.inbound_tx = None;
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
