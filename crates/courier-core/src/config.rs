//! Centralized Configuration Management
//!
//! This module consolidates all configuration structures used by the engine
//! to provide a unified, consistent configuration interface.

use crate::errors::{CourierError, Result};
use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Configuration for channel buffer sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Buffer size for Command channels (handle → engine)
    pub command_buffer_size: usize,
    /// Buffer size for transport status and inbound channels (transport → engine)
    pub transport_buffer_size: usize,
    /// Buffer size for the AppEvent broadcast (engine → consumers)
    pub app_event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,    // Consumer commands are infrequent
            transport_buffer_size: 128, // Inbound traffic can be bursty
            app_event_buffer_size: 256, // Slow consumers should not lag
        }
    }
}

impl ChannelConfig {
    /// Create configuration for low-memory environments
    pub fn low_memory() -> Self {
        Self {
            command_buffer_size: 8,
            transport_buffer_size: 32,
            app_event_buffer_size: 64,
        }
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 100,
            transport_buffer_size: 100,
            app_event_buffer_size: 1024,
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery Configuration
// ----------------------------------------------------------------------------

/// What to do with a submission while the connection is not online
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OfflinePolicy {
    /// Fail fast with `CourierError::NotOnline`
    #[default]
    Reject,
    /// Hold the submission until the connection is online again
    QueueUntilOnline,
}

/// Configuration for outgoing delivery tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How long to wait for the service to echo an activity back
    pub echo_timeout: Duration,
    /// Behaviour of submit while not online
    pub offline_policy: OfflinePolicy,
    /// Maximum number of submissions held while offline
    pub max_offline_queue: usize,
    /// Number of failed drafts retained for resubmission
    pub max_failed_retained: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            echo_timeout: Duration::from_secs(5),
            offline_policy: OfflinePolicy::Reject,
            max_offline_queue: 64,
            max_failed_retained: 256,
        }
    }
}

impl DeliveryConfig {
    /// Queue submissions while offline instead of rejecting them
    pub fn queue_while_offline(mut self) -> Self {
        self.offline_policy = OfflinePolicy::QueueUntilOnline;
        self
    }

    /// Create configuration for slow or congested services
    pub fn conservative() -> Self {
        Self {
            echo_timeout: Duration::from_secs(15),
            offline_policy: OfflinePolicy::QueueUntilOnline,
            max_offline_queue: 32,
            max_failed_retained: 128,
        }
    }

    /// Create configuration optimized for testing (short timeouts)
    pub fn testing() -> Self {
        Self {
            echo_timeout: Duration::from_millis(500),
            offline_policy: OfflinePolicy::Reject,
            max_offline_queue: 8,
            max_failed_retained: 16,
        }
    }
}

// ----------------------------------------------------------------------------
// Ordering Configuration
// ----------------------------------------------------------------------------

/// Configuration for incoming reply ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingConfig {
    /// How long an inbound reply waits for the activity it answers
    pub dependency_timeout: Duration,
    /// Maximum number of simultaneously deferred items
    pub max_deferred: usize,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            dependency_timeout: Duration::from_secs(5),
            max_deferred: 1024,
        }
    }
}

impl OrderingConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            dependency_timeout: Duration::from_millis(500),
            max_deferred: 64,
        }
    }
}

// ----------------------------------------------------------------------------
// Ledger Configuration
// ----------------------------------------------------------------------------

/// Configuration for the delivery ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Maximum number of delivered ids remembered for duplicate suppression
    pub delivered_capacity: usize,
    /// Maximum number of confirmed client ids remembered for collision checks
    pub confirmed_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            delivered_capacity: 4096,
            confirmed_capacity: 1024,
        }
    }
}

impl LedgerConfig {
    /// Create configuration for low-memory environments
    pub fn low_memory() -> Self {
        Self {
            delivered_capacity: 512,
            confirmed_capacity: 128,
        }
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            delivered_capacity: 64,
            confirmed_capacity: 16,
        }
    }
}

// ----------------------------------------------------------------------------
// Reconnect Configuration
// ----------------------------------------------------------------------------

/// Configuration for reconnect backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Random spread applied to each delay, as a fraction (at most 1/3)
    pub jitter_ratio: f64,
    /// Attempts allowed before giving up
    pub max_attempts: u32,
    /// Whether a failed initial connect is retried with backoff
    pub retry_initial_connect: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.2,
            max_attempts: 10,
            retry_initial_connect: true,
        }
    }
}

impl ReconnectConfig {
    /// Create configuration for aggressive reconnects
    pub fn aggressive() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_ratio: 0.1,
            max_attempts: 20,
            retry_initial_connect: true,
        }
    }

    /// Create configuration for conservative reconnects
    pub fn conservative() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            jitter_ratio: 0.3,
            max_attempts: 5,
            retry_initial_connect: false,
        }
    }

    /// Create configuration optimized for testing (fast retries, no jitter)
    pub fn testing() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter_ratio: 0.0,
            max_attempts: 3,
            retry_initial_connect: true,
        }
    }
}

// ----------------------------------------------------------------------------
// History Configuration
// ----------------------------------------------------------------------------

/// Configuration for the delivered-activity replay history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Activities replayed to a late subscriber
    pub replay_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            replay_capacity: 256,
        }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Master configuration struct that consolidates all engine configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CourierConfig {
    /// Channel buffer configuration
    pub channels: ChannelConfig,
    /// Outgoing delivery configuration
    pub delivery: DeliveryConfig,
    /// Incoming ordering configuration
    pub ordering: OrderingConfig,
    /// Delivery ledger configuration
    pub ledger: LedgerConfig,
    /// Reconnect backoff configuration
    pub reconnect: ReconnectConfig,
    /// Delivered history configuration
    pub history: HistoryConfig,
}

impl CourierConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration for constrained devices
    pub fn low_memory() -> Self {
        Self {
            channels: ChannelConfig::low_memory(),
            delivery: DeliveryConfig::default(),
            ordering: OrderingConfig::default(),
            ledger: LedgerConfig::low_memory(),
            reconnect: ReconnectConfig::conservative(),
            history: HistoryConfig { replay_capacity: 64 },
        }
    }

    /// Create configuration for unreliable networks
    pub fn unreliable_network() -> Self {
        Self {
            delivery: DeliveryConfig::conservative(),
            reconnect: ReconnectConfig::aggressive(),
            ..Self::default()
        }
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            channels: ChannelConfig::testing(),
            delivery: DeliveryConfig::testing(),
            ordering: OrderingConfig::testing(),
            ledger: LedgerConfig::testing(),
            reconnect: ReconnectConfig::testing(),
            history: HistoryConfig { replay_capacity: 32 },
        }
    }

    /// Builder method for customizing channel configuration
    pub fn with_channels(mut self, channels: ChannelConfig) -> Self {
        self.channels = channels;
        self
    }

    /// Builder method for customizing delivery configuration
    pub fn with_delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    /// Builder method for customizing ordering configuration
    pub fn with_ordering(mut self, ordering: OrderingConfig) -> Self {
        self.ordering = ordering;
        self
    }

    /// Builder method for customizing ledger configuration
    pub fn with_ledger(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = ledger;
        self
    }

    /// Builder method for customizing reconnect configuration
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Builder method for customizing history configuration
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<()> {
        if self.channels.command_buffer_size == 0 {
            return Err(CourierError::configuration("Command buffer size cannot be zero"));
        }
        if self.channels.transport_buffer_size == 0 {
            return Err(CourierError::configuration("Transport buffer size cannot be zero"));
        }
        if self.channels.app_event_buffer_size == 0 {
            return Err(CourierError::configuration("App event buffer size cannot be zero"));
        }

        if self.delivery.echo_timeout.is_zero() {
            return Err(CourierError::configuration("Echo timeout cannot be zero"));
        }
        if self.delivery.offline_policy == OfflinePolicy::QueueUntilOnline
            && self.delivery.max_offline_queue == 0
        {
            return Err(CourierError::configuration(
                "Offline queue capacity cannot be zero when queuing is enabled",
            ));
        }

        if self.ordering.dependency_timeout.is_zero() {
            return Err(CourierError::configuration("Dependency timeout cannot be zero"));
        }
        if self.ordering.max_deferred == 0 {
            return Err(CourierError::configuration("Max deferred items cannot be zero"));
        }

        if self.ledger.delivered_capacity == 0 {
            return Err(CourierError::configuration("Delivered capacity cannot be zero"));
        }

        if self.reconnect.base_delay.is_zero() {
            return Err(CourierError::configuration("Reconnect base delay cannot be zero"));
        }
        if self.reconnect.base_delay > self.reconnect.max_delay {
            return Err(CourierError::configuration(
                "Reconnect base delay cannot be greater than max delay",
            ));
        }
        if !(0.0..=1.0 / 3.0).contains(&self.reconnect.jitter_ratio) {
            return Err(CourierError::configuration(
                "Jitter ratio must be between 0 and 1/3",
            ));
        }

        if self.history.replay_capacity == 0 {
            return Err(CourierError::configuration("Replay capacity cannot be zero"));
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for config in [
            CourierConfig::default(),
            CourierConfig::low_memory(),
            CourierConfig::unreliable_network(),
            CourierConfig::testing(),
        ] {
            assert!(config.validate().is_ok(), "{config:?}");
        }
    }

    #[test]
    fn default_timeouts() {
        let config = CourierConfig::default();
        assert_eq!(config.delivery.echo_timeout, Duration::from_secs(5));
        assert_eq!(config.ordering.dependency_timeout, Duration::from_secs(5));
        assert_eq!(config.delivery.offline_policy, OfflinePolicy::Reject);
    }

    #[test]
    fn rejects_excessive_jitter() {
        let config = CourierConfig::default().with_reconnect(ReconnectConfig {
            jitter_ratio: 0.5,
            ..ReconnectConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(CourierError::Configuration { .. })
        ));
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let config = CourierConfig::default().with_reconnect(ReconnectConfig {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(1),
            ..ReconnectConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_capacity_queue_when_queuing() {
        let mut delivery = DeliveryConfig::default().queue_while_offline();
        delivery.max_offline_queue = 0;
        let config = CourierConfig::default().with_delivery(delivery);
        assert!(config.validate().is_err());
    }
}
