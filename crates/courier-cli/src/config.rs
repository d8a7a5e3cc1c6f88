//! Courier CLI Configuration
//!
//! A TOML file with millisecond fields, converted into the engine's
//! [`CourierConfig`] and the loopback service's [`LoopbackConfig`]. Every
//! section is optional; missing values fall back to the engine defaults.

use std::path::Path;
use std::time::Duration;

use courier_core::{CourierConfig, OfflinePolicy, Participant};
use courier_harness::LoopbackConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Courier CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub identity: IdentityConfig,
    pub delivery: DeliverySection,
    pub ordering: OrderingSection,
    pub reconnect: ReconnectSection,
    pub service: ServiceSection,
}

/// Local participant identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_id: String,
    pub name: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id: "cli-user".to_string(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySection {
    pub echo_timeout_ms: u64,
    /// Hold messages typed while offline instead of rejecting them
    pub queue_while_offline: bool,
    pub max_offline_queue: usize,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            echo_timeout_ms: 5_000,
            queue_while_offline: true,
            max_offline_queue: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderingSection {
    pub dependency_timeout_ms: u64,
}

impl Default for OrderingSection {
    fn default() -> Self {
        Self {
            dependency_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
    pub max_attempts: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_ratio: 0.2,
            max_attempts: 10,
        }
    }
}

/// Behaviour of the simulated service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
    pub bot_replies: bool,
    pub duplication_rate: f64,
    pub drop_rate: f64,
    pub reply_overtake_rate: f64,
}

impl Default for ServiceSection {
    fn default() -> Self {
        let loopback = LoopbackConfig::default();
        Self {
            latency_min_ms: loopback.latency_range.0,
            latency_max_ms: loopback.latency_range.1,
            bot_replies: loopback.bot_replies,
            duplication_rate: loopback.duplication_rate,
            drop_rate: loopback.drop_rate,
            reply_overtake_rate: loopback.reply_overtake_rate,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration against the engine's constraints
    pub fn validate(&self) -> Result<()> {
        if self.identity.user_id.trim().is_empty() {
            return Err(CliError::Config("identity.user_id cannot be empty".to_string()));
        }
        if self.service.latency_min_ms > self.service.latency_max_ms {
            return Err(CliError::Config(
                "service.latency_min_ms cannot exceed service.latency_max_ms".to_string(),
            ));
        }
        for (name, rate) in [
            ("duplication_rate", self.service.duplication_rate),
            ("drop_rate", self.service.drop_rate),
            ("reply_overtake_rate", self.service.reply_overtake_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(CliError::Config(format!(
                    "service.{name} must be between 0 and 1"
                )));
            }
        }
        self.courier_config().validate()?;
        Ok(())
    }

    /// The local participant, named from the identity section
    pub fn participant(&self) -> Participant {
        let participant = Participant::user(self.identity.user_id.clone());
        match &self.identity.name {
            Some(name) => participant.with_name(name.clone()),
            None => participant,
        }
    }

    /// Engine configuration
    pub fn courier_config(&self) -> CourierConfig {
        let mut config = CourierConfig::default();

        config.delivery.echo_timeout = Duration::from_millis(self.delivery.echo_timeout_ms);
        config.delivery.offline_policy = if self.delivery.queue_while_offline {
            OfflinePolicy::QueueUntilOnline
        } else {
            OfflinePolicy::Reject
        };
        config.delivery.max_offline_queue = self.delivery.max_offline_queue;

        config.ordering.dependency_timeout =
            Duration::from_millis(self.ordering.dependency_timeout_ms);

        config.reconnect.base_delay = Duration::from_millis(self.reconnect.base_delay_ms);
        config.reconnect.max_delay = Duration::from_millis(self.reconnect.max_delay_ms);
        config.reconnect.jitter_ratio = self.reconnect.jitter_ratio;
        config.reconnect.max_attempts = self.reconnect.max_attempts;

        config
    }

    /// Loopback service configuration
    pub fn loopback_config(&self) -> LoopbackConfig {
        LoopbackConfig {
            latency_range: (self.service.latency_min_ms, self.service.latency_max_ms),
            bot_replies: self.service.bot_replies,
            duplication_rate: self.service.duplication_rate,
            drop_rate: self.service.drop_rate,
            reply_overtake_rate: self.service.reply_overtake_rate,
            ..LoopbackConfig::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
