//! Courier CLI Application
//!
//! Wires an engine to the loopback service and implements the `chat` and
//! `send` commands on top of it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use courier_core::{
    Activity, ActivityId, AppEvent, ClientId, ConnectionState, DeliveryUpdate, Diagnostic,
    DraftActivity,
};
use courier_harness::{LoopbackConfig, LoopbackTransport};
use courier_runtime::{AppEventReceiver, EngineBuilder, EngineHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Main CLI application
pub struct CourierApp {
    engine: EngineHandle,
    local_id: String,
}

impl CourierApp {
    /// Start an engine against the loopback service
    pub fn new(config: &AppConfig, unreliable: bool) -> Result<Self> {
        let loopback = if unreliable {
            LoopbackConfig::unreliable()
        } else {
            config.loopback_config()
        };
        let participant = config.participant();
        let local_id = participant.id.clone();

        let engine = EngineBuilder::new(Arc::new(LoopbackTransport::new(loopback)))
            .with_config(config.courier_config())
            .with_local_participant(participant)
            .build_and_start()?;

        Ok(Self { engine, local_id })
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Connect and wait until the service is usable
    pub async fn connect(&self) -> Result<()> {
        self.engine.connect().await?;
        let mut state = self.engine.watch_connection_state();
        let reached = timeout(
            CONNECT_TIMEOUT,
            state.wait_for(|s| matches!(s, ConnectionState::Online | ConnectionState::Failed)),
        )
        .await
        .map_err(|_| CliError::Config("timed out connecting to the service".to_string()))?
        .map(|s| *s)
        .map_err(|_| CliError::Config("engine stopped while connecting".to_string()))?;

        match reached {
            ConnectionState::Online => {
                info!("Connected");
                Ok(())
            }
            other => Err(CliError::Config(format!("could not connect: {other}"))),
        }
    }

    /// Submit one message and wait for its terminal status
    pub async fn send_message(&self, text: String, reply_to: Option<String>) -> Result<Activity> {
        let mut draft = DraftActivity::message(text);
        if let Some(parent) = reply_to {
            draft = draft.in_reply_to(ActivityId::new(parent));
        }
        let handle = self.engine.submit(draft).await?;
        debug!(client_id = %handle.client_id(), "Submitted message");
        Ok(handle.outcome().await?)
    }

    /// Interactive chat: stdin lines are sent, deliveries are printed
    pub async fn run_chat(&self, name: &str) -> Result<()> {
        println!("Courier chat as {name}. Commands: /status /retry /connect /disconnect /quit");

        let last_failed = Arc::new(Mutex::new(None::<ClientId>));
        let printer = tokio::spawn(print_events(
            self.engine.subscribe_events(),
            self.local_id.clone(),
            Arc::clone(&last_failed),
        ));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            match line {
                "" => {}
                "/quit" => break,
                "/status" => self.print_status().await?,
                "/connect" => self.engine.connect().await?,
                "/disconnect" => self.engine.disconnect().await?,
                "/retry" => {
                    let failed = last_failed
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    match failed {
                        Some(client_id) => {
                            if let Err(e) = self.engine.resubmit(&client_id).await {
                                println!("! retry failed: {e}");
                            }
                        }
                        None => println!("! nothing to retry"),
                    }
                }
                text => {
                    if let Err(e) = self.engine.submit(DraftActivity::message(text)).await {
                        println!("! not sent: {e}");
                    }
                }
            }
        }

        printer.abort();
        Ok(())
    }

    async fn print_status(&self) -> Result<()> {
        let status = self.engine.status().await?;
        println!("state:        {}", status.state);
        println!("pending:      {} ({} queued)", status.pending_sends, status.queued_sends);
        println!("deferred:     {}", status.deferred_inbound);
        println!("delivered:    {}", status.ordering.delivered);
        println!("confirmed:    {}", status.outgoing.confirmed);
        println!("failed:       {}", status.outgoing.failed);
        if status.reconnect_attempt > 0 {
            println!("reconnect:    attempt {}", status.reconnect_attempt);
        }
        Ok(())
    }

    /// Stop the engine
    pub async fn stop(&self) -> Result<()> {
        self.engine.shutdown().await?;
        Ok(())
    }
}

/// Print deliveries, failures and connection changes as they happen
async fn print_events(
    mut events: AppEventReceiver,
    local_id: String,
    last_failed: Arc<Mutex<Option<ClientId>>>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer lagged behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            AppEvent::ActivityDelivered(activity) => {
                let text = activity.body.text().unwrap_or("<non-message>");
                let who = if activity.sender.id == local_id {
                    "you".to_string()
                } else {
                    activity.sender.display_name().to_string()
                };
                match &activity.reply_to_id {
                    Some(parent) => println!("[{who}] (re {parent}) {text}"),
                    None => println!("[{who}] {text}"),
                }
            }
            AppEvent::DeliveryStatusChanged {
                client_id,
                update: DeliveryUpdate::Failed(reason),
            } => {
                println!("! message failed: {reason} (type /retry to send again)");
                *last_failed.lock().unwrap_or_else(PoisonError::into_inner) = Some(client_id);
            }
            AppEvent::ConnectionStateChanged { to, .. } => println!("* {to}"),
            AppEvent::Diagnostic(Diagnostic::ReconnectScheduled { attempt, delay_ms }) => {
                println!("* reconnecting in {delay_ms}ms (attempt {attempt})");
            }
            AppEvent::Diagnostic(Diagnostic::ReconnectExhausted { attempts }) => {
                println!("* gave up after {attempts} attempts; type /connect to try again");
            }
            AppEvent::DeliveryStatusChanged { .. } | AppEvent::Diagnostic(_) => {}
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.service.latency_min_ms = 5;
        config.service.latency_max_ms = 10;
        config.service.bot_replies = false;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_is_confirmed() {
        let app = CourierApp::new(&quiet_config(), false).unwrap();
        app.connect().await.unwrap();

        let activity = app.send_message("hello".to_string(), None).await.unwrap();
        assert!(activity.id.is_some());
        assert_eq!(activity.body.text(), Some("hello"));
        assert_eq!(activity.sender.id, "cli-user");

        app.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_reply_carries_parent() {
        let app = CourierApp::new(&quiet_config(), false).unwrap();
        app.connect().await.unwrap();

        let activity = app
            .send_message("answer".to_string(), Some("loopback-7".to_string()))
            .await
            .unwrap();
        assert_eq!(activity.reply_to_id, Some(ActivityId::new("loopback-7")));

        app.stop().await.unwrap();
    }
}
