//! Engine Builder API
//!
//! Provides a builder-style API for consumers (CLI/tests) to attach a
//! transport and get an [`EngineHandle`] to the running engine.

use std::sync::Arc;

use courier_core::{
    channel::utils::{
        create_app_event_channel, create_command_channel, create_completion_channel,
        AppEventReceiver, AppEventSender, CommandSender,
    },
    ClientId, Command, ConnectionState, CourierConfig, CourierError, CourierResult,
    DeliveredFeed, DraftActivity, EngineStatus, Participant, SubmitHandle, TimeSource,
    TransportAdapter,
};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::TokioTimeSource;
use crate::logic::{EngineStats, EngineTask, SessionState};

// ----------------------------------------------------------------------------
// Engine Builder
// ----------------------------------------------------------------------------

/// Builder for a delivery engine bound to one transport
pub struct EngineBuilder {
    transport: Arc<dyn TransportAdapter>,
    config: CourierConfig,
    local: Participant,
    time_source: Option<Arc<dyn TimeSource>>,
    jitter_seed: Option<u64>,
}

impl EngineBuilder {
    /// Create a new engine builder
    pub fn new(transport: Arc<dyn TransportAdapter>) -> Self {
        Self {
            transport,
            config: CourierConfig::default(),
            local: Participant::user("local"),
            time_source: None,
            jitter_seed: None,
        }
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: CourierConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the participant stamped on outgoing activities
    pub fn with_local_participant(mut self, local: Participant) -> Self {
        self.local = local;
        self
    }

    /// Replace the clock used for timestamps and deadlines
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// Make reconnect jitter reproducible
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Build the engine without spawning it
    pub fn build(self) -> CourierResult<(EngineHandle, EngineTask)> {
        self.config.validate()?;

        let (command_sender, command_receiver) = create_command_channel(&self.config.channels);
        let (completion_sender, completion_receiver) = create_completion_channel();
        let app_event_sender = create_app_event_channel(&self.config.channels);
        let (state_sender, state_receiver) = watch::channel(ConnectionState::Uninitialized);

        let time_source = self
            .time_source
            .unwrap_or_else(|| Arc::new(TokioTimeSource::new()));
        let state = SessionState::new(&self.config, self.local, self.jitter_seed);

        let task = EngineTask::new(
            state,
            self.transport,
            time_source,
            command_receiver,
            completion_sender,
            completion_receiver,
            app_event_sender.clone(),
            state_sender,
        );

        let handle = EngineHandle {
            command_sender,
            app_event_sender,
            state_receiver,
        };
        Ok((handle, task))
    }

    /// Build the engine and spawn its task on the current runtime
    pub fn build_and_start(self) -> CourierResult<EngineHandle> {
        let (handle, _join) = self.spawn()?;
        Ok(handle)
    }

    /// Build the engine, spawn it, and keep the task's join handle
    pub fn spawn(self) -> CourierResult<(EngineHandle, JoinHandle<EngineStats>)> {
        let transport = self.transport.name().to_string();
        let (handle, task) = self.build()?;
        let join = tokio::spawn(task.run());
        info!(%transport, "Courier engine started");
        Ok((handle, join))
    }
}

// ----------------------------------------------------------------------------
// Engine Handle
// ----------------------------------------------------------------------------

/// Cloneable handle to a running engine
///
/// The engine stops once [`EngineHandle::shutdown`] is called or every
/// handle has been dropped.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    command_sender: CommandSender,
    app_event_sender: AppEventSender,
    state_receiver: watch::Receiver<ConnectionState>,
}

impl EngineHandle {
    async fn send_command(&self, command: Command) -> CourierResult<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| CourierError::channel("engine stopped"))
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> CourierResult<T> {
        let (responder, response) = oneshot::channel();
        self.send_command(command(responder)).await?;
        response
            .await
            .map_err(|_| CourierError::channel("engine stopped before responding"))
    }

    /// Start connecting; a no-op while already connecting or online
    pub async fn connect(&self) -> CourierResult<()> {
        self.send_command(Command::Connect).await
    }

    /// Close the connection, failing unresolved sends with `ConnectionLost`
    pub async fn disconnect(&self) -> CourierResult<()> {
        self.send_command(Command::Disconnect).await
    }

    /// Submit a draft for delivery
    pub async fn submit(&self, draft: DraftActivity) -> CourierResult<SubmitHandle> {
        self.request(|responder| Command::Submit { draft, responder })
            .await?
    }

    /// Send a failed draft again under a fresh client id
    pub async fn resubmit(&self, client_id: &ClientId) -> CourierResult<SubmitHandle> {
        let client_id = client_id.clone();
        self.request(|responder| Command::Resubmit {
            client_id,
            responder,
        })
        .await?
    }

    /// Abandon a pending send; `false` if it was already resolved
    pub async fn cancel(&self, client_id: &ClientId) -> CourierResult<bool> {
        let client_id = client_id.clone();
        self.request(|responder| Command::Cancel {
            client_id,
            responder,
        })
        .await
    }

    /// Delivered activities in order, starting with the retained backlog
    pub async fn delivered_activities(&self) -> CourierResult<DeliveredFeed> {
        self.request(|responder| Command::SubscribeDelivered { responder })
            .await
    }

    /// Snapshot of engine state and counters
    pub async fn status(&self) -> CourierResult<EngineStatus> {
        self.request(|responder| Command::GetStatus { responder })
            .await
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_receiver.borrow()
    }

    /// Receiver notified on every connection state change
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_receiver.clone()
    }

    /// Wait until the connection reaches `target`
    pub async fn wait_for_state(&self, target: ConnectionState) -> CourierResult<()> {
        let mut receiver = self.state_receiver.clone();
        receiver
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| CourierError::channel("engine stopped"))
    }

    /// Subscribe to all engine events from now on
    pub fn subscribe_events(&self) -> AppEventReceiver {
        self.app_event_sender.subscribe()
    }

    /// Check if the engine task is still running
    pub fn is_running(&self) -> bool {
        !self.command_sender.is_closed()
    }

    /// Stop the engine and wait for it to release the transport
    pub async fn shutdown(&self) -> CourierResult<()> {
        info!("Shutting down courier engine");
        // Already stopped is fine
        let _ = self.send_command(Command::Shutdown).await;
        self.command_sender.closed().await;
        info!("Courier engine shut down");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use courier_harness::ScriptedTransport;

    fn builder() -> (EngineBuilder, courier_harness::TransportController) {
        let (transport, controller) = ScriptedTransport::new();
        let builder = EngineBuilder::new(Arc::new(transport)).with_config(CourierConfig::testing());
        (builder, controller)
    }

    #[tokio::test]
    async fn test_engine_builder() {
        let (builder, _controller) = builder();
        let engine = builder.build_and_start().expect("Failed to build engine");

        assert!(engine.is_running());
        assert_eq!(engine.connection_state(), ConnectionState::Uninitialized);

        engine.shutdown().await.expect("Failed to shutdown");
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let (builder, _controller) = builder();
        let mut config = CourierConfig::testing();
        config.channels.command_buffer_size = 0;

        let result = builder.with_config(config).build_and_start();
        assert!(matches!(result, Err(CourierError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let (builder, _controller) = builder();
        let engine = builder.build_and_start().unwrap();
        engine.shutdown().await.unwrap();

        assert!(matches!(engine.connect().await, Err(CourierError::Channel { .. })));
        assert!(matches!(engine.status().await, Err(CourierError::Channel { .. })));
    }

    #[tokio::test]
    async fn test_dropping_every_handle_stops_the_task() {
        let (builder, controller) = builder();
        let (engine, join) = builder.spawn().unwrap();
        engine.connect().await.unwrap();
        engine.wait_for_state(ConnectionState::Online).await.unwrap();

        let second = engine.clone();
        drop(engine);
        assert!(second.is_running());
        drop(second);

        let stats = join.await.expect("engine task panicked");
        assert_eq!(stats.commands_processed, 1);
        assert!(!controller.is_open());
        assert!(controller.closes() >= 1);
    }
}
