//! Engine Task Implementation
//!
//! The single serialized loop that owns a session. It multiplexes consumer
//! commands, transport status, inbound activities, send completions and one
//! timer armed at the earliest pending deadline.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;

use courier_core::{
    channel::utils::{AppEventSender, CommandReceiver, CompletionReceiver, CompletionSender},
    AppEvent, Command, ConnectionState, CourierError, Effect, InboundStream, SendCompletion,
    StatusStream, TimeSource, Timestamp, TransportAdapter, TransportError, TransportStatus,
};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::handlers::{EngineHandlers, Outcome};
use super::state::{EngineStats, SessionState};

// ----------------------------------------------------------------------------
// Engine Task
// ----------------------------------------------------------------------------

/// The engine task that processes all commands and transport events
pub struct EngineTask {
    /// Session state (ledger, pipelines, supervisor, history)
    state: SessionState,
    transport: Arc<dyn TransportAdapter>,
    time_source: Arc<dyn TimeSource>,
    /// Channel for receiving commands from engine handles
    command_receiver: CommandReceiver,
    /// Subscriptions of the current connect attempt
    status_receiver: Option<StatusStream>,
    inbound_receiver: Option<InboundStream>,
    /// Spawned sends report back through this channel
    completion_sender: CompletionSender,
    completion_receiver: CompletionReceiver,
    /// Channel for publishing app events to consumers
    app_event_sender: AppEventSender,
    state_sender: watch::Sender<ConnectionState>,
    /// Whether the task should continue running
    running: bool,
}

impl EngineTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: SessionState,
        transport: Arc<dyn TransportAdapter>,
        time_source: Arc<dyn TimeSource>,
        command_receiver: CommandReceiver,
        completion_sender: CompletionSender,
        completion_receiver: CompletionReceiver,
        app_event_sender: AppEventSender,
        state_sender: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            state,
            transport,
            time_source,
            command_receiver,
            status_receiver: None,
            inbound_receiver: None,
            completion_sender,
            completion_receiver,
            app_event_sender,
            state_sender,
            running: true,
        }
    }

    /// Run the engine loop until shutdown or until every handle is dropped
    pub async fn run(mut self) -> EngineStats {
        info!(transport = self.transport.name(), "Engine task starting");

        while self.running {
            let timer = self.next_deadline().map(|deadline| {
                deadline.duration_since(self.time_source.now())
            });

            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.process_command(command).await,
                        None => {
                            info!("All engine handles dropped, shutting down");
                            self.running = false;
                        }
                    }
                }

                status = recv_or_pending(&mut self.status_receiver) => {
                    let status = status.unwrap_or_else(|| {
                        self.status_receiver = None;
                        TransportStatus::dropped("status stream ended")
                    });
                    self.process_status(status).await;
                }

                raw = recv_or_pending(&mut self.inbound_receiver) => {
                    match raw {
                        Some(raw) => {
                            self.state.stats.inbound_processed += 1;
                            let now = self.time_source.now();
                            match EngineHandlers::handle_inbound(&mut self.state, raw, now) {
                                Ok(outcome) => self.apply(outcome).await,
                                Err(e) => self.handle_error("inbound activity", e),
                            }
                        }
                        None => {
                            debug!("Inbound stream ended");
                            self.inbound_receiver = None;
                        }
                    }
                }

                Some(completion) = self.completion_receiver.recv() => {
                    self.state.stats.completions_processed += 1;
                    let outcome = EngineHandlers::handle_send_completed(&mut self.state, completion);
                    self.apply(outcome).await;
                }

                _ = sleep_or_pending(timer) => {
                    let now = self.time_source.now();
                    let outcome = EngineHandlers::handle_timers(&mut self.state, now);
                    self.apply(outcome).await;
                }
            }
        }

        self.shutdown().await;
        info!("Engine task stopped");
        self.state.stats
    }

    /// Earliest deadline across echo timeouts, deferred replies and reconnects
    fn next_deadline(&self) -> Option<Timestamp> {
        [
            self.state.outgoing.next_deadline(&self.state.ledger),
            self.state.ordering.next_deadline(),
            self.state.supervisor.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Process a command and apply its outcome
    async fn process_command(&mut self, command: Command) {
        self.state.stats.commands_processed += 1;
        debug!(command = command.name(), "Processing command");
        let now = self.time_source.now();

        let outcome = match command {
            Command::Connect => EngineHandlers::handle_connect(&mut self.state, now),
            Command::Disconnect => EngineHandlers::handle_disconnect(&mut self.state, now),
            Command::Submit { draft, responder } => {
                match EngineHandlers::handle_submit(&mut self.state, draft, now) {
                    Ok((handle, outcome)) => {
                        let _ = responder.send(Ok(handle));
                        outcome
                    }
                    Err(e) => {
                        debug!(error = %e, "Submission rejected");
                        let _ = responder.send(Err(e));
                        Outcome::default()
                    }
                }
            }
            Command::Resubmit {
                client_id,
                responder,
            } => match EngineHandlers::handle_resubmit(&mut self.state, &client_id, now) {
                Ok((handle, outcome)) => {
                    let _ = responder.send(Ok(handle));
                    outcome
                }
                Err(e) => {
                    debug!(client_id = %client_id, error = %e, "Resubmission rejected");
                    let _ = responder.send(Err(e));
                    Outcome::default()
                }
            },
            Command::Cancel {
                client_id,
                responder,
            } => {
                let (cancelled, outcome) = EngineHandlers::handle_cancel(&mut self.state, &client_id);
                let _ = responder.send(cancelled);
                outcome
            }
            Command::SubscribeDelivered { responder } => {
                let _ = responder.send(self.state.history.subscribe());
                Outcome::default()
            }
            Command::GetStatus { responder } => {
                let _ = responder.send(self.state.status());
                Outcome::default()
            }
            Command::Shutdown => {
                self.running = false;
                Outcome::default()
            }
        };

        self.apply(outcome).await;
    }

    async fn process_status(&mut self, status: TransportStatus) {
        self.state.stats.status_events_processed += 1;
        debug!(?status, "Transport status");
        let now = self.time_source.now();
        let outcome = EngineHandlers::handle_transport_status(&mut self.state, status, now);
        self.apply(outcome).await;
    }

    /// Publish events, then execute effects; effects may feed back more work
    async fn apply(&mut self, outcome: Outcome) {
        let mut queue = VecDeque::from([outcome]);

        while let Some(Outcome { effects, events }) = queue.pop_front() {
            for event in events {
                self.dispatch_app_event(event);
            }
            for effect in effects {
                if let Some(feedback) = self.execute_effect(effect).await {
                    queue.push_back(feedback);
                }
            }
        }
    }

    /// Execute an effect against the transport
    async fn execute_effect(&mut self, effect: Effect) -> Option<Outcome> {
        self.state.stats.effects_executed += 1;

        match effect {
            Effect::OpenTransport => match self.open_transport().await {
                Ok(()) => None,
                Err(e) => {
                    warn!(transport = self.transport.name(), error = %e, "Failed to open transport");
                    let now = self.time_source.now();
                    Some(EngineHandlers::handle_transport_status(
                        &mut self.state,
                        TransportStatus::error(e.to_string()),
                        now,
                    ))
                }
            },
            Effect::CloseTransport => {
                self.status_receiver = None;
                self.inbound_receiver = None;
                self.transport.close().await;
                None
            }
            Effect::Transmit { client_id, payload } => {
                let transport = Arc::clone(&self.transport);
                let completions = self.completion_sender.clone();
                tokio::spawn(async move {
                    let result = transport.send(payload).await;
                    let _ = completions.send(SendCompletion { client_id, result });
                });
                None
            }
        }
    }

    async fn open_transport(&mut self) -> Result<(), TransportError> {
        // Inbound first so nothing sent right after `Ready` is missed
        let inbound = self.transport.inbound_events().await?;
        let status = self.transport.status_events().await?;
        self.inbound_receiver = Some(inbound);
        self.status_receiver = Some(status);
        Ok(())
    }

    /// Route an app event to its subscribers and broadcast it
    fn dispatch_app_event(&mut self, event: AppEvent) {
        match &event {
            AppEvent::DeliveryStatusChanged { client_id, update } => {
                if let Some(subscriber) = self.state.subscribers.get(client_id) {
                    let _ = subscriber.send(update.clone());
                }
                if update.is_terminal() {
                    self.state.subscribers.remove(client_id);
                }
            }
            AppEvent::ActivityDelivered(activity) => {
                self.state.history.push(activity.clone());
            }
            AppEvent::ConnectionStateChanged { to, .. } => {
                self.state_sender.send_replace(*to);
            }
            AppEvent::Diagnostic(_) => {}
        }

        // Nobody listening is fine
        let _ = self.app_event_sender.send(event);
        self.state.stats.app_events_emitted += 1;
    }

    fn handle_error(&mut self, context: &str, e: CourierError) {
        match e {
            // Unrecoverable errors: shut down the task
            CourierError::Channel { .. } | CourierError::Configuration { .. } => {
                error!("Unrecoverable error processing {}, shutting down engine: {}", context, e);
                self.running = false;
            }
            _ => warn!("Error processing {}: {}", context, e),
        }
    }

    /// Close the session: fail what is pending and release the transport
    async fn shutdown(&mut self) {
        let state = self.state.supervisor.state();
        if state.is_active() || state == ConnectionState::Failed {
            let now = self.time_source.now();
            let outcome = EngineHandlers::handle_disconnect(&mut self.state, now);
            self.apply(outcome).await;
        }
        self.transport.close().await;
        // Dropping the remaining senders resolves their handles as lost
        self.state.subscribers.clear();
    }
}

async fn recv_or_pending<T>(receiver: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => pending().await,
    }
}

async fn sleep_or_pending(delay: Option<std::time::Duration>) {
    match delay {
        Some(delay) => sleep(delay).await,
        None => pending().await,
    }
}
