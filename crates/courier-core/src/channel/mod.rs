//! Channel Module
//!
//! Message-passing infrastructure between consumers, the engine task and the
//! transport:
//! - `communication`: commands, effects, app events and diagnostics
//! - `utils`: channel constructors and consumer-side receivers

pub mod communication;
pub mod utils;

pub use communication::{AppEvent, Command, Diagnostic, Effect, EngineStatus, SendCompletion};

pub use crate::config::ChannelConfig;

pub use utils::{
    create_app_event_channel, create_command_channel, create_completion_channel,
    create_inbound_channel, create_status_channel, create_update_channel, AppEventReceiver,
    AppEventSender, CommandReceiver, CommandSender, CompletionReceiver, CompletionSender,
    DeliveredFeed, InboundReceiver, InboundSender, StatusReceiver, StatusSender, SubmitHandle,
    UpdateReceiver, UpdateSender,
};
