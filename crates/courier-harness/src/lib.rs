//! Courier Harness
//!
//! In-process [`TransportAdapter`](courier_core::TransportAdapter)
//! implementations for driving the engine without a network:
//!
//! - [`ScriptedTransport`]: every status change, inbound item and failure is
//!   scripted by a test through its [`TransportController`]
//! - [`LoopbackTransport`]: a simulated service that echoes sends and lets a
//!   bot answer them, with configurable latency and faults

pub mod loopback;
pub mod scripted;

pub use loopback::{LoopbackConfig, LoopbackTransport};
pub use scripted::{bot_message, bot_reply, echo_of, ScriptedConfig, ScriptedTransport, TransportController};
