//! Engine Logic Module
//!
//! The engine task implementation split into focused components:
//! - `state`: session state and statistics
//! - `handlers`: command, status, inbound and timer handlers
//! - `task`: the `EngineTask` event loop that executes their outcomes
//!
//! ## Single Serialized Task
//!
//! All session state is owned by one `EngineTask`. Commands from engine
//! handles, transport status changes, inbound activities, send completions
//! and timer expiries are processed one at a time in a single `select!` loop,
//! so ledger, pipeline and supervisor updates never interleave and need no
//! locks. Handlers are synchronous and return an `Outcome`: the app events to
//! publish and the transport effects to execute. Only the task performs I/O,
//! and transport sends run in spawned tasks that report back through the
//! completion channel.

pub mod handlers;
pub mod state;
pub mod task;

pub use handlers::{EngineHandlers, Outcome};
pub use state::{EngineStats, SessionState};
pub use task::EngineTask;
