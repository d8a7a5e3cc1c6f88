//! Stateful managers for the Courier runtime
//!
//! - `connection`: connection supervision, backoff timing and audit trail
//! - `history`: replayable record of delivered activities

pub mod connection;
pub mod history;

pub use connection::{ConnectionSupervisor, ScheduledRetry, SupervisorStep};
pub use history::DeliveredHistory;
