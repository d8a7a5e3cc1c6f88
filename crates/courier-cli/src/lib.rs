//! Courier CLI library
//!
//! Command-line front end for the Courier engine, talking to the in-process
//! loopback service.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;

pub use app::CourierApp;
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
