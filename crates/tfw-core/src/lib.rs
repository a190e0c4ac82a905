//! Core domain and application logic for the Telegram forwarder.
//!
//! Framework-agnostic: the Telegram API and the SQL store live behind ports
//! (traits) implemented in adapter crates.

pub mod clock;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod links;
pub mod logging;
pub mod ports;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
