//! TripAgent, a trip-planning assistant for the terminal.
//!
//! The crate wires the conversation queues to the HTTP backend and a
//! file-backed conversation store. It can also be used as a library to
//! embed the same setup in other hosts.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod config;
mod storage;

pub use config::{AppConfig, ConfigError};
pub use storage::FileStorage;

/// Re-exports of [`tripagent_core`] crate.
pub mod core {
    pub use tripagent_core::*;
}

/// Re-exports of [`tripagent_model`] crate.
pub mod model {
    pub use tripagent_model::*;
}
