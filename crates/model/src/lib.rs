//! Shared vocabulary of the TripAgent conversation core.
//!
//! This crate defines the conversation data model, the typed tool calls
//! reported by the chat backend, and the protocol a transport must follow
//! to carry a conversation to the backend and back.
//!
//! Types in this crate don't define any behavior beyond construction and
//! conversion, the queues and managers built on top of them live in their
//! own crate.

#![deny(missing_docs)]

mod context;
mod conversation;
mod error;
mod tool;
mod transport;

pub use context::*;
pub use conversation::*;
pub use error::*;
pub use tool::*;
pub use transport::*;
