//! A lightweight actor runtime.
//!
//! An actor owns a piece of state and handles the messages in its mailbox
//! one at a time on a dedicated tokio task. Plain [`Message`]s mutate the
//! state synchronously. [`AsyncMessage`]s may await while holding the
//! state, and the mailbox is not drained any further until they finish,
//! which makes an actor a natural single-consumer work queue.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod error;
mod handle;
mod mailbox;
mod scheduler;

pub use error::ActorDeadError;
pub use handle::Actor;
pub use mailbox::{Answer, AsyncMessage, HandlerFuture, Message, Reply};
