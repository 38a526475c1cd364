//! Conversation queues of TripAgent.
//!
//! [`RequestQueue`] keeps at most one request in flight per conversation,
//! [`ResponseQueue`] turns completed responses into messages one at a time,
//! and [`ConversationManager`] ties both to persistence and exposes the
//! state to the user interface.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod error;
mod error_text;
mod events;
mod manager;
mod request_queue;
mod response_queue;
mod storage;
mod transport_client;
mod trip_context;

pub use error::{CacheError, Error, StorageError};
pub use error_text::user_facing_error;
pub use events::{ConversationEvent, EventStream, Subscription};
pub use manager::{ConversationManager, ConversationManagerBuilder, ManagerState};
pub use request_queue::{QueuedRequest, RequestQueue};
pub use response_queue::{
    Delivered, QueuedResponse, ResponseProcessor, ResponseQueue,
};
pub use storage::{MemoryStorage, Storage, append_messages, new_conversation_for};
pub use trip_context::{CacheUpdater, NoopCache, TripContextCache, TripSummary};
