//! Event notifications for conversation state changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tripagent_model::{ConversationId, Message};

use crate::response_queue::QueuedResponse;

const DEFAULT_CAPACITY: usize = 256;

/// Something that happened to a conversation.
#[derive(Clone, Debug, PartialEq)]
pub enum ConversationEvent {
    /// A request started, finished or reported progress.
    LoadingChanged {
        /// The conversation the request belongs to.
        conversation_id: ConversationId,
        /// Whether a request is now pending.
        is_loading: bool,
        /// The current status line while loading.
        status: Option<String>,
    },
    /// A transport call completed successfully.
    ResponseReceived {
        /// The conversation the request belongs to.
        conversation_id: ConversationId,
        /// The response as returned by the request queue.
        response: QueuedResponse,
    },
    /// A message was persisted and added to the cache.
    MessageAdded {
        /// The persisted conversation the message was added to.
        conversation_id: ConversationId,
        /// The new message.
        message: Message,
    },
    /// The active conversation changed.
    ConversationSwitched {
        /// The new active conversation.
        conversation_id: ConversationId,
    },
}

/// Fans events out to every [`EventStream`].
#[derive(Clone, Debug)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<ConversationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[inline]
    pub fn emit(&self, event: ConversationEvent) {
        trace!("emit: {event:?}");
        // No subscriber is not an error.
        self.tx.send(event).ok();
    }

    #[inline]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A subscription to conversation events. Dropping it unsubscribes.
///
/// A subscriber that falls too far behind skips the oldest events.
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<ConversationEvent>,
}

impl EventStream {
    /// Waits for the next event. Returns `None` once the manager has been
    /// dropped.
    pub async fn recv(&mut self) -> Option<ConversationEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("event subscriber lagged, skipped {skipped} events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event if one is ready.
    pub fn try_recv(&mut self) -> Option<ConversationEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("event subscriber lagged, skipped {skipped} events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => {
                    return None;
                }
            }
        }
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A set of callbacks that can be invoked together.
pub(crate) struct Observers<T> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(vec![]),
        })
    }

    pub fn add(
        self: &Arc<Self>,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(callback)));

        let observers: Weak<Self> = Arc::downgrade(self);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(observers) = observers.upgrade() {
                    observers.lock().retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn notify(&self, value: &T) {
        // Callbacks run outside the lock so they may unsubscribe.
        let callbacks: Vec<_> =
            self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in callbacks {
            callback(value);
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Callback<T>)>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a callback registered. Dropping it unregisters the callback.
#[must_use = "the callback is unregistered when the subscription is dropped"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unregisters the callback now.
    #[inline]
    pub fn unsubscribe(mut self) {
        self.run_unsubscribe();
    }

    fn run_unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_unsubscribe();
    }
}
