use std::sync::Arc;

use tripagent_model::Transport;

use super::ConversationManager;
use crate::storage::{MemoryStorage, Storage};
use crate::transport_client::TransportClient;
use crate::trip_context::{CacheUpdater, NoopCache};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// [`ConversationManager`] builder.
pub struct ConversationManagerBuilder {
    pub(crate) transport: TransportClient,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) cache: Arc<dyn CacheUpdater>,
    pub(crate) event_capacity: usize,
}

impl ConversationManagerBuilder {
    /// Creates a new builder with the specified transport, keeping
    /// conversations in memory.
    #[inline]
    pub fn with_transport<T: Transport + 'static>(transport: T) -> Self {
        Self {
            transport: TransportClient::new(transport),
            storage: Arc::new(MemoryStorage::default()),
            cache: Arc::new(NoopCache),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets where conversations are persisted.
    #[inline]
    pub fn with_storage<S: Storage + 'static>(mut self, storage: S) -> Self {
        self.storage = Arc::new(storage);
        self
    }

    /// Sets a storage that is also used elsewhere.
    #[inline]
    pub fn with_shared_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the cache refreshed after every delivered response.
    #[inline]
    pub fn with_cache_updater(mut self, cache: Arc<dyn CacheUpdater>) -> Self {
        self.cache = cache;
        self
    }

    /// Sets how many events a slow subscriber may fall behind before it
    /// starts missing them.
    #[inline]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Builds the manager. Must be called within a tokio runtime.
    #[inline]
    pub fn build(self) -> ConversationManager {
        ConversationManager::spawn_from_builder(self)
    }
}
