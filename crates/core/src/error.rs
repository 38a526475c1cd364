use thiserror::Error;
use tripagent_actor::ActorDeadError;

/// Errors returned by the conversation queues and the manager.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was aborted or replaced by a newer request for the same
    /// conversation.
    #[error("request was cancelled")]
    Cancelled,
    /// The queues have been shut down.
    #[error("conversation queues have stopped")]
    QueueClosed,
    /// The storage collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The cache collaborator failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl Error {
    /// Returns `true` for [`Error::Cancelled`].
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<ActorDeadError> for Error {
    #[inline]
    fn from(_: ActorDeadError) -> Self {
        Error::QueueClosed
    }
}

/// Errors returned by a [`Storage`](crate::Storage) implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The conversation does not exist.
    #[error("conversation not found: {0}")]
    NotFound(String),
    /// Reading or writing the backing store failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The stored data could not be encoded or decoded.
    #[error("invalid stored data: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error returned by a [`CacheUpdater`](crate::CacheUpdater).
#[derive(Debug, Error)]
#[error("cache update failed: {message}")]
pub struct CacheError {
    message: String,
}

impl CacheError {
    /// Creates an error with the specified message.
    #[inline]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}
