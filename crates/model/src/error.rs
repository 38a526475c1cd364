use std::error::Error;

/// The kind of error that occurred while talking to the chat backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The backend could not be reached.
    Network,
    /// The backend failed to process the request.
    Server,
    /// The backend is temporarily unavailable.
    ServiceUnavailable,
    /// Too many requests were sent.
    RateLimited,
    /// The request was cancelled through its token.
    Cancelled,
    /// Any other errors.
    Other,
}

/// The error type for a transport.
pub trait TransportError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}
