use std::borrow::Cow;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::context::ChatContext;
use crate::conversation::{ApiMessage, Photo};
use crate::error::TransportError;
use crate::tool::{ToolCall, ToolKind};

/// Progress reported by a transport while a request is in flight.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TransportStatus {
    /// The model is generating.
    Thinking,
    /// A free-form status line from the backend.
    Message(String),
    /// The backend started running a tool.
    ToolStarted(ToolKind),
}

impl TransportStatus {
    /// Returns the human-readable status line.
    pub fn label(&self) -> Cow<'_, str> {
        match self {
            TransportStatus::Thinking => Cow::Borrowed("Thinking..."),
            TransportStatus::Message(msg) => Cow::Borrowed(msg),
            TransportStatus::ToolStarted(kind) => {
                Cow::Borrowed(kind.status_label())
            }
        }
    }
}

/// Receives status updates of a request.
pub type StatusSink = Arc<dyn Fn(TransportStatus) + Send + Sync>;

/// A request to be carried to the chat backend.
#[derive(Clone)]
pub struct TransportRequest {
    /// The conversation history, oldest first, ending with the new user
    /// message.
    pub messages: Vec<ApiMessage>,
    /// Context of the user and the trip.
    pub context: ChatContext,
    /// Where mid-flight status updates should go.
    pub on_status: StatusSink,
    /// Cancelled when the caller is no longer interested in the response.
    ///
    /// Transports must observe the token and abort the underlying
    /// connection once it fires.
    pub cancel: CancellationToken,
}

impl TransportRequest {
    /// Creates a request with a fresh token and no status receiver.
    pub fn new(messages: Vec<ApiMessage>, context: ChatContext) -> Self {
        Self {
            messages,
            context,
            on_status: Arc::new(|_| {}),
            cancel: CancellationToken::new(),
        }
    }

    /// Reports a status update to the requester.
    #[inline]
    pub fn report(&self, status: TransportStatus) {
        (self.on_status)(status);
    }
}

impl Debug for TransportRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRequest")
            .field("messages", &self.messages)
            .field("context", &self.context)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A completely received response from the chat backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransportResponse {
    /// The full response text.
    pub text: String,
    /// The text split into separately rendered chunks, if the backend
    /// did so.
    pub segments: Option<Vec<String>>,
    /// Photos to show with the response.
    pub photos: Vec<Photo>,
    /// Tools the backend ran to produce the response.
    pub tools_used: Vec<ToolCall>,
    /// An error reported inside an otherwise successful exchange.
    pub error: Option<String>,
}

impl TransportResponse {
    /// Creates a plain text response.
    #[inline]
    pub fn with_text<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A way of reaching the chat backend.
///
/// Once created, a transport should behave like a stateless object. It
/// can keep internal state such as a connection pool, but callers should
/// not rely on it.
pub trait Transport: Send + Sync {
    /// The error type that may be returned by the transport.
    type Error: TransportError;

    /// Sends the conversation and waits for the complete response.
    ///
    /// The returned future must not borrow `self`. It should resolve soon
    /// after `req.cancel` fires, with an error of kind
    /// [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled).
    fn send(
        &self,
        req: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, Self::Error>> + Send + 'static;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_status_label() {
        assert_eq!(TransportStatus::Thinking.label(), "Thinking...");
        assert_eq!(
            TransportStatus::ToolStarted(ToolKind::SearchHotels).label(),
            "Searching hotels..."
        );
        assert_eq!(
            TransportStatus::Message("Comparing fares".to_owned()).label(),
            "Comparing fares"
        );
    }

    #[test]
    fn test_report_status() {
        let seen = Arc::new(Mutex::new(vec![]));
        let mut req = TransportRequest::new(vec![], ChatContext::default());
        req.on_status = {
            let seen = Arc::clone(&seen);
            Arc::new(move |status| seen.lock().unwrap().push(status))
        };
        req.report(TransportStatus::Thinking);
        assert_eq!(*seen.lock().unwrap(), vec![TransportStatus::Thinking]);
    }
}
