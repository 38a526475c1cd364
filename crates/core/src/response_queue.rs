//! Ordered delivery of completed responses.

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use tripagent_actor::{
    Actor, AsyncMessage, HandlerFuture, Message as ActorMessage, Reply,
};
use tripagent_model::{
    ConversationId, Message, Photo, ToolCall, TransportResponse,
};

use crate::error::Error;
use crate::error_text::user_facing_error;

/// A response waiting to be turned into messages.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueuedResponse {
    /// The conversation the response belongs to.
    pub conversation_id: ConversationId,
    /// The response text. Empty for failed requests.
    pub response: String,
    /// The response split into separately rendered chunks.
    pub segments: Option<Vec<String>>,
    /// Photos to attach to the last message.
    pub photos: Vec<Photo>,
    /// Tools the backend ran for this response.
    pub tools_used: Vec<ToolCall>,
    /// The raw error text of a failed request.
    pub error: Option<String>,
}

impl QueuedResponse {
    /// Wraps a transport response.
    pub fn from_transport(
        conversation_id: ConversationId,
        resp: TransportResponse,
    ) -> Self {
        Self {
            conversation_id,
            response: resp.text,
            segments: resp.segments,
            photos: resp.photos,
            tools_used: resp.tools_used,
            error: resp.error,
        }
    }

    /// Creates an error-shaped response.
    pub fn error<S: Into<String>>(
        conversation_id: ConversationId,
        error: S,
    ) -> Self {
        Self {
            conversation_id,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Returns `true` if the response describes a failed request.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Converts the response into the messages to display.
    ///
    /// A failed request becomes a single error message. A response with
    /// several segments becomes one message per segment, with the photos
    /// on the last one. Anything else becomes a single message.
    pub fn to_messages(&self) -> Vec<Message> {
        if let Some(error) = &self.error {
            return vec![Message::assistant(user_facing_error(error)).into_error()];
        }

        match self.segments.as_deref() {
            Some(segments) if segments.len() > 1 => {
                let last = segments.len() - 1;
                segments
                    .iter()
                    .enumerate()
                    .map(|(idx, segment)| {
                        let msg = Message::assistant(segment.as_str());
                        if idx == last {
                            msg.with_photos(self.photos.clone())
                        } else {
                            msg
                        }
                    })
                    .collect()
            }
            Some([segment]) if self.response.is_empty() => {
                vec![
                    Message::assistant(segment.as_str())
                        .with_photos(self.photos.clone()),
                ]
            }
            _ => vec![
                Message::assistant(self.response.as_str())
                    .with_photos(self.photos.clone()),
            ],
        }
    }
}

/// Persists the messages built from each response and refreshes derived
/// state afterwards.
#[async_trait]
pub trait ResponseProcessor: Send + Sync {
    /// Persists new messages. Returns the identity of the persisted
    /// conversation, which differs from `conversation_id` when a default
    /// conversation was stored for the first time.
    async fn on_message_created(
        &self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Result<ConversationId, Error>;

    /// Refreshes derived state after the messages have been persisted.
    async fn on_cache_update(
        &self,
        conversation_id: &ConversationId,
        response: &QueuedResponse,
    ) -> Result<(), Error>;
}

/// The outcome of delivering one response.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivered {
    /// The persisted conversation the messages were added to.
    pub conversation_id: ConversationId,
    /// The created messages, in display order.
    pub messages: Vec<Message>,
}

struct ResponseQueueState {
    processor: Arc<dyn ResponseProcessor>,
    delivered: u64,
}

impl ResponseQueueState {
    async fn deliver(
        &mut self,
        response: QueuedResponse,
    ) -> Result<Delivered, Error> {
        let messages = response.to_messages();
        trace!(
            "delivering {} messages for {}",
            messages.len(),
            response.conversation_id
        );
        let conversation_id = self
            .processor
            .on_message_created(&response.conversation_id, &messages)
            .await?;
        self.processor
            .on_cache_update(&conversation_id, &response)
            .await?;
        self.delivered += 1;
        Ok(Delivered {
            conversation_id,
            messages,
        })
    }
}

/// Converts responses into messages one at a time, in the order they were
/// enqueued.
///
/// Enqueueing never waits for the queue to drain. Responses are handed to
/// the [`ResponseProcessor`] strictly sequentially: the next response is
/// only taken once both callbacks for the previous one have completed.
#[derive(Clone)]
pub struct ResponseQueue {
    actor: Actor<ResponseQueueState>,
}

impl ResponseQueue {
    /// Spawns a queue on the current tokio runtime.
    pub fn new(processor: Arc<dyn ResponseProcessor>) -> Self {
        let state = ResponseQueueState {
            processor,
            delivered: 0,
        };
        Self {
            actor: Actor::spawn(state, Some("response queue")),
        }
    }

    /// Appends a response to the queue.
    ///
    /// The response is queued before this method returns. The returned
    /// future resolves once the response has been delivered, with the
    /// error of the processor if it failed.
    pub fn enqueue(
        &self,
        response: QueuedResponse,
    ) -> impl Future<Output = Result<Delivered, Error>> + Send + 'static {
        let (reply, answer) = Reply::channel();
        let queued = self.actor.send_async(Deliver { response, reply });
        async move {
            queued?;
            answer.await?
        }
    }

    /// Returns how many responses have been delivered successfully.
    pub async fn delivered_count(&self) -> Result<u64, Error> {
        Ok(self.actor.ask(DeliveredCount).await?)
    }

    /// Stops the queue. Responses still buffered are dropped.
    pub fn shutdown(&self) {
        self.actor.try_kill();
    }
}

impl Debug for ResponseQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseQueue")
            .field("alive", &self.actor.is_alive())
            .finish()
    }
}

#[derive(Debug)]
struct Deliver {
    response: QueuedResponse,
    reply: Reply<Result<Delivered, Error>>,
}

impl AsyncMessage<ResponseQueueState> for Deliver {
    fn handle<'a>(
        self: Box<Self>,
        state: &'a mut ResponseQueueState,
        _handle: &'a Actor<ResponseQueueState>,
    ) -> HandlerFuture<'a> {
        let Deliver { response, reply } = *self;
        Box::pin(async move {
            let result = state.deliver(response).await;
            if let Err(err) = &result {
                warn!("failed to deliver a response: {err}");
            }
            reply.send(result);
        })
    }
}

#[derive(Debug)]
struct DeliveredCount(Reply<u64>);

impl ActorMessage<ResponseQueueState> for DeliveredCount {
    fn handle(
        self,
        state: &mut ResponseQueueState,
        _handle: &Actor<ResponseQueueState>,
    ) {
        self.0.send(state.delivered);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::error::StorageError;

    #[derive(Default)]
    struct RecordingProcessor {
        calls: Mutex<Vec<String>>,
        busy: AtomicBool,
        overlapped: AtomicBool,
        fail_on: Option<String>,
    }

    impl RecordingProcessor {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResponseProcessor for RecordingProcessor {
        async fn on_message_created(
            &self,
            conversation_id: &ConversationId,
            messages: &[Message],
        ) -> Result<ConversationId, Error> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            // Give a concurrent drain the chance to show up.
            sleep(Duration::from_millis(5)).await;
            self.busy.store(false, Ordering::SeqCst);

            let content = messages[0].content.clone();
            self.calls
                .lock()
                .unwrap()
                .push(format!("created:{content}"));
            if self.fail_on.as_deref() == Some(content.as_str()) {
                return Err(StorageError::NotFound(content).into());
            }
            Ok(conversation_id.clone())
        }

        async fn on_cache_update(
            &self,
            _conversation_id: &ConversationId,
            response: &QueuedResponse,
        ) -> Result<(), Error> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("cache:{}", response.response));
            Ok(())
        }
    }

    fn response(id: &str, text: &str) -> QueuedResponse {
        QueuedResponse::from_transport(
            ConversationId::new(id),
            TransportResponse::with_text(text),
        )
    }

    #[test]
    fn test_error_response_becomes_one_message() {
        let resp = QueuedResponse::error(
            ConversationId::new("x"),
            "Network request failed",
        );
        let messages = resp.to_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_error);
        assert!(messages[0].content.contains("internet connection"));
    }

    #[test]
    fn test_photos_go_on_last_segment() {
        let photo = Photo::with_url("https://example.com/half-dome.jpg");
        let resp = QueuedResponse {
            response: "Part 1 Part 2".to_owned(),
            segments: Some(vec!["Part 1".to_owned(), "Part 2".to_owned()]),
            photos: vec![photo.clone()],
            ..Default::default()
        };
        let messages = resp.to_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Part 1");
        assert!(messages[0].photos.is_empty());
        assert_eq!(messages[1].content, "Part 2");
        assert_eq!(messages[1].photos, vec![photo]);
        assert_ne!(messages[0].id, messages[1].id);
    }

    #[test]
    fn test_single_segment() {
        let resp = QueuedResponse {
            segments: Some(vec!["Only part".to_owned()]),
            ..Default::default()
        };
        let messages = resp.to_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Only part");

        let messages = response("a", "Yosemite is...").to_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Yosemite is...");
        assert!(!messages[0].is_error);
    }

    #[tokio::test]
    async fn test_deliver_in_order_without_overlap() {
        let processor = Arc::new(RecordingProcessor::default());
        let queue = ResponseQueue::new(processor.clone());

        let first = queue.enqueue(response("a", "r1"));
        let second = queue.enqueue(response("b", "r2"));
        let third = queue.enqueue(response("a", "r3"));
        // Await out of order, delivery order is fixed at enqueue time.
        let third = third.await.unwrap();
        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert_eq!(first.conversation_id, ConversationId::new("a"));
        assert_eq!(second.messages[0].content, "r2");
        assert_eq!(third.messages[0].content, "r3");
        assert_eq!(
            processor.calls(),
            vec![
                "created:r1",
                "cache:r1",
                "created:r2",
                "cache:r2",
                "created:r3",
                "cache:r3"
            ]
        );
        assert!(!processor.overlapped.load(Ordering::SeqCst));
        assert_eq!(queue.delivered_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_processor_error_skips_cache_update() {
        let processor = Arc::new(RecordingProcessor {
            fail_on: Some("broken".to_owned()),
            ..Default::default()
        });
        let queue = ResponseQueue::new(processor.clone());

        let err = queue.enqueue(response("a", "broken")).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::NotFound(_))));

        // The queue keeps draining after a failure.
        queue.enqueue(response("a", "fine")).await.unwrap();
        assert_eq!(
            processor.calls(),
            vec!["created:broken", "created:fine", "cache:fine"]
        );
    }

    #[tokio::test]
    async fn test_shutdown() {
        let queue = ResponseQueue::new(Arc::new(RecordingProcessor::default()));
        queue.shutdown();
        sleep(Duration::from_millis(5)).await;
        let err = queue.enqueue(response("a", "late")).await.unwrap_err();
        assert!(matches!(err, Error::QueueClosed));
    }
}
