mod builder;
mod processor;
#[cfg(test)]
mod tests;
mod view;

use std::collections::HashMap;
use std::slice;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;
use tripagent_actor::Actor;
use tripagent_model::{
    ApiMessage, ChatContext, Conversation, ConversationId, Message,
};

pub use builder::ConversationManagerBuilder;
use processor::ManagerProcessor;
use view::{
    AdoptDefault, RemoveConversation, ReplaceConversations, SetActive,
    Snapshot, ViewState,
};

use crate::error::Error;
use crate::events::{
    ConversationEvent, EventBus, EventStream, Observers, Subscription,
};
use crate::request_queue::{QueuedRequest, RequestQueue};
use crate::response_queue::{QueuedResponse, ResponseProcessor, ResponseQueue};

/// A snapshot of everything the manager knows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ManagerState {
    /// The conversation new messages go to by default.
    pub active_conversation: ConversationId,
    /// Cached conversations, most recently updated first.
    pub conversations: Vec<Conversation>,
    /// The status line of every conversation with a request in flight.
    pub loading: HashMap<ConversationId, String>,
    /// Whether any request is in flight.
    pub has_pending: bool,
}

impl ManagerState {
    /// Returns the cached active conversation.
    pub fn active(&self) -> Option<&Conversation> {
        let id = self.active_conversation.as_str()?;
        self.conversations.iter().find(|conv| conv.id == id)
    }

    /// Returns `true` if a request is in flight for the conversation.
    #[inline]
    pub fn is_loading(&self, conversation_id: &ConversationId) -> bool {
        self.loading.contains_key(conversation_id)
    }
}

struct Inner {
    request_queue: RequestQueue,
    response_queue: ResponseQueue,
    view: Actor<ViewState>,
    processor: Arc<ManagerProcessor>,
    events: EventBus,
    observers: Arc<Observers<ManagerState>>,
    notifier: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.notifier.abort();
    }
}

/// Composes the request and response queues with persistence and a view
/// of the conversations.
///
/// Sending a message persists it, sends the conversation to the backend,
/// and delivers the response as one or more assistant messages. Each
/// conversation has at most one request in flight. Sending again to the
/// same conversation aborts the previous request, while switching between
/// conversations leaves them running.
///
/// Cloned managers share the same state. Every method must be called
/// within a tokio runtime.
#[derive(Clone)]
pub struct ConversationManager {
    inner: Arc<Inner>,
}

impl ConversationManager {
    fn spawn_from_builder(builder: ConversationManagerBuilder) -> Self {
        let ConversationManagerBuilder {
            transport,
            storage,
            cache,
            event_capacity,
        } = builder;

        let events = EventBus::new(event_capacity);
        let view =
            Actor::spawn(ViewState::default(), Some("conversation view"));
        let processor = Arc::new(ManagerProcessor {
            storage,
            cache,
            view: view.clone(),
            events: events.clone(),
        });
        let request_queue = RequestQueue::new(transport, events.clone());
        let response_queue = ResponseQueue::new(
            Arc::clone(&processor) as Arc<dyn ResponseProcessor>
        );
        let observers = Observers::new();
        let notifier = tokio::spawn(
            notify_state_changes(
                events.subscribe(),
                request_queue.clone(),
                view.clone(),
                Arc::clone(&observers),
            )
            .instrument(trace_span!("state notifier")),
        );

        Self {
            inner: Arc::new(Inner {
                request_queue,
                response_queue,
                view,
                processor,
                events,
                observers,
                notifier,
            }),
        }
    }

    /// Sends a user message and waits for the assistant's response.
    ///
    /// The user message is persisted before the backend is called. When
    /// sent to the default conversation, the conversation created for it
    /// becomes active. `existing_messages` is the history sent along with
    /// the new message, error messages excluded.
    ///
    /// Transport failures are delivered as an error message and returned
    /// as an error-shaped response. If the request is aborted or replaced
    /// by a newer one, [`Error::Cancelled`] is returned and no assistant
    /// message is created.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        context: ChatContext,
        existing_messages: &[Message],
    ) -> Result<QueuedResponse, Error> {
        let inner = &self.inner;
        let user_message = Message::user(content);
        let resolved = inner
            .processor
            .on_message_created(
                &conversation_id,
                slice::from_ref(&user_message),
            )
            .await?;

        if conversation_id.is_default() {
            let adopted = inner
                .view
                .ask(|reply| AdoptDefault {
                    resolved: resolved.clone(),
                    reply,
                })
                .await?;
            if adopted {
                inner.events.emit(ConversationEvent::ConversationSwitched {
                    conversation_id: resolved.clone(),
                });
            }
        }

        let mut history: Vec<ApiMessage> = existing_messages
            .iter()
            .filter(|msg| !msg.is_error)
            .map(ApiMessage::from)
            .collect();
        history.push(ApiMessage::from(&user_message));

        let request = QueuedRequest::new(conversation_id, history, context);
        let mut response = inner.request_queue.enqueue(request).await?;
        response.conversation_id = resolved;

        let delivered = inner.response_queue.enqueue(response.clone()).await?;
        debug!(
            "delivered {} messages to {}",
            delivered.messages.len(),
            delivered.conversation_id
        );
        Ok(response)
    }

    /// Makes another conversation active. Requests in flight keep running.
    pub async fn switch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), Error> {
        self.inner
            .view
            .ask(|reply| SetActive {
                conversation_id: conversation_id.clone(),
                reply,
            })
            .await?;
        self.inner
            .events
            .emit(ConversationEvent::ConversationSwitched { conversation_id });
        Ok(())
    }

    /// Aborts the request in flight for a conversation. Returns `false` if
    /// there was none.
    #[inline]
    pub async fn abort_request(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<bool, Error> {
        self.inner.request_queue.abort(conversation_id).await
    }

    /// Aborts every request in flight and returns how many there were.
    #[inline]
    pub async fn abort_all_requests(&self) -> Result<usize, Error> {
        self.inner.request_queue.abort_all().await
    }

    /// Returns `true` if a request is in flight for the conversation.
    #[inline]
    pub async fn has_pending_request(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<bool, Error> {
        self.inner.request_queue.has_pending_request(conversation_id).await
    }

    /// Takes a snapshot of the current state.
    pub async fn state(&self) -> Result<ManagerState, Error> {
        snapshot(&self.inner.request_queue, &self.inner.view).await
    }

    /// Replaces the cached conversations with the stored ones and returns
    /// how many were loaded.
    pub async fn load_from_storage(&self) -> Result<usize, Error> {
        let conversations =
            self.inner.processor.storage.load_conversations().await?;
        let count = self
            .inner
            .view
            .ask(|reply| ReplaceConversations {
                conversations,
                reply,
            })
            .await?;
        debug!("loaded {count} conversations");
        self.notify_observers().await;
        Ok(count)
    }

    /// Deletes a conversation from storage and the cache, aborting its
    /// request in flight. The default conversation becomes active if the
    /// deleted one was.
    pub async fn delete_conversation(&self, id: &str) -> Result<(), Error> {
        let inner = &self.inner;
        inner.processor.storage.delete_conversation(id).await?;
        let conversation_id = ConversationId::new(id);
        inner.request_queue.abort(&conversation_id).await?;
        inner.processor.cache.forget(&conversation_id).await?;
        let was_active = inner
            .view
            .ask(|reply| RemoveConversation {
                id: id.to_owned(),
                reply,
            })
            .await?;
        if was_active {
            inner.events.emit(ConversationEvent::ConversationSwitched {
                conversation_id: ConversationId::DEFAULT,
            });
        } else {
            self.notify_observers().await;
        }
        Ok(())
    }

    /// Subscribes to conversation events.
    #[inline]
    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    /// Registers a callback receiving a fresh snapshot after every change.
    ///
    /// The callback runs on a background task and must not block.
    #[inline]
    pub fn on_state_change(
        &self,
        callback: impl Fn(&ManagerState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.observers.add(callback)
    }

    /// Aborts every request and stops the queues. Further calls fail with
    /// [`Error::QueueClosed`].
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        match inner.request_queue.abort_all().await {
            Ok(0) | Err(_) => {}
            Ok(aborted) => debug!("aborted {aborted} requests on shutdown"),
        }
        inner.request_queue.shutdown();
        inner.response_queue.shutdown();
        inner.view.try_kill();
        inner.notifier.abort();
    }

    async fn notify_observers(&self) {
        if self.inner.observers.is_empty() {
            return;
        }
        match self.state().await {
            Ok(state) => self.inner.observers.notify(&state),
            Err(err) => warn!("failed to take a state snapshot: {err}"),
        }
    }
}

async fn snapshot(
    request_queue: &RequestQueue,
    view: &Actor<ViewState>,
) -> Result<ManagerState, Error> {
    let (active_conversation, conversations) = view.ask(Snapshot).await?;
    let loading = request_queue.loading_states().await?;
    Ok(ManagerState {
        active_conversation,
        conversations,
        has_pending: !loading.is_empty(),
        loading,
    })
}

async fn notify_state_changes(
    mut events: EventStream,
    request_queue: RequestQueue,
    view: Actor<ViewState>,
    observers: Arc<Observers<ManagerState>>,
) {
    while let Some(event) = events.recv().await {
        if observers.is_empty() {
            continue;
        }
        trace!("state changed: {event:?}");
        match snapshot(&request_queue, &view).await {
            Ok(state) => observers.notify(&state),
            Err(_) => break,
        }
    }
}
