//! At most one in-flight request per conversation.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tripagent_actor::{Actor, Message, Reply};
use tripagent_model::{
    ApiMessage, ChatContext, ConversationId, ErrorKind, StatusSink,
    Transport, TransportRequest, TransportStatus,
};

use crate::error::Error;
use crate::events::{ConversationEvent, EventBus};
use crate::response_queue::QueuedResponse;
use crate::transport_client::TransportClient;

const INITIAL_STATUS: &str = "Thinking...";

/// A request to send a conversation to the backend.
#[derive(Clone)]
pub struct QueuedRequest {
    /// The conversation the request belongs to.
    pub conversation_id: ConversationId,
    /// The history to send, ending with the new user message.
    pub messages: Vec<ApiMessage>,
    /// Context of the user and the trip.
    pub context: ChatContext,
    /// Receives status updates while the request is in flight.
    pub on_status: Option<StatusSink>,
}

impl QueuedRequest {
    /// Creates a request without a status receiver.
    pub fn new(
        conversation_id: ConversationId,
        messages: Vec<ApiMessage>,
        context: ChatContext,
    ) -> Self {
        Self {
            conversation_id,
            messages,
            context,
            on_status: None,
        }
    }

    /// Sets the status receiver.
    pub fn with_status_sink(mut self, on_status: StatusSink) -> Self {
        self.on_status = Some(on_status);
        self
    }
}

impl Debug for QueuedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("conversation_id", &self.conversation_id)
            .field("messages", &self.messages.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct PendingRequest {
    serial: u64,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    status: String,
}

struct RequestQueueState {
    pending: HashMap<ConversationId, PendingRequest>,
    events: EventBus,
}

impl RequestQueueState {
    fn emit_loading(
        &self,
        conversation_id: &ConversationId,
        status: Option<String>,
    ) {
        self.events.emit(ConversationEvent::LoadingChanged {
            conversation_id: conversation_id.clone(),
            is_loading: status.is_some(),
            status,
        });
    }

    fn remove(&mut self, conversation_id: &ConversationId) -> bool {
        let Some(pending) = self.pending.remove(conversation_id) else {
            return false;
        };
        pending.cancel.cancel();
        debug!(
            "cancelled request #{} for {conversation_id} after {}ms",
            pending.serial,
            (Utc::now() - pending.started_at).num_milliseconds()
        );
        self.emit_loading(conversation_id, None);
        true
    }
}

/// Serializes requests per conversation.
///
/// Sending a new request for a conversation aborts the one still in
/// flight for it. Different conversations never affect each other.
/// Progress is published as [`ConversationEvent::LoadingChanged`] events.
#[derive(Clone)]
pub struct RequestQueue {
    actor: Actor<RequestQueueState>,
    transport: TransportClient,
    events: EventBus,
    next_serial: Arc<AtomicU64>,
}

impl RequestQueue {
    pub(crate) fn new(transport: TransportClient, events: EventBus) -> Self {
        let state = RequestQueueState {
            pending: HashMap::new(),
            events: events.clone(),
        };
        Self {
            actor: Actor::spawn(state, Some("request queue")),
            transport,
            events,
            next_serial: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a queue sending through `transport` that publishes to a
    /// private event bus.
    pub fn with_transport<T: Transport + 'static>(transport: T) -> Self {
        Self::new(TransportClient::new(transport), EventBus::default())
    }

    /// Sends a request, aborting the pending request of the same
    /// conversation first.
    ///
    /// Transport failures resolve to an error-shaped response. Fails with
    /// [`Error::Cancelled`] if the request is aborted or replaced before
    /// it completes.
    pub async fn enqueue(
        &self,
        request: QueuedRequest,
    ) -> Result<QueuedResponse, Error> {
        let QueuedRequest {
            conversation_id,
            messages,
            context,
            on_status,
        } = request;

        // Armed before registering so a caller dropped while waiting for
        // the registration still clears its record.
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let mut guard = FinishGuard {
            actor: self.actor.clone(),
            conversation_id: conversation_id.clone(),
            serial,
            armed: true,
        };
        let cancel = self
            .actor
            .ask(|reply| Register {
                conversation_id: conversation_id.clone(),
                serial,
                reply,
            })
            .await?;

        let mut req = TransportRequest::new(messages, context);
        req.cancel = cancel.clone();
        req.on_status = {
            let actor = self.actor.clone();
            let conversation_id = conversation_id.clone();
            Arc::new(move |status: TransportStatus| {
                actor
                    .send(UpdateStatus {
                        conversation_id: conversation_id.clone(),
                        serial,
                        status: status.label().into_owned(),
                    })
                    .ok();
                if let Some(on_status) = &on_status {
                    on_status(status);
                }
            })
        };

        let result = select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.transport.send(req) => result,
        };

        guard.armed = false;
        let finished = self
            .actor
            .ask(|reply| Finish {
                conversation_id: conversation_id.clone(),
                serial,
                reply: Some(reply),
            })
            .await?;
        if !finished {
            // Aborted after the transport completed.
            return Err(Error::Cancelled);
        }

        match result {
            Ok(resp) => {
                let response = QueuedResponse::from_transport(
                    conversation_id.clone(),
                    resp,
                );
                self.events.emit(ConversationEvent::ResponseReceived {
                    conversation_id,
                    response: response.clone(),
                });
                Ok(response)
            }
            Err(err) if err.kind() == ErrorKind::Cancelled => {
                Err(Error::Cancelled)
            }
            Err(err) => {
                error!("request for {conversation_id} failed: {err}");
                Ok(QueuedResponse::error(conversation_id, err.to_string()))
            }
        }
    }

    /// Aborts the pending request of a conversation. Returns `false` if
    /// there was none.
    pub async fn abort(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<bool, Error> {
        Ok(self
            .actor
            .ask(|reply| Abort {
                conversation_id: conversation_id.clone(),
                reply,
            })
            .await?)
    }

    /// Aborts every pending request and returns how many there were.
    pub async fn abort_all(&self) -> Result<usize, Error> {
        Ok(self.actor.ask(AbortAll).await?)
    }

    /// Returns `true` if a request is in flight for the conversation.
    pub async fn has_pending_request(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<bool, Error> {
        Ok(self.status(conversation_id).await?.is_some())
    }

    /// Returns the conversations with a request in flight.
    pub async fn pending_conversations(
        &self,
    ) -> Result<Vec<ConversationId>, Error> {
        let mut ids: Vec<_> =
            self.loading_states().await?.into_keys().collect();
        ids.sort();
        Ok(ids)
    }

    /// Returns the latest status line of the pending request of a
    /// conversation.
    pub async fn status(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<String>, Error> {
        Ok(self
            .actor
            .ask(|reply| Status {
                conversation_id: conversation_id.clone(),
                reply,
            })
            .await?)
    }

    /// Returns the status line of every pending request.
    pub async fn loading_states(
        &self,
    ) -> Result<HashMap<ConversationId, String>, Error> {
        Ok(self.actor.ask(LoadingStates).await?)
    }

    /// Subscribes to the events published by this queue.
    pub fn subscribe(&self) -> crate::EventStream {
        self.events.subscribe()
    }

    /// Stops the queue. Pending requests are not aborted.
    pub(crate) fn shutdown(&self) {
        self.actor.try_kill();
    }
}

impl Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestQueue")
            .field("alive", &self.actor.is_alive())
            .finish()
    }
}

/// Clears the pending record if the caller stops waiting midway.
struct FinishGuard {
    actor: Actor<RequestQueueState>,
    conversation_id: ConversationId,
    serial: u64,
    armed: bool,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.armed {
            self.actor
                .send(Finish {
                    conversation_id: self.conversation_id.clone(),
                    serial: self.serial,
                    reply: None,
                })
                .ok();
        }
    }
}

#[derive(Debug)]
struct Register {
    conversation_id: ConversationId,
    serial: u64,
    reply: Reply<CancellationToken>,
}

impl Message<RequestQueueState> for Register {
    fn handle(
        self,
        state: &mut RequestQueueState,
        _handle: &Actor<RequestQueueState>,
    ) {
        if state.remove(&self.conversation_id) {
            debug!("replacing request for {}", self.conversation_id);
        }

        let cancel = CancellationToken::new();
        state.pending.insert(
            self.conversation_id.clone(),
            PendingRequest {
                serial: self.serial,
                cancel: cancel.clone(),
                started_at: Utc::now(),
                status: INITIAL_STATUS.to_owned(),
            },
        );
        state.emit_loading(
            &self.conversation_id,
            Some(INITIAL_STATUS.to_owned()),
        );
        self.reply.send(cancel);
    }
}

#[derive(Debug)]
struct UpdateStatus {
    conversation_id: ConversationId,
    serial: u64,
    status: String,
}

impl Message<RequestQueueState> for UpdateStatus {
    fn handle(
        self,
        state: &mut RequestQueueState,
        _handle: &Actor<RequestQueueState>,
    ) {
        let Some(pending) = state.pending.get_mut(&self.conversation_id)
        else {
            return;
        };
        // Late updates of a replaced request.
        if pending.serial != self.serial {
            return;
        }
        pending.status.clone_from(&self.status);
        state.emit_loading(&self.conversation_id, Some(self.status));
    }
}

#[derive(Debug)]
struct Finish {
    conversation_id: ConversationId,
    serial: u64,
    reply: Option<Reply<bool>>,
}

impl Message<RequestQueueState> for Finish {
    fn handle(
        self,
        state: &mut RequestQueueState,
        _handle: &Actor<RequestQueueState>,
    ) {
        let current = state
            .pending
            .get(&self.conversation_id)
            .is_some_and(|pending| pending.serial == self.serial);
        if current {
            if let Some(pending) = state.pending.remove(&self.conversation_id)
            {
                trace!(
                    "request #{} for {} took {}ms",
                    pending.serial,
                    self.conversation_id,
                    (Utc::now() - pending.started_at).num_milliseconds()
                );
            }
            state.emit_loading(&self.conversation_id, None);
        }
        if let Some(reply) = self.reply {
            reply.send(current);
        }
    }
}

#[derive(Debug)]
struct Abort {
    conversation_id: ConversationId,
    reply: Reply<bool>,
}

impl Message<RequestQueueState> for Abort {
    fn handle(
        self,
        state: &mut RequestQueueState,
        _handle: &Actor<RequestQueueState>,
    ) {
        self.reply.send(state.remove(&self.conversation_id));
    }
}

#[derive(Debug)]
struct AbortAll(Reply<usize>);

impl Message<RequestQueueState> for AbortAll {
    fn handle(
        self,
        state: &mut RequestQueueState,
        _handle: &Actor<RequestQueueState>,
    ) {
        let mut ids: Vec<_> = state.pending.keys().cloned().collect();
        ids.sort();
        for id in &ids {
            state.remove(id);
        }
        self.0.send(ids.len());
    }
}

#[derive(Debug)]
struct Status {
    conversation_id: ConversationId,
    reply: Reply<Option<String>>,
}

impl Message<RequestQueueState> for Status {
    fn handle(
        self,
        state: &mut RequestQueueState,
        _handle: &Actor<RequestQueueState>,
    ) {
        let status = state
            .pending
            .get(&self.conversation_id)
            .map(|pending| pending.status.clone());
        self.reply.send(status);
    }
}

#[derive(Debug)]
struct LoadingStates(Reply<HashMap<ConversationId, String>>);

impl Message<RequestQueueState> for LoadingStates {
    fn handle(
        self,
        state: &mut RequestQueueState,
        _handle: &Actor<RequestQueueState>,
    ) {
        let states = state
            .pending
            .iter()
            .map(|(id, pending)| (id.clone(), pending.status.clone()))
            .collect();
        self.0.send(states);
    }
}
