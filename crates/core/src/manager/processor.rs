use std::sync::Arc;

use async_trait::async_trait;
use tripagent_actor::Actor;
use tripagent_model::{ConversationId, Message};

use super::view::{CacheMessages, ViewState};
use crate::error::Error;
use crate::events::{ConversationEvent, EventBus};
use crate::response_queue::{QueuedResponse, ResponseProcessor};
use crate::storage::Storage;
use crate::trip_context::CacheUpdater;

/// Persists messages, mirrors them into the view and announces them.
pub(crate) struct ManagerProcessor {
    pub storage: Arc<dyn Storage>,
    pub cache: Arc<dyn CacheUpdater>,
    pub view: Actor<ViewState>,
    pub events: EventBus,
}

#[async_trait]
impl ResponseProcessor for ManagerProcessor {
    async fn on_message_created(
        &self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Result<ConversationId, Error> {
        let stored_id = self
            .storage
            .add_messages_to_conversation(conversation_id, messages)
            .await?;
        if conversation_id.as_str() != Some(stored_id.as_str()) {
            debug!("stored messages of {conversation_id} in {stored_id}");
        }

        let resolved = ConversationId::new(stored_id.as_str());
        self.view
            .ask(|reply| CacheMessages {
                stored_id,
                messages: messages.to_vec(),
                reply,
            })
            .await?;
        for message in messages {
            self.events.emit(ConversationEvent::MessageAdded {
                conversation_id: resolved.clone(),
                message: message.clone(),
            });
        }
        Ok(resolved)
    }

    async fn on_cache_update(
        &self,
        conversation_id: &ConversationId,
        response: &QueuedResponse,
    ) -> Result<(), Error> {
        self.cache
            .update_from_response(conversation_id, response)
            .await?;
        Ok(())
    }
}
