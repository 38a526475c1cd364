use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tripagent_actor::{Actor, Message as ActorMessage, Reply};
use tripagent_model::{Conversation, ConversationId, Message};

use crate::storage::{append_messages, new_conversation_for};

/// The conversations the manager shows and which one is active.
#[derive(Debug, Default)]
pub(crate) struct ViewState {
    pub active: ConversationId,
    pub conversations: HashMap<String, Conversation>,
}

impl ViewState {
    fn sorted_conversations(&self) -> Vec<Conversation> {
        let mut conversations: Vec<_> =
            self.conversations.values().cloned().collect();
        conversations.sort_by(|a, b| {
            b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id))
        });
        conversations
    }
}

#[derive(Debug)]
pub(crate) struct SetActive {
    pub conversation_id: ConversationId,
    pub reply: Reply<()>,
}

impl ActorMessage<ViewState> for SetActive {
    fn handle(self, state: &mut ViewState, _handle: &Actor<ViewState>) {
        state.active = self.conversation_id;
        self.reply.send(());
    }
}

/// Makes `resolved` active if the default conversation still is.
#[derive(Debug)]
pub(crate) struct AdoptDefault {
    pub resolved: ConversationId,
    pub reply: Reply<bool>,
}

impl ActorMessage<ViewState> for AdoptDefault {
    fn handle(self, state: &mut ViewState, _handle: &Actor<ViewState>) {
        let adopt = state.active.is_default();
        if adopt {
            state.active = self.resolved;
        }
        self.reply.send(adopt);
    }
}

#[derive(Debug)]
pub(crate) struct CacheMessages {
    pub stored_id: String,
    pub messages: Vec<Message>,
    pub reply: Reply<()>,
}

impl ActorMessage<ViewState> for CacheMessages {
    fn handle(self, state: &mut ViewState, _handle: &Actor<ViewState>) {
        let conversation = match state.conversations.entry(self.stored_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let id = ConversationId::new(entry.key().as_str());
                entry.insert(new_conversation_for(&id, &self.messages))
            }
        };
        let new_messages: Vec<_> = self
            .messages
            .into_iter()
            .filter(|msg| {
                !conversation.messages.iter().any(|other| other.id == msg.id)
            })
            .collect();
        append_messages(conversation, &new_messages);
        self.reply.send(());
    }
}

#[derive(Debug)]
pub(crate) struct ReplaceConversations {
    pub conversations: Vec<Conversation>,
    pub reply: Reply<usize>,
}

impl ActorMessage<ViewState> for ReplaceConversations {
    fn handle(self, state: &mut ViewState, _handle: &Actor<ViewState>) {
        state.conversations = self
            .conversations
            .into_iter()
            .map(|conv| (conv.id.clone(), conv))
            .collect();
        self.reply.send(state.conversations.len());
    }
}

/// Removes a conversation. Answers whether it was the active one, in
/// which case the default conversation becomes active.
#[derive(Debug)]
pub(crate) struct RemoveConversation {
    pub id: String,
    pub reply: Reply<bool>,
}

impl ActorMessage<ViewState> for RemoveConversation {
    fn handle(self, state: &mut ViewState, _handle: &Actor<ViewState>) {
        state.conversations.remove(&self.id);
        let was_active = state.active.as_str() == Some(self.id.as_str());
        if was_active {
            state.active = ConversationId::DEFAULT;
        }
        self.reply.send(was_active);
    }
}

#[derive(Debug)]
pub(crate) struct Snapshot(pub Reply<(ConversationId, Vec<Conversation>)>);

impl ActorMessage<ViewState> for Snapshot {
    fn handle(self, state: &mut ViewState, _handle: &Actor<ViewState>) {
        self.0
            .send((state.active.clone(), state.sorted_conversations()));
    }
}
