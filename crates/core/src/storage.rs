//! Persistence of conversations.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tripagent_model::{Conversation, ConversationId, Message, Role};

use crate::error::StorageError;

/// Where conversations are persisted.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Loads every stored conversation, most recently updated first.
    async fn load_conversations(&self) -> Result<Vec<Conversation>, StorageError>;

    /// Appends messages to a conversation and returns its storage id.
    ///
    /// The default conversation is stored under a freshly generated id.
    /// An unknown id is created with that id.
    async fn add_messages_to_conversation(
        &self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Result<String, StorageError>;

    /// Deletes a conversation.
    async fn delete_conversation(&self, id: &str) -> Result<(), StorageError>;

    /// Inserts or replaces a whole conversation.
    async fn save_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(), StorageError>;
}

/// Appends messages to a conversation, keeping `updated_at` current.
///
/// Shared by the storage implementations.
pub fn append_messages(conversation: &mut Conversation, messages: &[Message]) {
    conversation.messages.extend_from_slice(messages);
    conversation.updated_at = messages
        .iter()
        .map(|msg| msg.timestamp)
        .max()
        .unwrap_or_else(Utc::now)
        .max(conversation.updated_at);
}

/// Creates the conversation the first messages of `conversation_id` go
/// into.
pub fn new_conversation_for(
    conversation_id: &ConversationId,
    messages: &[Message],
) -> Conversation {
    let id = conversation_id
        .as_str()
        .map(str::to_owned)
        .unwrap_or_else(Conversation::generate_id);
    let title_source = messages
        .iter()
        .find(|msg| msg.role == Role::User)
        .or(messages.first())
        .map(|msg| msg.content.as_str())
        .unwrap_or("");
    Conversation::new(id, title_source)
}

/// Keeps conversations in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryStorage {
    /// Creates a storage holding the specified conversations.
    pub fn with_conversations(
        conversations: impl IntoIterator<Item = Conversation>,
    ) -> Self {
        let conversations = conversations
            .into_iter()
            .map(|conv| (conv.id.clone(), conv))
            .collect();
        Self {
            conversations: Mutex::new(conversations),
        }
    }

    /// Returns a stored conversation.
    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.lock().get(id).cloned()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_conversations(&self) -> Result<Vec<Conversation>, StorageError> {
        let mut conversations: Vec<_> = self.lock().values().cloned().collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn add_messages_to_conversation(
        &self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Result<String, StorageError> {
        let mut conversations = self.lock();
        let existing = conversation_id
            .as_str()
            .filter(|id| conversations.contains_key(*id));
        let id = match existing {
            Some(id) => id.to_owned(),
            None => {
                let conv = new_conversation_for(conversation_id, messages);
                trace!("creating conversation {}", conv.id);
                let id = conv.id.clone();
                conversations.insert(id.clone(), conv);
                id
            }
        };
        if let Some(conv) = conversations.get_mut(&id) {
            append_messages(conv, messages);
        }
        Ok(id)
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), StorageError> {
        self.lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(id.to_owned()))
    }

    async fn save_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(), StorageError> {
        self.lock()
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_conversation_gets_an_id() {
        let storage = MemoryStorage::default();
        let id = storage
            .add_messages_to_conversation(
                &ConversationId::DEFAULT,
                &[Message::user("Tell me about Yosemite")],
            )
            .await
            .unwrap();
        assert!(id.starts_with("conv-"));

        let conv = storage.get(&id).unwrap();
        assert_eq!(conv.title, "Tell me about Yosemite");
        assert_eq!(conv.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let storage = MemoryStorage::default();
        let id = ConversationId::new("trip-1");
        storage
            .add_messages_to_conversation(&id, &[Message::user("Zion?")])
            .await
            .unwrap();
        let stored = storage
            .add_messages_to_conversation(
                &id,
                &[Message::assistant("Zion is..."), Message::assistant("Also...")],
            )
            .await
            .unwrap();
        assert_eq!(stored, "trip-1");

        let conversations = storage.load_conversations().await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].messages.len(), 3);
        assert_eq!(conversations[0].title, "Zion?");
    }

    #[tokio::test]
    async fn test_delete() {
        let storage =
            MemoryStorage::with_conversations([Conversation::new("a", "A")]);
        storage.delete_conversation("a").await.unwrap();
        assert!(matches!(
            storage.delete_conversation("a").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
