use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tripagent_core::{
    Storage, StorageError, append_messages, new_conversation_for,
};
use tripagent_model::{Conversation, ConversationId, Message};

/// Stores each conversation as a JSON file in a directory.
#[derive(Debug)]
pub struct FileStorage {
    base_path: PathBuf,
    // Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Creates a storage in `base_path`. The directory is created on the
    /// first write.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn conversation_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid conversation id: {id:?}"),
            )));
        }
        Ok(self.base_path.join(format!("{id}.json")))
    }

    async fn read(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        let path = self.conversation_path(id)?;
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, conversation: &Conversation) -> Result<(), StorageError> {
        let path = self.conversation_path(&conversation.id)?;
        fs::create_dir_all(&self.base_path).await?;
        let contents = serde_json::to_string_pretty(conversation)?;
        // Write to a sibling first so readers never see a partial file.
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, contents).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn load_conversations(&self) -> Result<Vec<Conversation>, StorageError> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(vec![]);
            }
            Err(err) => return Err(err.into()),
        };

        let mut conversations = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let contents = match fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(err) => {
                    warn!("skipping {}: {err}", path.display());
                    continue;
                }
            };
            match serde_json::from_str::<Conversation>(&contents) {
                Ok(conversation) => conversations.push(conversation),
                Err(err) => warn!("skipping {}: {err}", path.display()),
            }
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn add_messages_to_conversation(
        &self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Result<String, StorageError> {
        let _guard = self.write_lock.lock().await;
        let existing = match conversation_id.as_str() {
            Some(id) => self.read(id).await?,
            None => None,
        };
        let mut conversation = existing.unwrap_or_else(|| {
            new_conversation_for(conversation_id, messages)
        });
        append_messages(&mut conversation, messages);
        self.write(&conversation).await?;
        debug!(
            "stored {} messages in {}",
            messages.len(),
            conversation.id
        );
        Ok(conversation.id)
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.conversation_path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(id.to_owned()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn save_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.write(conversation).await
    }
}
