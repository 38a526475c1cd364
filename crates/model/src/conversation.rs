use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a chat thread.
///
/// The default identity (no id) denotes the ambient conversation the user
/// is chatting in before a conversation has been persisted.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ConversationId(Option<String>);

impl ConversationId {
    /// The default conversation.
    pub const DEFAULT: Self = Self(None);

    /// Creates an identity for a persisted conversation.
    #[inline]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(Some(id.into()))
    }

    /// Returns the underlying id, or `None` for the default conversation.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Returns `true` if this is the default conversation.
    #[inline]
    pub fn is_default(&self) -> bool {
        self.0.is_none()
    }
}

impl From<&str> for ConversationId {
    #[inline]
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConversationId {
    #[inline]
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<Option<String>> for ConversationId {
    #[inline]
    fn from(id: Option<String>) -> Self {
        Self(id)
    }
}

impl Display for ConversationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(id) => f.write_str(id),
            None => f.write_str("<default>"),
        }
    }
}

/// Who wrote a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person planning the trip.
    User,
    /// The trip-planning assistant.
    Assistant,
}

/// A photo attached to an assistant message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    /// Where the image can be downloaded.
    pub url: String,
    /// A short description of the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// The photographer or rights holder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit: Option<String>,
    /// The service the photo was found on, e.g. `nps` or `unsplash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Photo {
    /// Creates a photo with only a URL.
    #[inline]
    pub fn with_url<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            caption: None,
            credit: None,
            source: None,
        }
    }
}

/// A displayable chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// A time-based identifier, unique within the process.
    pub id: String,
    /// The author of the message.
    pub role: Role,
    /// The text of the message.
    pub content: String,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Photos to render below the text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<Photo>,
    /// Set when the message describes a failed request.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        let timestamp = Utc::now();
        Self {
            id: next_message_id(&timestamp),
            role,
            content: content.into(),
            timestamp,
            photos: vec![],
            is_error: false,
        }
    }

    /// Creates a user message.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant message.
    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Attaches photos to the message.
    #[inline]
    pub fn with_photos(mut self, photos: Vec<Photo>) -> Self {
        self.photos = photos;
        self
    }

    /// Marks the message as an error message.
    #[inline]
    pub fn into_error(mut self) -> Self {
        self.is_error = true;
        self
    }
}

fn next_message_id(timestamp: &DateTime<Utc>) -> String {
    // Several messages can share a millisecond when a response is split
    // into segments.
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("msg-{}-{seq}", timestamp.timestamp_millis())
}

/// A persisted chat thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// The storage id of the conversation.
    pub id: String,
    /// A short title, derived from the first user message.
    pub title: String,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// When a message was last added.
    pub updated_at: DateTime<Utc>,
    /// Messages in chronological order.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    const MAX_TITLE_CHARS: usize = 50;

    /// Creates an empty conversation whose title is derived from the
    /// given text.
    pub fn new<S: Into<String>>(id: S, title_source: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: Self::title_from(title_source),
            created_at: now,
            updated_at: now,
            messages: vec![],
        }
    }

    /// Generates a fresh time-based conversation id.
    pub fn generate_id() -> String {
        static SEQUENCE: AtomicU64 = AtomicU64::new(0);
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!("conv-{}-{seq}", Utc::now().timestamp_millis())
    }

    /// Builds a conversation title from the first line of a message.
    pub fn title_from(text: &str) -> String {
        let line = text.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return "New trip".to_owned();
        }
        if line.chars().count() <= Self::MAX_TITLE_CHARS {
            return line.to_owned();
        }
        let mut title: String =
            line.chars().take(Self::MAX_TITLE_CHARS).collect();
        title.truncate(title.trim_end().len());
        title.push_str("...");
        title
    }

    /// Returns the identity used to address this conversation.
    #[inline]
    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::new(self.id.clone())
    }
}

/// A history entry sent to the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiMessage {
    /// The author of the entry.
    pub role: Role,
    /// The text of the entry.
    pub content: String,
}

impl From<&Message> for ApiMessage {
    #[inline]
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}
