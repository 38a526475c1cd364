use serde::{Deserialize, Serialize};
use tripagent_model::{Photo, ToolCall, ToolKind, TransportResponse};

/// Status updates reported before a preset reply is delivered.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "thinking")]
    Thinking,
    #[serde(rename = "status")]
    Status(String),
    #[serde(rename = "tool_started")]
    ToolStarted(ToolKind),
}

/// The preset reply for one request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Status updates to report while the request is in flight.
    #[serde(default)]
    pub events: Vec<PresetEvent>,
    /// The response text.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub segments: Option<Vec<String>>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    #[serde(default)]
    pub tools_used: Vec<ToolCall>,
    /// If set, the request fails with this message instead of replying.
    #[serde(default)]
    pub failure: Option<String>,
}

impl PresetResponse {
    /// Creates a successful reply with the specified text.
    #[inline]
    pub fn with_text<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Creates a reply that fails with the specified message.
    #[inline]
    pub fn with_failure<S: Into<String>>(message: S) -> Self {
        Self {
            failure: Some(message.into()),
            ..Default::default()
        }
    }

    /// Splits the reply into segments.
    #[inline]
    pub fn segments<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.segments = Some(segments.into_iter().map(Into::into).collect());
        self
    }

    /// Attaches photos to the reply.
    #[inline]
    pub fn photos(mut self, photos: Vec<Photo>) -> Self {
        self.photos = photos;
        self
    }

    /// Records tool calls in the reply.
    #[inline]
    pub fn tools_used(mut self, tools_used: Vec<ToolCall>) -> Self {
        self.tools_used = tools_used;
        self
    }

    /// Adds status updates reported before the reply.
    #[inline]
    pub fn events(mut self, events: impl Into<Vec<PresetEvent>>) -> Self {
        self.events = events.into();
        self
    }

    pub(crate) fn to_response(&self) -> TransportResponse {
        TransportResponse {
            text: self.text.clone(),
            segments: self.segments.clone(),
            photos: self.photos.clone(),
            tools_used: self.tools_used.clone(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let response = PresetResponse::with_text("Here are some hotels.")
            .events([
                PresetEvent::Thinking,
                PresetEvent::ToolStarted(ToolKind::SearchHotels),
            ])
            .photos(vec![Photo::with_url("https://example.com/lodge.jpg")]);

        let serialized = serde_json::to_value(&response).unwrap();
        assert_eq!(
            serialized["events"],
            json!([
                { "type": "thinking" },
                { "type": "tool_started", "data": "search_hotels" }
            ])
        );
        let deserialized: PresetResponse =
            serde_json::from_value(serialized).unwrap();
        assert_eq!(response, deserialized);
    }
}
