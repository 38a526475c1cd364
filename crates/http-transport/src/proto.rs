use serde::{Deserialize, Serialize};
use serde_json::Value;
use tripagent_model::{
    ApiMessage, ChatContext, Photo, ToolCall, ToolKind, TransportResponse,
};

/// Marks the end of an event stream.
pub const DONE: &str = "[DONE]";

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status { message: String },
    Tool { tool: RawToolCall },
    Result(ChatResult),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RawToolCall {
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

impl RawToolCall {
    /// Returns the kind of a known tool.
    pub fn kind(&self) -> Option<ToolKind> {
        serde_json::from_value(Value::String(self.name.clone())).ok()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResult {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub segments: Option<Vec<String>>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    #[serde(default)]
    pub tools_used: Vec<RawToolCall>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatResult {
    /// Converts the result, skipping tool calls that fail validation.
    pub fn into_response(self) -> TransportResponse {
        let tools_used = self
            .tools_used
            .into_iter()
            .filter_map(|raw| {
                let name = raw.name.clone();
                let value = serde_json::json!({
                    "name": raw.name,
                    "input": raw.input,
                });
                match serde_json::from_value::<ToolCall>(value) {
                    Ok(call) => Some(call),
                    Err(err) => {
                        warn!("skipping tool call `{name}`: {err}");
                        None
                    }
                }
            })
            .collect();
        TransportResponse {
            text: self.response,
            segments: self.segments.filter(|segments| !segments.is_empty()),
            photos: self.photos,
            tools_used,
            error: self.error.filter(|err| !err.is_empty()),
        }
    }
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ApiMessage],
    pub context: &'a ChatContext,
}
