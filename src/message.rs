//! Message types for chat requests

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Error, Result};

/// Role of a message sender.
///
/// Roles the gateway does not know (`developer`, `function`, ...) are kept
/// as [`MessageRole::Other`] and forwarded as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageRole {
    /// System message (sets behavior)
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// Tool result message
    Tool,
    Other(String),
}

impl MessageRole {
    pub fn as_str(&self) -> &str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::Other(role) => role,
        }
    }
}

impl From<String> for MessageRole {
    fn from(role: String) -> Self {
        match role.as_str() {
            "system" => MessageRole::System,
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            _ => MessageRole::Other(role),
        }
    }
}

impl From<MessageRole> for String {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::Other(role) => role,
            known => known.as_str().to_string(),
        }
    }
}

/// A chat message.
///
/// `content` is kept as raw JSON so `null` (assistant tool-call turns) and
/// content-part arrays pass through; every other key (`name`, `tool_calls`,
/// `tool_call_id`, ...) lands in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message: a string, an array of parts or null
    #[serde(default)]
    pub content: Value,

    /// Pass-through message fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Create a new text message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Message {
            role,
            content: Value::String(content.into()),
            extra: Map::new(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Plain text content, `None` for null or content-part arrays
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: u32,

    /// Number of tokens in the completion
    #[serde(default)]
    pub completion_tokens: u32,

    /// Total number of tokens
    #[serde(default)]
    pub total_tokens: u32,
}

/// Client-facing chat completion payload.
///
/// Fields the gateway does not interpret (temperature, max_tokens, tools, ...)
/// are kept in `extra` and forwarded upstream unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use; falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Conversation so far
    pub messages: Vec<Message>,

    /// Whether the caller wants incremental chunks
    #[serde(default)]
    pub stream: bool,

    /// Pass-through parameters
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: Some(model.into()),
            messages,
            stream: false,
            extra: Map::new(),
        }
    }

    /// Same request with the `stream` flag set
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Fill in the model and reject payloads that cannot be forwarded
    pub fn resolve(mut self, default_model: Option<&str>) -> Result<Self> {
        if self.messages.is_empty() {
            return Err(Error::InvalidRequest("messages must not be empty".to_string()));
        }
        let model = self
            .model
            .take()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| default_model.map(str::to_string))
            .ok_or_else(|| {
                Error::InvalidRequest("model is required (no default model configured)".to_string())
            })?;
        self.model = Some(model);
        Ok(self)
    }

    /// Model name, empty if unresolved
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or_default()
    }
}
