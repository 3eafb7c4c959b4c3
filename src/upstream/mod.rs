//! Upstream API transport
//!
//! The gateway only talks to the remote API through the [`Upstream`] trait,
//! so relay logic stays independent of HTTP mechanics.

mod openai;
mod retry;
mod sse;

use super::{config::UpstreamConfig, message::ChatRequest, Result, Usage};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use openai::OpenAIUpstream;
pub use retry::{FailurePhase, RetryPolicy};

/// One streamed unit, the payload of a single upstream SSE `data:` line
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    data: String,
    delta: Option<String>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl Chunk {
    /// Wrap a raw payload, extracting the fields the gateway cares about.
    ///
    /// Payloads that are not chat-completion chunks are kept verbatim.
    pub fn new(data: impl Into<String>) -> Self {
        let data = data.into();
        let parsed = serde_json::from_str::<ChatStreamChunk>(&data);
        if let Err(e) = &parsed {
            tracing::warn!("Failed to parse SSE chunk: {}", e);
        }
        let parsed = parsed.ok();
        let choice = parsed.as_ref().and_then(|c| c.choices.first());
        Chunk {
            delta: choice.and_then(|c| c.delta.content.clone()),
            finish_reason: choice.and_then(|c| c.finish_reason.clone()),
            usage: parsed.as_ref().and_then(|c| c.usage),
            data,
        }
    }

    /// Raw payload as received
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Text delta of the first choice, if any
    pub fn delta(&self) -> Option<&str> {
        self.delta.as_deref()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Token usage, present on the final chunk of some providers
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }
}

/// Item of an upstream stream
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Chunk(Chunk),
    /// The upstream finished the response (`data: [DONE]`)
    Done,
}

/// Lazy, finite sequence of upstream events; not restartable after an error
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<UpstreamEvent>> + Send>>;

/// Buffered (non-streaming) upstream response
#[derive(Debug, Clone)]
pub struct Completion {
    /// Upstream JSON body, forwarded to the caller unchanged
    pub body: Value,

    /// Assistant text of the first choice
    pub content: String,

    /// Token usage, when the upstream reports it
    pub usage: Option<Usage>,
}

impl Completion {
    /// Build from an upstream JSON body
    pub fn from_body(body: Value) -> Self {
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let usage = body
            .get("usage")
            .and_then(|u| serde_json::from_value(u.clone()).ok());
        Completion { body, content, usage }
    }
}

/// Transport to an OpenAI-compatible API
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    /// Send a chat completion request and buffer the whole response
    async fn complete(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<Completion>;

    /// Send a chat completion request and stream the response.
    ///
    /// The stream ends with [`UpstreamEvent::Done`] or an error. Firing
    /// `cancel`, or dropping the stream, aborts the upstream call.
    fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> ChunkStream;

    /// Fetch the upstream model list
    async fn list_models(&self) -> Result<Value>;

    /// Get the API base URL
    fn api_base(&self) -> &str;
}

/// Create the HTTP upstream for a configuration.
///
/// Fails with `ConfigMissing` before any network activity if the base URL or
/// key is absent.
pub fn create_upstream(config: &UpstreamConfig) -> Result<Arc<dyn Upstream>> {
    Ok(Arc::new(OpenAIUpstream::new(config)?))
}

// OpenAI stream chunk shape

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    #[serde(default)]
    delta: ChatStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
}
