//! Conversational client on top of an [`Upstream`]

use super::message::{ChatRequest, Message};
use super::upstream::{Upstream, UpstreamEvent};
use super::{Result, Usage};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A multi-turn conversation with one model
pub struct ChatSession {
    upstream: Arc<dyn Upstream>,
    model: String,
    history: Vec<Message>,
    last_usage: Option<Usage>,
}

impl ChatSession {
    pub fn new(upstream: Arc<dyn Upstream>, model: impl Into<String>) -> Self {
        Self {
            upstream,
            model: model.into(),
            history: Vec::new(),
            last_usage: None,
        }
    }

    /// Start the conversation with a system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.history.insert(0, Message::system(prompt));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Usage reported for the last successful turn, if any
    pub fn last_usage(&self) -> Option<Usage> {
        self.last_usage
    }

    fn request(&self) -> ChatRequest {
        ChatRequest::new(self.model.clone(), self.history.clone())
    }

    /// Send one user turn and wait for the full reply
    pub async fn send(&mut self, input: &str, cancel: CancellationToken) -> Result<String> {
        self.history.push(Message::user(input));
        match self.upstream.complete(&self.request(), cancel).await {
            Ok(completion) => {
                self.last_usage = completion.usage;
                self.history.push(Message::assistant(completion.content.clone()));
                Ok(completion.content)
            }
            Err(e) => {
                self.history.pop();
                Err(e)
            }
        }
    }

    /// Send one user turn, handing each text delta to `on_delta` as it arrives.
    ///
    /// On failure the turn is dropped from the history, even if some deltas
    /// were already delivered.
    pub async fn send_streaming<F>(
        &mut self,
        input: &str,
        cancel: CancellationToken,
        mut on_delta: F,
    ) -> Result<String>
    where
        F: FnMut(&str),
    {
        self.history.push(Message::user(input));
        let mut stream = self.upstream.stream(&self.request().streaming(true), cancel);
        let mut reply = String::new();
        let mut usage = None;

        while let Some(event) = stream.next().await {
            match event {
                Ok(UpstreamEvent::Chunk(chunk)) => {
                    if let Some(delta) = chunk.delta() {
                        on_delta(delta);
                        reply.push_str(delta);
                    }
                    if chunk.usage().is_some() {
                        usage = chunk.usage();
                    }
                }
                Ok(UpstreamEvent::Done) => break,
                Err(e) => {
                    self.history.pop();
                    return Err(e);
                }
            }
        }

        self.last_usage = usage;
        self.history.push(Message::assistant(reply.clone()));
        Ok(reply)
    }
}
