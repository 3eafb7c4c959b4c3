//! Request relay between clients and the upstream API
//!
//! A [`Gateway`] owns the immutable configuration, the upstream transport and
//! the session registry. Each request claims a registry slot for its whole
//! lifetime; the slot is released on every exit path because it is held by a
//! [`SessionGuard`].

use super::config::GatewayConfig;
use super::message::ChatRequest;
use super::registry::{SessionGuard, SessionId, SessionRegistry};
use super::upstream::{create_upstream, Chunk, ChunkStream, Completion, Upstream, UpstreamEvent};
use super::Result;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info, warn};

/// Item relayed to the caller of [`Gateway::stream`]
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Chunk(Chunk),
    /// Explicit end marker; nothing follows it
    End,
}

/// Buffered response together with the session that produced it
#[derive(Debug, Clone)]
pub struct CompletedSession {
    pub id: SessionId,
    pub completion: Completion,
}

/// Incremental response of one session.
///
/// Chunks arrive in upstream order and the sequence ends with
/// [`GatewayEvent::End`] or a single error, after which it yields nothing.
/// Dropping the stream cancels the upstream call and frees the session slot.
pub struct SessionStream {
    id: SessionId,
    inner: Pin<Box<dyn Stream<Item = Result<GatewayEvent>> + Send>>,
}

impl SessionStream {
    fn new(guard: SessionGuard, mut upstream: ChunkStream) -> Self {
        let id = guard.id();
        let inner = async_stream::stream! {
            let mut started = false;
            while let Some(event) = upstream.next().await {
                match event {
                    Ok(UpstreamEvent::Chunk(chunk)) => {
                        if !started {
                            started = true;
                            guard.mark_streaming();
                        }
                        yield Ok(GatewayEvent::Chunk(chunk));
                    }
                    Ok(UpstreamEvent::Done) => break,
                    Err(e) => {
                        warn!(session = %guard.id(), "Stream failed: {}", e);
                        guard.finish_with(&e);
                        yield Err(e);
                        return;
                    }
                }
            }
            guard.complete();
            debug!(session = %guard.id(), "Stream complete");
            yield Ok(GatewayEvent::End);
        };
        Self {
            id,
            inner: Box::pin(inner),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Stream for SessionStream {
    type Item = Result<GatewayEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// The relay itself
pub struct Gateway {
    config: Arc<GatewayConfig>,
    upstream: Arc<dyn Upstream>,
    registry: Arc<SessionRegistry>,
}

impl Gateway {
    /// Build a gateway with the HTTP upstream described by `config`.
    ///
    /// Refuses to start (`ConfigMissing`) without a base URL or key.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let upstream = create_upstream(&config.upstream)?;
        Self::with_upstream(config, upstream)
    }

    /// Build a gateway around an existing upstream transport
    pub fn with_upstream(config: GatewayConfig, upstream: Arc<dyn Upstream>) -> Result<Self> {
        config.validate()?;
        info!(
            upstream = %config.upstream.host(),
            max_sessions = config.limits.max_sessions,
            "Gateway ready"
        );
        Ok(Self {
            registry: SessionRegistry::new(config.limits.max_sessions),
            config: Arc::new(config),
            upstream,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn prepare(&self, request: ChatRequest, stream: bool) -> Result<ChatRequest> {
        request
            .streaming(stream)
            .resolve(self.config.upstream.default_model.as_deref())
    }

    /// Relay a request and buffer the whole upstream response
    pub async fn complete(&self, request: ChatRequest) -> Result<CompletedSession> {
        let request = self.prepare(request, false)?;
        let guard = self.registry.register(request.model(), false)?;
        info!(session = %guard.id(), model = request.model(), "Relaying chat completion");

        match self.upstream.complete(&request, guard.cancel_token()).await {
            Ok(completion) => {
                guard.complete();
                Ok(CompletedSession {
                    id: guard.id(),
                    completion,
                })
            }
            Err(e) => {
                warn!(session = %guard.id(), "Chat completion failed: {}", e);
                guard.finish_with(&e);
                Err(e)
            }
        }
    }

    /// Relay a request as a lazy chunk stream.
    ///
    /// Capacity and validation errors are returned immediately; upstream
    /// errors arrive as the last item of the stream, after every chunk
    /// already received.
    pub fn stream(&self, request: ChatRequest) -> Result<SessionStream> {
        let request = self.prepare(request, true)?;
        let guard = self.registry.register(request.model(), true)?;
        info!(session = %guard.id(), model = request.model(), "Relaying chat stream");

        let upstream = self.upstream.stream(&request, guard.cancel_token());
        Ok(SessionStream::new(guard, upstream))
    }

    /// Upstream model list
    pub async fn list_models(&self) -> Result<Value> {
        self.upstream.list_models().await
    }

    /// Cancel an in-flight session
    pub fn cancel(&self, id: SessionId) -> bool {
        self.registry.cancel(id)
    }
}
