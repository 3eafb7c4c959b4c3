//! OpenAI-compatible HTTP upstream

use super::retry::{FailurePhase, RetryPolicy};
use super::sse::{SseBuffer, SseLine, MAX_LINE_BYTES};
use super::{Chunk, ChunkStream, Completion, Upstream, UpstreamEvent};
use crate::config::{ApiKey, UpstreamConfig};
use crate::message::ChatRequest;
use crate::{Error, Result};
use futures::StreamExt;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Build an HTTP client with specified timeouts
fn build_http_client(
    timeout: Duration,
    connect_timeout: Duration,
) -> std::result::Result<HttpClient, reqwest::Error> {
    HttpClient::builder()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .build()
}

/// Upstream speaking the OpenAI chat completions protocol
#[derive(Clone)]
pub struct OpenAIUpstream {
    api_base: String,
    api_key: ApiKey,
    timeout: Duration,
    retry: RetryPolicy,
    http_client: HttpClient,
}

impl OpenAIUpstream {
    /// Create a new upstream; fails with `ConfigMissing` without touching the network
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        config.validate()?;
        Ok(OpenAIUpstream {
            api_base: config.base_url().to_string(),
            api_key: config.api_key.clone(),
            timeout: config.timeout(),
            retry: RetryPolicy::default(),
            http_client: build_http_client(config.timeout(), config.connect_timeout())?,
        })
    }

    /// Replace the connection retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn failure_phase(err: &reqwest::Error) -> FailurePhase {
        if err.is_timeout() {
            FailurePhase::Timeout
        } else if err.is_connect() || err.is_request() {
            FailurePhase::Connect
        } else {
            FailurePhase::AfterFirstByte
        }
    }

    fn map_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::UpstreamTimeout(self.timeout)
        } else if err.is_connect() || err.is_request() {
            Error::UpstreamUnavailable(err.to_string())
        } else {
            Error::Http(err)
        }
    }

    /// Strip the credential from text that came back from the upstream
    fn redact(&self, text: String) -> String {
        let key = self.api_key.expose();
        if key.is_empty() || !text.contains(key) {
            return text;
        }
        text.replace(key, "***")
    }

    /// Send a request, retrying once if the connection fails before any data.
    ///
    /// Returns once response headers arrive; non-success statuses become
    /// `UpstreamError` with the body passed through.
    async fn send<F>(&self, make: F, cancel: &CancellationToken) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        loop {
            let request = make().bearer_auth(self.api_key.expose());
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::ClientCancelled),
                outcome = request.send() => outcome,
            };

            match outcome {
                Ok(response) => return self.check_status(response, cancel).await,
                Err(e) => {
                    let phase = Self::failure_phase(&e);
                    if self.retry.should_retry(retries, phase) {
                        retries += 1;
                        warn!(
                            "Upstream connection failed ({}), retrying (attempt {}/{})",
                            e, retries, self.retry.max_retries
                        );
                        continue;
                    }
                    return Err(self.map_error(e));
                }
            }
        }
    }

    async fn check_status(&self, response: Response, cancel: &CancellationToken) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::ClientCancelled),
            body = response.text() => body.unwrap_or_else(|e| {
                warn!("Failed to read upstream error body ({}): {}", status, e);
                String::new()
            }),
        };
        Err(Error::UpstreamError {
            status: status.as_u16(),
            body: self.redact(body),
        })
    }
}

#[async_trait::async_trait]
impl Upstream for OpenAIUpstream {
    async fn complete(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<Completion> {
        let url = self.url("chat/completions");
        let request = request.clone().streaming(false);
        debug!(model = request.model(), "Sending chat completion upstream");

        let response = self
            .send(|| self.http_client.post(&url).json(&request), &cancel)
            .await?;

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::ClientCancelled),
            bytes = response.bytes() => bytes.map_err(|e| self.map_error(e))?,
        };
        let body: Value = serde_json::from_slice(&bytes)?;
        Ok(Completion::from_body(body))
    }

    fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> ChunkStream {
        let upstream = self.clone();
        let url = self.url("chat/completions");
        let request = request.clone().streaming(true);

        Box::pin(async_stream::stream! {
            debug!(model = request.model(), "Opening upstream stream");
            let response = match upstream
                .send(|| upstream.http_client.post(&url).json(&request), &cancel)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let status = response.status().as_u16();
            let mut body = response.bytes_stream();
            let mut sse = SseBuffer::new();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => None,
                    next = body.next() => Some(next),
                };

                let bytes = match next {
                    None => {
                        debug!("Upstream stream cancelled");
                        yield Err(Error::ClientCancelled);
                        return;
                    }
                    Some(None) => break,
                    Some(Some(Err(e))) => {
                        yield Err(upstream.map_error(e));
                        return;
                    }
                    Some(Some(Ok(bytes))) => bytes,
                };

                sse.extend(&bytes);
                while let Some(line) = sse.next_line() {
                    match line {
                        SseLine::Done => {
                            yield Ok(UpstreamEvent::Done);
                            return;
                        }
                        SseLine::Data(data) => {
                            yield Ok(UpstreamEvent::Chunk(Chunk::new(data)));
                        }
                        SseLine::Skip => {}
                    }
                }

                if sse.pending_len() > MAX_LINE_BYTES {
                    warn!("Upstream SSE line exceeds {} bytes", MAX_LINE_BYTES);
                    yield Err(Error::UpstreamError {
                        status,
                        body: format!("SSE line exceeds {} bytes", MAX_LINE_BYTES),
                    });
                    return;
                }
            }

            match sse.finish() {
                Some(SseLine::Done) => {
                    yield Ok(UpstreamEvent::Done);
                    return;
                }
                Some(SseLine::Data(data)) => {
                    yield Ok(UpstreamEvent::Chunk(Chunk::new(data)));
                }
                _ => {}
            }

            // A 200 body without a single data line is not a stream
            if !sse.is_framed() {
                let body = upstream.redact(sse.take_unframed().trim().to_string());
                warn!("Upstream answered {} without SSE data", status);
                yield Err(Error::UpstreamError { status, body });
                return;
            }

            warn!("Upstream stream ended without [DONE]");
            yield Ok(UpstreamEvent::Done);
        })
    }

    async fn list_models(&self) -> Result<Value> {
        let url = self.url("models");
        let response = self
            .send(|| self.http_client.get(&url), &CancellationToken::new())
            .await?;
        Ok(response.json::<Value>().await?)
    }

    fn api_base(&self) -> &str {
        &self.api_base
    }
}
