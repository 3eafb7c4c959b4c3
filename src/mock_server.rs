//! Mock upstream server for testing offline
//!
//! Wiremock-based stand-in for an OpenAI-compatible API, so tests run
//! without real API keys.

use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// OpenAI mock server for testing
pub struct OpenAIMockServer {
    server: MockServer,
}

impl OpenAIMockServer {
    /// Create a new OpenAI mock server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Get the base URL of this mock server
    pub fn base_url(&self) -> String {
        format!("{}/v1", self.server.uri())
    }

    fn completion_body(content: &str, total_tokens: u32) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "created": 1234567890,
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": content
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": total_tokens - 10,
                "total_tokens": total_tokens
            }
        })
    }

    /// Setup a mock response for non-streaming chat completion
    pub async fn mock_chat_completion(&self, content: &str, total_tokens: u32) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(Self::completion_body(content, total_tokens)),
            )
            .mount(&self.server)
            .await;
    }

    /// Setup a completion that only answers after `delay`
    pub async fn mock_slow_completion(&self, delay: Duration) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(Self::completion_body("slow", 20))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Setup a mock response for streaming chat completion (SSE)
    pub async fn mock_chat_streaming(&self, chunks: Vec<&str>) {
        let mut sse_response = String::new();

        for (i, chunk) in chunks.iter().enumerate() {
            let finish_reason = if i == chunks.len() - 1 {
                serde_json::json!("stop")
            } else {
                serde_json::Value::Null
            };

            let chunk_json = serde_json::json!({
                "id": "chatcmpl-mock",
                "object": "chat.completion.chunk",
                "created": 1234567890,
                "model": "gpt-4",
                "choices": [{
                    "index": 0,
                    "delta": {
                        "content": chunk
                    },
                    "finish_reason": finish_reason
                }]
            });

            sse_response.push_str(&format!("data: {}\n\n", chunk_json));
        }

        sse_response.push_str("data: [DONE]\n\n");

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_response),
            )
            .mount(&self.server)
            .await;
    }

    /// Setup a raw SSE body for chat completions
    pub async fn mock_sse_body(&self, body: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&self.server)
            .await;
    }

    /// Setup a plain JSON answer, whatever the request asked for
    pub async fn mock_json_reply(&self, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Setup a non-success response for chat completions
    pub async fn mock_error(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Setup the model list endpoint
    pub async fn mock_models(&self, ids: &[&str]) {
        let data: Vec<_> = ids
            .iter()
            .map(|id| serde_json::json!({"id": id, "object": "model", "owned_by": "mock"}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"object": "list", "data": data})),
            )
            .mount(&self.server)
            .await;
    }
}
