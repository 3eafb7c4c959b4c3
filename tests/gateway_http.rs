//! HTTP surface tests for concierge-server
//!
//! Drive the router in-process against a wiremock upstream.

#![cfg(feature = "gate")]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use concierge::gate::router;
use concierge::{Gateway, GatewayConfig};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "sk-test-0123456789";

async fn app(upstream: &MockServer) -> Router {
    let mut config = GatewayConfig::with_upstream(format!("{}/v1", upstream.uri()), API_KEY);
    config.upstream.default_model = Some("gpt-4".to_string());
    router(Arc::new(Gateway::new(config).unwrap()))
}

fn completion_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "gpt-4",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
    })
}

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        let chunk = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": delta}, "finish_reason": null}]
        });
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_health() {
    let upstream = MockServer::start().await;
    let response = app(&upstream).await.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn test_non_streaming_passthrough() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", format!("Bearer {}", API_KEY).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hi!")))
        .expect(1)
        .mount(&upstream)
        .await;

    let response = app(&upstream)
        .await
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-session-id"));
    let body = body_json(response).await;
    assert_eq!(body, completion_body("Hi!"));
}

#[tokio::test]
async fn test_default_model_is_applied() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .mount(&upstream)
        .await;

    let response = app(&upstream)
        .await
        .oneshot(chat_request(json!({
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let received = upstream.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent["model"], "gpt-4");
}

#[tokio::test]
async fn test_streaming_relays_chunks_in_order() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["Alpha", "Beta", "Gamma"])),
        )
        .mount(&upstream)
        .await;

    let router = app(&upstream).await;
    let response = router
        .clone()
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "stream": true,
            "messages": [{"role": "user", "content": "Count"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-session-id"));
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = body_text(response).await;
    let alpha = text.find("Alpha").unwrap();
    let beta = text.find("Beta").unwrap();
    let gamma = text.find("Gamma").unwrap();
    let done = text.find("data: [DONE]").unwrap();
    assert!(alpha < beta && beta < gamma && gamma < done);

    let sessions = body_json(router.oneshot(get("/v1/sessions")).await.unwrap()).await;
    assert_eq!(sessions["data"], json!([]));
}

#[tokio::test]
async fn test_upstream_error_status_passthrough() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&upstream)
        .await;

    let response = app(&upstream)
        .await
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["message"], "Incorrect API key provided");
    assert_eq!(body["error"]["type"], "upstream_error");
}

#[tokio::test]
async fn test_streaming_upstream_error_is_status_event() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&upstream)
        .await;

    let response = app(&upstream)
        .await
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "stream": true,
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();

    let text = body_text(response).await;
    assert!(text.contains("event: error"));
    assert!(text.contains("overloaded"));
    assert!(!text.contains("[DONE]"));
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let upstream = MockServer::start().await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app(&upstream).await.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "invalid_request");
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_messages_is_bad_request() {
    let upstream = MockServer::start().await;
    let response = app(&upstream)
        .await
        .oneshot(chat_request(json!({"model": "gpt-4", "messages": []})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_unknown_session_is_not_found() {
    let upstream = MockServer::start().await;
    let router = app(&upstream).await;

    let unknown = Request::builder()
        .method("DELETE")
        .uri("/v1/sessions/6f1c1f7e-3a55-4c36-9d1e-0f0e7d2b9a10")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(unknown).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["type"], "not_found");

    let malformed = Request::builder()
        .method("DELETE")
        .uri("/v1/sessions/not-a-session")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(malformed).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_in_flight_session() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("late"))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&upstream)
        .await;

    let router = app(&upstream).await;
    let pending = tokio::spawn(router.clone().oneshot(chat_request(json!({
        "model": "gpt-4",
        "messages": [{"role": "user", "content": "Take your time"}]
    }))));

    let mut id = None;
    for _ in 0..100 {
        let sessions = body_json(router.clone().oneshot(get("/v1/sessions")).await.unwrap()).await;
        if let Some(session) = sessions["data"].as_array().and_then(|d| d.first()) {
            assert_eq!(session["model"], "gpt-4");
            id = session["id"].as_str().map(str::to_string);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let id = id.expect("session never appeared");

    let cancel = Request::builder()
        .method("DELETE")
        .uri(format!("/v1/sessions/{}", id))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(cancel).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(response.status().as_u16(), 499);

    let health = body_json(router.oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["active_sessions"], 0);
}

#[tokio::test]
async fn test_models_relay() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"id": "gpt-4", "object": "model"}]
        })))
        .mount(&upstream)
        .await;

    let response = app(&upstream).await.oneshot(get("/v1/models")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"][0]["id"], "gpt-4");
}

#[tokio::test]
async fn test_missing_model_without_default_is_bad_request() {
    let upstream = MockServer::start().await;
    let config = GatewayConfig::with_upstream(format!("{}/v1", upstream.uri()), API_KEY);
    let router = router(Arc::new(Gateway::new(config).unwrap()));

    let response = router
        .oneshot(chat_request(json!({
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_capacity_exceeded_is_too_many_requests() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("slow"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&upstream)
        .await;

    let mut config = GatewayConfig::with_upstream(format!("{}/v1", upstream.uri()), API_KEY);
    config.limits.max_sessions = 1;
    let gateway = Arc::new(Gateway::new(config).unwrap());
    let router = router(Arc::clone(&gateway));

    let first = tokio::spawn(router.clone().oneshot(chat_request(json!({
        "model": "gpt-4",
        "messages": [{"role": "user", "content": "first"}]
    }))));
    for _ in 0..100 {
        if !gateway.registry().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gateway.registry().len(), 1);

    let second = router
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "second"}]
        })))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(second).await["error"]["type"], "capacity_exceeded");

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(gateway.registry().is_empty());
}

#[tokio::test]
async fn test_tool_call_history_is_forwarded_verbatim() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("It is sunny")))
        .mount(&upstream)
        .await;

    let messages = json!([
        {"role": "developer", "content": "Use the tools you are given"},
        {"role": "user", "name": "alice", "content": [
            {"type": "text", "text": "Weather in Paris?"},
            {"type": "image_url", "image_url": {"url": "https://example.com/sky.png"}}
        ]},
        {"role": "assistant", "content": null, "tool_calls": [{
            "id": "call_1",
            "type": "function",
            "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
        }]},
        {"role": "tool", "tool_call_id": "call_1", "content": "{\"sky\":\"clear\"}"}
    ]);
    let tools = json!([{
        "type": "function",
        "function": {"name": "get_weather", "parameters": {"type": "object"}}
    }]);

    let response = app(&upstream)
        .await
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "messages": messages,
            "tools": tools
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let received = upstream.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent["messages"], messages);
    assert_eq!(sent["tools"], tools);
}

#[tokio::test]
async fn test_streaming_request_answered_without_sse_is_error_event() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("lost reply")))
        .mount(&upstream)
        .await;

    let router = app(&upstream).await;
    let response = router
        .clone()
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "stream": true,
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();

    let text = body_text(response).await;
    assert!(text.contains("event: error"));
    assert!(text.contains("lost reply"));
    assert!(!text.contains("[DONE]"));

    let health = body_json(router.oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["active_sessions"], 0);
}
