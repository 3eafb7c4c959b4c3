//! HTTP request handlers for the gateway

use super::response::{sse_event, ApiError};
use crate::{ChatRequest, Error, Gateway, SessionId};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info};

/// Response header naming the session that served a chat request
pub const SESSION_HEADER: &str = "x-session-id";

/// Gateway state shared across handlers
#[derive(Clone)]
pub struct GatewayState {
    pub gateway: Arc<Gateway>,
}

fn with_session_header(mut response: Response, id: SessionId) -> Response {
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Handle OpenAI-compatible chat completions (streaming and non-streaming)
pub async fn chat_completions(State(state): State<GatewayState>, body: Bytes) -> Response {
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return ApiError(Error::InvalidRequest(format!("Invalid request body: {}", e)))
                .into_response()
        }
    };

    debug!(
        model = request.model(),
        stream = request.stream,
        messages = request.messages.len(),
        "Chat completion request"
    );

    if request.stream {
        stream_chat(&state, request)
    } else {
        complete_chat(&state, request).await
    }
}

async fn complete_chat(state: &GatewayState, request: ChatRequest) -> Response {
    match state.gateway.complete(request).await {
        Ok(session) => with_session_header(Json(session.completion.body).into_response(), session.id),
        Err(e) => ApiError(e).into_response(),
    }
}

fn stream_chat(state: &GatewayState, request: ChatRequest) -> Response {
    let stream = match state.gateway.stream(request) {
        Ok(stream) => stream,
        Err(e) => return ApiError(e).into_response(),
    };
    let id = stream.id();
    let events = stream.map(|item| Ok::<_, Infallible>(sse_event(item)));
    let response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    with_session_header(response, id)
}

/// Relay the upstream model list
pub async fn list_models(State(state): State<GatewayState>) -> Response {
    match state.gateway.list_models().await {
        Ok(models) => Json(models).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// List in-flight sessions
pub async fn list_sessions(State(state): State<GatewayState>) -> Json<Value> {
    let registry = state.gateway.registry();
    Json(json!({
        "object": "list",
        "capacity": registry.capacity(),
        "data": registry.snapshot(),
    }))
}

/// Cancel an in-flight session
pub async fn cancel_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    let cancelled = id
        .parse::<SessionId>()
        .map(|id| state.gateway.cancel(id))
        .unwrap_or(false);

    if cancelled {
        info!(session = %id, "Session cancelled by request");
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "message": format!("No in-flight session '{}'", id),
                    "type": "not_found",
                }
            })),
        )
            .into_response()
    }
}
