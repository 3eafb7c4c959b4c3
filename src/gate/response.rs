//! Structured error responses and SSE framing

use crate::{Error, GatewayEvent, Result};
use axum::{
    http::StatusCode,
    response::{sse::Event, IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{error, warn};

/// Non-standard status used when the client went away first
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// HTTP status for an error kind
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::UpstreamUnavailable(_) | Error::Http(_) | Error::Json(_) => StatusCode::BAD_GATEWAY,
        Error::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::UpstreamError { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        Error::ClientCancelled => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
        }
        Error::ConfigMissing(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Best human-readable message inside an upstream error body
fn upstream_message(status: u16, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => format!("Upstream returned status {}", status),
        None => body.trim().to_string(),
    }
}

/// JSON body describing an error: `{"error": {"message", "type", "status"?}}`
pub fn error_body(err: &Error) -> Value {
    match err {
        Error::UpstreamError { status, body } => json!({
            "error": {
                "message": upstream_message(*status, body),
                "type": err.kind(),
                "status": status,
            }
        }),
        _ => json!({
            "error": {
                "message": err.to_string(),
                "type": err.kind(),
            }
        }),
    }
}

/// Error wrapper that renders as a structured JSON response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed ({}): {}", status, self.0);
        } else {
            warn!("Request rejected ({}): {}", status, self.0);
        }
        (status, Json(error_body(&self.0))).into_response()
    }
}

/// Frame one relayed item as an SSE event.
///
/// Chunks are forwarded verbatim, the end marker becomes `data: [DONE]` and a
/// failure becomes an `error` event carrying [`error_body`].
pub fn sse_event(item: Result<GatewayEvent>) -> Event {
    match item {
        Ok(GatewayEvent::Chunk(chunk)) => Event::default().data(chunk.data()),
        Ok(GatewayEvent::End) => Event::default().data("[DONE]"),
        Err(e) => {
            warn!("Relaying stream error to client: {}", e);
            Event::default().event("error").data(error_body(&e).to_string())
        }
    }
}
