//! Concierge: a gateway that relays chat requests to an OpenAI-compatible API.
mod chat;
mod config;
mod gateway;
mod message;
mod registry;
pub mod upstream;

#[cfg(feature = "gate")]
pub mod gate;

#[cfg(test)]
mod mock_server;

use std::time::Duration;
use thiserror::Error;

/// Result type for concierge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for concierge operations
#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration value (upstream base URL or API key) is absent
    #[error("Configuration missing: {0} is not set")]
    ConfigMissing(&'static str),

    /// The session registry is full
    #[error("Capacity exceeded: {limit} concurrent sessions already in flight")]
    CapacityExceeded { limit: usize },

    /// The upstream could not be reached
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The upstream did not answer within the request timeout
    #[error("Upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// The upstream answered with a non-success status
    #[error("Upstream error ({status}): {body}")]
    UpstreamError { status: u16, body: String },

    /// The caller went away or cancelled the session
    #[error("Client cancelled the request")]
    ClientCancelled,

    /// The client payload cannot be forwarded
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConfigMissing(_) => "config_missing",
            Error::CapacityExceeded { .. } => "capacity_exceeded",
            Error::UpstreamUnavailable(_) => "upstream_unavailable",
            Error::UpstreamTimeout(_) => "upstream_timeout",
            Error::UpstreamError { .. } => "upstream_error",
            Error::ClientCancelled => "client_cancelled",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Http(_) => "http_error",
            Error::Json(_) => "json_error",
            Error::Config(_) => "config_error",
        }
    }

    /// Whether the session ended because it was cancelled rather than failed
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::ClientCancelled)
    }
}

pub use chat::ChatSession;
pub use config::{ApiKey, ConfigOverrides, GatewayConfig, LimitsConfig, ServerConfig, UpstreamConfig};
pub use gateway::{CompletedSession, Gateway, GatewayEvent, SessionStream};
pub use message::{ChatRequest, Message, MessageRole, Usage};
pub use registry::{SessionGuard, SessionId, SessionInfo, SessionRegistry, SessionState};
pub use upstream::{create_upstream, Chunk, Completion, OpenAIUpstream, RetryPolicy, Upstream, UpstreamEvent};
