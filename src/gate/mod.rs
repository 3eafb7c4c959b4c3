//! HTTP gateway module
//!
//! Exposes a [`Gateway`](crate::Gateway) over an OpenAI-compatible HTTP surface.

pub mod handlers;
pub mod response;
pub mod server;

pub use handlers::GatewayState;
pub use server::{router, serve, start_server};
