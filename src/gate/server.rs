//! Gateway HTTP server

use crate::gate::handlers::{self, GatewayState};
use crate::{Gateway, GatewayConfig};
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Build the gateway router
pub fn router(gateway: Arc<Gateway>) -> Router {
    let state = GatewayState { gateway };

    Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        // Session management
        .route("/v1/sessions", get(handlers::list_sessions))
        .route("/v1/sessions/:id", delete(handlers::cancel_session))
        // Utility endpoints
        .route("/health", get(health_check))
        .with_state(state)
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve on an already-bound listener until `shutdown` fires.
///
/// Shutdown cancels every in-flight session so open streams end promptly.
pub async fn serve(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let registry = Arc::clone(gateway.registry());
    let app = router(gateway);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            let cancelled = registry.cancel_all();
            info!("Shutting down, cancelled {} in-flight session(s)", cancelled);
        })
        .await?;

    Ok(())
}

/// Start the gateway server and run until Ctrl-C
pub async fn start_server(config: GatewayConfig) -> anyhow::Result<()> {
    let addr = config.listen_addr();
    let gateway = Arc::new(Gateway::new(config)?);

    let listener = TcpListener::bind(&addr).await?;
    info!("Starting Concierge on http://{}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            signal.cancel();
        }
    });

    serve(listener, gateway, shutdown).await
}

/// Health check handler
async fn health_check(State(state): State<GatewayState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_sessions": state.gateway.registry().len(),
    }))
}

/// Logging middleware
async fn logging_middleware(req: Request, next: Next) -> axum::response::Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    info!("{} {} {} {:?}", method, uri, status, duration);

    response
}
