//! Router configuration and server setup.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::handlers;
use crate::state::AppState;

/// Creates the webhook router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/webhooks/github", post(handlers::github_webhook))
        .route("/api/webhooks/plane", post(handlers::plane_webhook))
        .layer(cors)
        .with_state(state)
}

/// Binds and serves the webhook endpoints.
pub async fn serve(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("webhook server listening on {}", addr);
    axum::serve(listener, create_router(state)).await
}
