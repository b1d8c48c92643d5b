//! Router configuration.

use super::handlers::{self, AppState};
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the porterd router.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/frames", post(handlers::ingest_frame))
        .route("/identities", get(handlers::list_identities))
        .route("/identities/:name", post(handlers::enroll))
        .route("/identities/:name", put(handlers::rename_identity))
        .route("/identities/:name", delete(handlers::remove_identity))
        .route("/attendance/today", get(handlers::attendance_today))
        .route("/attendance/recent", get(handlers::attendance_recent))
        .route("/visitors/recent", get(handlers::visitors_recent))
        .route("/chat", post(handlers::chat))
        .route("/chat/status", get(handlers::chat_status));

    let webhooks = Router::new()
        .route("/messaging/inbound", post(handlers::inbound_reply))
        .route("/messaging/status", post(handlers::delivery_status));

    Router::new()
        .nest("/api/v1", api)
        .nest("/webhooks", webhooks)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
