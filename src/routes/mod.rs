pub mod messages;
pub mod posts;
pub mod uploads;
pub mod users;

use axum::extract::DefaultBodyLimit;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full application router.
pub fn app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes() + 64 * 1024;

    Router::new()
        .route("/", get(health))
        .route("/uploads/{file}", get(uploads::serve))
        .merge(users::router())
        .merge(posts::router())
        .merge(messages::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "success": true, "message": "picstream is running" }))
}
