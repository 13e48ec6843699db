use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use super::SharedState;
use crate::backend::api::api_router;
use crate::backend::ws::ws_handler;

/// Create the main backend router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/api", api_router())
        .route("/ws/{client_id}", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
