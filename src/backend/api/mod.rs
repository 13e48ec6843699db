use axum::{
    Router,
    routing::{get, post, put},
};

use super::SharedState;

pub mod config;
pub mod downloader;

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/download_custom_model",
            post(downloader::download_custom_model),
        )
        .route("/download_selected", post(downloader::download_selected))
        .route("/download_history", get(downloader::download_history))
        .route("/download_history/{id}", get(downloader::download_history_item))
        .route("/update_env/{provider}", put(config::update_env))
        .route("/get_model_packs", get(config::get_model_packs))
}
