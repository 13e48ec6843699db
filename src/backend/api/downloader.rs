//! Downloader API module

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::backend::{ApiError, ApiRes, SharedState};
use crate::downloader::{Category, Job, PackRequest, SubmitOutcome, fingerprint};

#[derive(Debug, Deserialize)]
pub struct CustomModelRequest {
    pub url: String,
    pub model_type: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: SubmitOutcome,
    pub message: &'static str,
    pub id: String,
}

fn parse_download_url(raw: &str) -> ApiRes<String> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(raw.to_string()),
        Ok(url) => Err(ApiError::Unprocessable(format!(
            "Unsupported URL scheme: {}",
            url.scheme()
        ))),
        Err(e) => Err(ApiError::Unprocessable(format!("Invalid URL: {e}"))),
    }
}

/// Queue a single model download
pub async fn download_custom_model(
    State(state): State<SharedState>,
    Json(request): Json<CustomModelRequest>,
) -> ApiRes<Json<SubmitResponse>> {
    let url = parse_download_url(&request.url)?;
    let category = request
        .model_type
        .parse::<Category>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::debug!(%url, %category, "Custom model download requested");
    let status = state.queue.submit(url.as_str(), request.name, category).await?;

    Ok(Json(SubmitResponse {
        status,
        message: status.message(),
        id: fingerprint(&url),
    }))
}

/// Import the selected model packs in the background
pub async fn download_selected(
    State(state): State<SharedState>,
    Json(packs): Json<Vec<PackRequest>>,
) -> impl IntoResponse {
    tracing::info!(packs = packs.len(), "Model pack download requested");
    let queue = state.queue.clone();
    tokio::spawn(async move {
        queue.import_packs(packs).await;
    });
    Json(json!({ "status": "received" }))
}

pub async fn download_history(State(state): State<SharedState>) -> Json<Vec<Job>> {
    Json(state.queue.history().get())
}

pub async fn download_history_item(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiRes<Json<Job>> {
    Ok(Json(state.queue.history().get_by_id(&id)?))
}
