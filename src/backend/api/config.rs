use axum::{
    Json,
    extract::{Path, Query, State},
};
use color_eyre::eyre::WrapErr;
use http::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::backend::{ApiError, ApiRes, SharedState};
use crate::credentials::TokenKind;

#[derive(Debug, Deserialize)]
pub struct UpdateEnvQuery {
    #[serde(default)]
    pub value: String,
}

/// Replace an API token at runtime. An empty value clears it.
pub async fn update_env(
    State(state): State<SharedState>,
    Path(provider): Path<TokenKind>,
    Query(query): Query<UpdateEnvQuery>,
) -> StatusCode {
    state.credentials.set(provider, query.value);
    StatusCode::NO_CONTENT
}

/// Serve the pack catalogue for the configured front-end
pub async fn get_model_packs(State(state): State<SharedState>) -> ApiRes<Json<Value>> {
    let path = &state.model_packs_file;
    tracing::trace!(path = ?path, "Reading model packs");
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!(
                "No model packs found at {}",
                path.display()
            )));
        }
        Err(e) => {
            return Err(ApiError::Internal(
                color_eyre::Report::new(e).wrap_err("Failed to read model packs"),
            ));
        }
    };
    let packs = serde_json::from_str(&contents).wrap_err("Model packs file is not valid JSON")?;
    Ok(Json(packs))
}
