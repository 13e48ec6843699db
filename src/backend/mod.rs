//! HTTP and WebSocket surface over the download core

pub mod api;
pub mod router;
pub mod ws;

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde_json::json;
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;

use crate::credentials::Credentials;
use crate::downloader::{BroadcastNotifier, DownloadError, DownloadQueue};

/// Shared state handed to every handler
pub struct AppState {
    pub queue: Arc<DownloadQueue>,
    pub notifier: BroadcastNotifier,
    pub credentials: Arc<Credentials>,
    pub model_packs_file: PathBuf,
    /// Cancelled when the server is going down, closes open WebSockets
    pub shutdown: CancellationToken,
}

pub type SharedState = Arc<AppState>;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Internal(#[from] color_eyre::Report),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) | Self::Download(DownloadError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Download(DownloadError::QueueClosed) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Download(DownloadError::ManifestFetch(_)) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(json!({ "status": "error", "message": self.to_string() }));
        (status, body).into_response()
    }
}

pub type ApiRes<T> = Result<T, ApiError>;
