//! Module for downloading model files
//!
//! This module accepts download requests, deduplicates them against the
//! in-memory history, and runs them on a fixed pool of workers that each
//! supervise one external transfer program at a time.

mod events;
mod executor;
mod fingerprint;
mod history;
mod models;
mod pack;
mod provider;
mod queue;

use thiserror::Error;

// Re-export the public API
pub use events::BroadcastNotifier;
pub use fingerprint::fingerprint;
pub use history::History;
pub use models::{Category, DownloadEvent, Job, SubmitOutcome, TargetApp};
pub use pack::PackRequest;
pub use provider::{Planner, TransferSettings};
pub use queue::{DEFAULT_CONCURRENCY, DownloadQueue};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Download job not found: {0}")]
    NotFound(String),

    #[error("Failed to fetch pack manifest: {0}")]
    ManifestFetch(#[from] reqwest::Error),

    #[error("Download queue is shut down")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, DownloadError>;
