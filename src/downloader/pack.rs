//! Model pack manifests
//!
//! A pack is a remotely hosted JSON array describing a batch of models:
//!
//! ```json
//! [{"name": "SDXL base", "url": "https://...", "type": "checkpoints"}]
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::Result;

/// One entry of a pack manifest.
///
/// The category is kept as a raw string so a single unknown category skips
/// that item instead of rejecting the whole manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestItem {
    pub name: String,
    pub url: String,
    #[serde(alias = "type", alias = "model_type")]
    pub category: String,
    /// Derive the output filename locally instead of trusting the remote
    #[serde(default)]
    pub force_filename: bool,
}

/// A pack reference as sent by the UI: display name plus manifest URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackRequest {
    pub name: String,
    pub url: url::Url,
}

/// Tally of what a pack import did with its items
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PackReport {
    pub admitted: usize,
    pub duplicated: usize,
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Fetch and decode a manifest. Any transport, status or decode error fails
/// the whole pack.
#[instrument(level = "debug", skip(client))]
pub async fn fetch_manifest(client: &reqwest::Client, url: &str) -> Result<Vec<ManifestItem>> {
    let items: Vec<ManifestItem> = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    debug!(items = items.len(), "Fetched pack manifest");
    Ok(items)
}
