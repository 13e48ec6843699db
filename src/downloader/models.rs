//! Data structures for the download system
//!
//! This file contains the core data types used throughout the download system,
//! including job records, status enums, model categories and lifecycle events.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Status of a download job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job has been admitted but is waiting for a free worker
    #[default]
    InQueue,
    /// A transfer process is running for this job
    Downloading,
    /// A failed job was resubmitted and is waiting for a free worker
    Retrying,
    /// Transfer program exited with status 0
    Completed,
    /// Transfer failed, could not be spawned, or was cancelled
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InQueue => write!(f, "IN_QUEUE"),
            Self::Downloading => write!(f, "DOWNLOADING"),
            Self::Retrying => write!(f, "RETRYING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Destination category of a model file.
///
/// Wire names match the directory names used by ComfyUI, which is also the
/// default on-disk layout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    #[serde(rename = "checkpoints")]
    Checkpoints,
    #[serde(rename = "clip")]
    Clip,
    #[serde(rename = "clip_vision")]
    ClipVision,
    #[serde(rename = "controlnet")]
    Controlnet,
    #[serde(rename = "diffusion_models")]
    DiffusionModels,
    #[serde(rename = "embeddings")]
    Embeddings,
    #[serde(rename = "esrgan")]
    Esrgan,
    #[serde(rename = "gfpgan")]
    Gfpgan,
    #[serde(rename = "gligen")]
    Gligen,
    #[serde(rename = "hypernetwork")]
    Hypernetwork,
    #[serde(rename = "hypernetworks")]
    Hypernetworks,
    #[serde(rename = "ipadapter")]
    Ipadapter,
    #[serde(rename = "loras")]
    Loras,
    #[serde(rename = "text-encoder")]
    TextEncoder,
    #[serde(rename = "text_encoders")]
    TextEncoders,
    #[serde(rename = "unet")]
    Unet,
    #[serde(rename = "upscale_models")]
    UpscaleModels,
    #[serde(rename = "vae")]
    Vae,
}

impl Category {
    pub const ALL: [Category; 18] = [
        Self::Checkpoints,
        Self::Clip,
        Self::ClipVision,
        Self::Controlnet,
        Self::DiffusionModels,
        Self::Embeddings,
        Self::Esrgan,
        Self::Gfpgan,
        Self::Gligen,
        Self::Hypernetwork,
        Self::Hypernetworks,
        Self::Ipadapter,
        Self::Loras,
        Self::TextEncoder,
        Self::TextEncoders,
        Self::Unet,
        Self::UpscaleModels,
        Self::Vae,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkpoints => "checkpoints",
            Self::Clip => "clip",
            Self::ClipVision => "clip_vision",
            Self::Controlnet => "controlnet",
            Self::DiffusionModels => "diffusion_models",
            Self::Embeddings => "embeddings",
            Self::Esrgan => "esrgan",
            Self::Gfpgan => "gfpgan",
            Self::Gligen => "gligen",
            Self::Hypernetwork => "hypernetwork",
            Self::Hypernetworks => "hypernetworks",
            Self::Ipadapter => "ipadapter",
            Self::Loras => "loras",
            Self::TextEncoder => "text-encoder",
            Self::TextEncoders => "text_encoders",
            Self::Unet => "unet",
            Self::UpscaleModels => "upscale_models",
            Self::Vae => "vae",
        }
    }

    /// Directory name for this category under the resource root.
    ///
    /// Forge keeps its own folder names for a handful of categories; every
    /// other target uses the category name as-is.
    pub fn directory_for(&self, target: TargetApp) -> &'static str {
        if target != TargetApp::Forge {
            return self.as_str();
        }
        match self {
            Self::Checkpoints | Self::Unet => "ckpts",
            Self::Clip | Self::TextEncoder => "text-encoder",
            Self::UpscaleModels => "esrgan",
            Self::Hypernetworks => "hypernetwork",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown model category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// The Stable Diffusion front-end whose model tree we are filling
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetApp {
    #[default]
    Comfy,
    Forge,
    #[value(name = "invokeai")]
    InvokeAi,
}

impl TargetApp {
    /// Whether model packs may place files of this category for the target.
    pub fn supports(&self, category: Category) -> bool {
        match self {
            Self::InvokeAi => !matches!(
                category,
                Category::TextEncoders | Category::Clip | Category::Vae
            ),
            _ => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comfy => "comfy",
            Self::Forge => "forge",
            Self::InvokeAi => "invokeai",
        }
    }
}

/// One requested file transfer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "model_type")]
    pub category: Category,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Creates a queued job for `url`. The display name falls back to the
    /// category name when the caller has none.
    pub fn new(url: impl Into<String>, name: Option<String>, category: Category) -> Self {
        let url = url.into();
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| category.to_string());
        Self {
            id: super::fingerprint(&url),
            name,
            url,
            category,
            status: JobStatus::InQueue,
            created_at: Utc::now(),
        }
    }

    /// True when the display name is just the category placeholder
    pub fn has_placeholder_name(&self) -> bool {
        self.name == self.category.as_str()
    }
}

/// How the output filename of a transfer is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilenamePolicy {
    /// Derive `name.ext` from the URL and the caller's display name
    #[default]
    Derive,
    /// Let the transfer program use the name suggested by the remote
    RemoteSuggested,
}

/// Result of handing a URL to the queue
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmitOutcome {
    Received,
    Duplicated,
    Retrying,
}

impl SubmitOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Received => "Download request received.",
            Self::Duplicated => "Download request received but skip",
            Self::Retrying => "Download request received, retrying failed download.",
        }
    }
}

/// Terminal result of a single transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

impl From<Outcome> for JobStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => JobStatus::Completed,
            Outcome::Failed => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Download,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobEventData {
    pub id: String,
    pub name: String,
    pub url: String,
    pub model_type: Category,
    pub status: JobStatus,
}

/// Lifecycle event pushed to subscribers, `{"type": "download", "data": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: JobEventData,
}

impl DownloadEvent {
    pub fn new(job: &Job, status: JobStatus) -> Self {
        Self {
            kind: EventKind::Download,
            data: JobEventData {
                id: job.id.clone(),
                name: job.name.clone(),
                url: job.url.clone(),
                model_type: job.category,
                status,
            },
        }
    }
}
