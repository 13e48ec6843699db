//! Config module for model-fetcher

use std::path::PathBuf;

use clap::Parser;

use crate::downloader::{DEFAULT_CONCURRENCY, TargetApp, TransferSettings};

#[derive(Parser, Debug, Clone)]
pub struct TransferConfig {
    /// Stable Diffusion front-end whose model tree we fill
    #[clap(
        long,
        env = "UI_TYPE",
        value_enum,
        ignore_case = true,
        default_value = "comfy"
    )]
    pub ui_type: TargetApp,

    /// Root of the model tree; category directories are created under it
    #[clap(long, env = "RESOURCE_PATH", default_value = "./my-runpod-volume/models")]
    pub resource_path: PathBuf,

    #[clap(long, env = "ARIA2C_BIN", default_value = "aria2c")]
    pub aria2c_bin: String,

    #[clap(long, env = "PYTHON_BIN", default_value = "python3")]
    pub python_bin: String,

    /// Helper script used for Google Drive links
    #[clap(
        long,
        env = "GDRIVE_HELPER",
        default_value = "./scripts/google_drive_download.py"
    )]
    pub gdrive_helper: String,

    /// Parallel connections aria2c opens per file
    #[clap(long, env = "ARIA2C_CONNECTIONS", default_value = "8")]
    pub connections: u16,

    #[clap(long, env = "MAX_CONCURRENT_DOWNLOADS", default_value_t = DEFAULT_CONCURRENCY)]
    pub max_concurrent_downloads: usize,
}

impl TransferConfig {
    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            resource_path: self.resource_path.clone(),
            target: self.ui_type,
            aria2c_bin: self.aria2c_bin.clone(),
            python_bin: self.python_bin.clone(),
            gdrive_helper: self.gdrive_helper.clone(),
            connections: self.connections,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct TokenConfig {
    #[clap(long, env = "CIVITAI_TOKEN", hide_env_values = true)]
    pub civitai_token: Option<String>,

    #[clap(long, env = "HUGGINGFACE_TOKEN", hide_env_values = true)]
    pub huggingface_token: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct Config {
    #[clap(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[clap(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Directory holding `<ui_type>_model_packs.json`
    #[clap(long, env = "MODEL_PACKS_DIR", default_value = "./resources")]
    pub model_packs_dir: PathBuf,

    #[clap(flatten)]
    pub transfer: TransferConfig,

    #[clap(flatten)]
    pub tokens: TokenConfig,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Path of the pack catalogue for the configured front-end
    pub fn model_packs_file(&self) -> PathBuf {
        self.model_packs_dir
            .join(format!("{}_model_packs.json", self.transfer.ui_type.as_str()))
    }
}

pub fn config() -> Config {
    Config::parse()
}
