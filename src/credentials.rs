//! Runtime-mutable API tokens for the gated model hosts.

use serde::Deserialize;
use std::{fmt, sync::RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Civitai,
    Huggingface,
}

#[derive(Default)]
pub struct Credentials {
    civitai: RwLock<Option<String>>,
    huggingface: RwLock<Option<String>>,
}

// Tokens must never end up in logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("civitai", &self.civitai().map(|_| "<redacted>"))
            .field("huggingface", &self.huggingface().map(|_| "<redacted>"))
            .finish()
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Credentials {
    pub fn new(civitai: Option<String>, huggingface: Option<String>) -> Self {
        Self {
            civitai: RwLock::new(normalize(civitai)),
            huggingface: RwLock::new(normalize(huggingface)),
        }
    }

    fn slot(&self, kind: TokenKind) -> &RwLock<Option<String>> {
        match kind {
            TokenKind::Civitai => &self.civitai,
            TokenKind::Huggingface => &self.huggingface,
        }
    }

    /// Replace a token. An empty value clears it.
    pub fn set(&self, kind: TokenKind, value: impl Into<String>) {
        let value = normalize(Some(value.into()));
        tracing::info!(?kind, present = value.is_some(), "Updating API token");
        let mut slot = self
            .slot(kind)
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = value;
    }

    pub fn get(&self, kind: TokenKind) -> Option<String> {
        self.slot(kind)
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn civitai(&self) -> Option<String> {
        self.get(TokenKind::Civitai)
    }

    pub fn huggingface(&self) -> Option<String> {
        self.get(TokenKind::Huggingface)
    }
}
