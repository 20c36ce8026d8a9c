// MUSE Settings
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Environment-driven configuration. `main` loads `.env` through dotenv
// before `Settings::from_env` runs.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::PipelineError;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_VISION_MODEL: &str = "llava:13b";
pub const DEFAULT_CAPTION_MODEL: &str = "llama3.2:1b";
pub const DEFAULT_DIFFUSION_URL: &str = "http://127.0.0.1:7860";
pub const DEFAULT_PUBLISH_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_SOURCE_URL: &str = "https://i.instagram.com";
pub const DEFAULT_EMBEDDINGS_FILE: &str = "embeddings.bin";
pub const DEFAULT_SOURCE_DIR: &str = "temp_images";
pub const DEFAULT_GENERATED_DIR: &str = "temp";

/// Counts that shape one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLimits {
    /// Unique source images required before selection starts.
    pub desired_count: usize,
    pub max_fetch_attempts: usize,
    /// Reference images handed to the caption stage.
    pub top_k: usize,
    /// Candidates generated from the caption.
    pub num_images: usize,
    pub max_posts_per_account: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            desired_count: 10,
            max_fetch_attempts: 10,
            top_k: 6,
            num_images: 4,
            max_posts_per_account: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub instagram_username: Option<String>,
    pub instagram_password: Option<String>,
    pub source_accounts: Vec<String>,
    pub ollama_url: String,
    pub vision_model: String,
    pub caption_model: String,
    pub diffusion_url: String,
    pub publish_url: String,
    pub source_url: String,
    pub embeddings_path: PathBuf,
    pub source_dir: PathBuf,
    pub generated_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let source_accounts = get("SOURCE_ACCOUNTS")
            .map(|raw| parse_accounts(&raw))
            .unwrap_or_default();

        Self {
            instagram_username: get("INSTAGRAM_USERNAME"),
            instagram_password: get("INSTAGRAM_PASSWORD"),
            source_accounts,
            ollama_url: or("MUSE_OLLAMA_URL", DEFAULT_OLLAMA_URL),
            vision_model: or("MUSE_VISION_MODEL", DEFAULT_VISION_MODEL),
            caption_model: or("MUSE_CAPTION_MODEL", DEFAULT_CAPTION_MODEL),
            diffusion_url: or("MUSE_DIFFUSION_URL", DEFAULT_DIFFUSION_URL),
            publish_url: or("MUSE_PUBLISH_URL", DEFAULT_PUBLISH_URL),
            source_url: or("MUSE_SOURCE_URL", DEFAULT_SOURCE_URL),
            embeddings_path: PathBuf::from(or("MUSE_EMBEDDINGS", DEFAULT_EMBEDDINGS_FILE)),
            source_dir: PathBuf::from(or("MUSE_SOURCE_DIR", DEFAULT_SOURCE_DIR)),
            generated_dir: PathBuf::from(or("MUSE_GENERATED_DIR", DEFAULT_GENERATED_DIR)),
        }
    }

    /// Convenience for tests and tooling.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self::from_lookup(|key| map.get(key).cloned())
    }

    /// A full run cannot start without source accounts.
    pub fn ensure_source_accounts(&self) -> Result<(), PipelineError> {
        if self.source_accounts.is_empty() {
            return Err(PipelineError::Config(
                "SOURCE_ACCOUNTS is not set (comma-separated account names)".to_string(),
            ));
        }
        Ok(())
    }

    /// Publishing credentials, or a description of what is missing.
    pub fn credentials(&self) -> anyhow::Result<(&str, &str)> {
        let username = self
            .instagram_username
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("INSTAGRAM_USERNAME is not set"))?;
        let password = self
            .instagram_password
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("INSTAGRAM_PASSWORD is not set"))?;
        Ok((username, password))
    }
}

fn parse_accounts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(String::from)
        .collect()
}
