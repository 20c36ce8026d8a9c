// MUSE Pipeline Errors
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Run-level failures. Per-item failures (one download, one score, one
// generation) never surface here: they are logged and skipped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to initialize runtime: {0:#}")]
    Init(anyhow::Error),

    #[error("not enough unique images after {attempts} attempts ({found}/{wanted})")]
    Quota {
        found: usize,
        wanted: usize,
        attempts: usize,
    },

    #[error("embedding store error: {0:#}")]
    Store(anyhow::Error),

    #[error("image selection failed: {0:#}")]
    Selection(anyhow::Error),

    #[error("no descriptions generated, cannot produce a caption")]
    NoDescriptions,

    #[error("caption synthesis failed: {0:#}")]
    Caption(anyhow::Error),

    #[error("failed to generate any images")]
    NoGeneratedImages,

    #[error("failed to login to the publishing account: {0:#}")]
    Login(anyhow::Error),
}

impl PipelineError {
    /// Process exit code for this failure. Every run-level failure exits
    /// with 1; a failed upload after a successful login is not one of them.
    pub fn exit_code(&self) -> u8 {
        1
    }
}
