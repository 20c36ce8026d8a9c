// MUSE Pipeline - Fetch → Select → Caption → Generate → Pick → Publish
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Fully sequential. Temporary directories are removed on every exit path
// by `TempWorkspace`, including errors and panics.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::agent::core::MuseCore;
use crate::agent::publisher::PublishedMedia;
use crate::config::RunLimits;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Selecting,
    Captioning,
    Generating,
    SelectingBest,
    Publishing,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetching => "FETCHING",
            Stage::Selecting => "SELECTING",
            Stage::Captioning => "CAPTIONING",
            Stage::Generating => "GENERATING",
            Stage::SelectingBest => "SELECTING_BEST",
            Stage::Publishing => "PUBLISHING",
            Stage::Cleanup => "CLEANUP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub caption: String,
    pub references: Vec<PathBuf>,
    pub generated: Vec<PathBuf>,
    pub best: PathBuf,
    /// `None` when the upload itself failed after a successful login.
    pub published: Option<PublishedMedia>,
}

/// Owns the run's temporary directories and removes them when dropped.
pub struct TempWorkspace {
    dirs: Vec<PathBuf>,
}

impl TempWorkspace {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            dirs: dirs.into_iter().map(|d| d.as_ref().to_path_buf()).collect(),
        }
    }

    /// Remove every directory that exists. Safe to call more than once.
    pub fn cleanup(&mut self) {
        for dir in &self.dirs {
            if !dir.exists() {
                continue;
            }
            match std::fs::remove_dir_all(dir) {
                Ok(()) => info!("[PIPELINE] Removed {:?}", dir),
                Err(e) => error!("[PIPELINE] Failed to remove {:?}: {}", dir, e),
            }
        }
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

pub struct Pipeline<'a> {
    core: &'a mut MuseCore,
    limits: RunLimits,
    stage: Stage,
}

impl<'a> Pipeline<'a> {
    pub fn new(core: &'a mut MuseCore, limits: RunLimits) -> Self {
        Self {
            core,
            limits,
            stage: Stage::Fetching,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        info!("[PIPELINE] ▶ {}", stage);
    }

    /// Run every stage. Temporary storage is gone when this returns.
    pub async fn run(&mut self) -> Result<RunReport, PipelineError> {
        self.core.settings.ensure_source_accounts()?;
        let mut workspace = TempWorkspace::new([
            self.core.settings.source_dir.clone(),
            self.core.settings.generated_dir.clone(),
        ]);

        let result = self.run_stages().await;

        self.enter(Stage::Cleanup);
        workspace.cleanup();
        match &result {
            Ok(_) => info!("[PIPELINE] Done."),
            Err(e) => error!("[PIPELINE] {}", e),
        }
        result
    }

    async fn run_stages(&mut self) -> Result<RunReport, PipelineError> {
        self.enter(Stage::Fetching);
        let unique = self.fetch_reference_images().await?;

        self.enter(Stage::Selecting);
        let candidates: Vec<PathBuf> = unique.into_iter().collect();
        let selector = &self.core.selector;
        let top_k = self.limits.top_k;
        let references = tokio::task::block_in_place(|| {
            selector.select_top_images(&candidates, top_k)
        })
        .map_err(PipelineError::Selection)?;
        info!("[PIPELINE] Selected {} reference images", references.len());

        self.enter(Stage::Captioning);
        let caption = self
            .core
            .captioner
            .generate_caption(&references)
            .await
            .map_err(PipelineError::Caption)?;
        if caption.is_empty() {
            return Err(PipelineError::NoDescriptions);
        }
        info!("[PIPELINE] Generated Caption: {}", caption);

        self.enter(Stage::Generating);
        let generated = self
            .core
            .synthesizer
            .generate(&caption, self.limits.num_images, &self.core.settings.generated_dir)
            .await;
        if generated.is_empty() {
            return Err(PipelineError::NoGeneratedImages);
        }

        self.enter(Stage::SelectingBest);
        let selector = &self.core.selector;
        let best = tokio::task::block_in_place(|| selector.select_top_images(&generated, 1))
            .map_err(PipelineError::Selection)?
            .into_iter()
            .next()
            .ok_or(PipelineError::NoGeneratedImages)?;
        info!("[PIPELINE] Best generated image: {:?}", best);

        self.enter(Stage::Publishing);
        let published = self.publish(&best, &caption).await?;

        Ok(RunReport {
            caption,
            references,
            generated,
            best,
            published,
        })
    }

    async fn fetch_reference_images(&mut self) -> Result<BTreeSet<PathBuf>, PipelineError> {
        let wanted = self.limits.desired_count;
        let mut unique = BTreeSet::new();
        let mut attempt = 0;

        while unique.len() < wanted && attempt < self.limits.max_fetch_attempts {
            info!("[PIPELINE] Attempt {}: Fetching reference images...", attempt + 1);
            let batch = self
                .core
                .source
                .fetch_batch(
                    &self.core.settings.source_accounts,
                    self.limits.max_posts_per_account,
                    &self.core.settings.source_dir,
                )
                .await;
            unique.extend(batch);
            attempt += 1;
        }

        if unique.len() < wanted {
            return Err(PipelineError::Quota {
                found: unique.len(),
                wanted,
                attempts: attempt,
            });
        }
        info!("[PIPELINE] {} unique reference images", unique.len());
        Ok(unique)
    }

    /// Login failure is fatal; a failed upload is logged and the run still
    /// counts as done.
    async fn publish(
        &mut self,
        image: &Path,
        caption: &str,
    ) -> Result<Option<PublishedMedia>, PipelineError> {
        let (username, password) = self
            .core
            .settings
            .credentials()
            .map_err(PipelineError::Login)?;
        let (username, password) = (username.to_string(), password.to_string());

        self.core
            .publisher
            .login(&username, &password)
            .await
            .map_err(PipelineError::Login)?;

        match self.core.publisher.upload(image, caption).await {
            Ok(media) => {
                info!("[PIPELINE] Successfully posted image: {}", media.raw);
                Ok(Some(media))
            }
            Err(e) => {
                warn!("[PIPELINE] Error posting image: {:#}", e);
                Ok(None)
            }
        }
    }
}
