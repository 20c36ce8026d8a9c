// MUSE Agent Core
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Explicit runtime context: the CLIP model is loaded once here, every
// client is built here, and the whole thing is torn down through
// `shutdown`. Nothing model-related lives in process-wide state.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use crate::agent::caption_generator::{CaptionGenerator, OllamaChat};
use crate::agent::diffusion::{ImageSynthesizer, StableDiffusionWebUi};
use crate::agent::embedder::{ClipEmbedder, Embedder};
use crate::agent::embedding_store::EmbeddingStore;
use crate::agent::image_selector::ImageSelector;
use crate::agent::publisher::{InstagrapiPublisher, Publisher};
use crate::agent::source_tools::{ImageSource, InstagramPublicSource};
use crate::config::Settings;
use crate::error::PipelineError;

/// Generation on a local GPU can take minutes per image.
const MODEL_TIMEOUT: Duration = Duration::from_secs(600);
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

pub struct MuseCore {
    pub settings: Settings,
    pub selector: ImageSelector,
    pub captioner: CaptionGenerator,
    pub synthesizer: ImageSynthesizer,
    pub source: Box<dyn ImageSource>,
    pub publisher: Box<dyn Publisher>,
}

impl MuseCore {
    /// Load CLIP and build every client from `settings`. Blocking while the
    /// model downloads and maps.
    pub fn initialize(settings: Settings) -> Result<Self, PipelineError> {
        info!("[CORE] Initializing MUSE runtime...");
        let embedder = ClipEmbedder::load().map_err(PipelineError::Init)?;
        Self::with_embedder(settings, Box::new(embedder)).map_err(PipelineError::Init)
    }

    /// Build the HTTP-backed components around an already loaded embedder.
    pub fn with_embedder(settings: Settings, embedder: Box<dyn Embedder>) -> Result<Self> {
        let model_client = http_client(MODEL_TIMEOUT)?;
        let fetch_client = http_client(FETCH_TIMEOUT)?;

        let store = EmbeddingStore::new(&settings.embeddings_path);
        let selector = ImageSelector::new(embedder, store)?;
        let captioner = captioner_with(model_client.clone(), &settings)?;
        let synthesizer = ImageSynthesizer::new(Box::new(StableDiffusionWebUi::new(
            model_client,
            &settings.diffusion_url,
        )?));
        let source = Box::new(InstagramPublicSource::new(
            fetch_client.clone(),
            &settings.source_url,
        )?);
        let publisher = Box::new(InstagrapiPublisher::new(fetch_client, &settings.publish_url)?);

        info!("[CORE] Runtime ready");
        Ok(Self {
            settings,
            selector,
            captioner,
            synthesizer,
            source,
            publisher,
        })
    }

    /// Assemble a core from arbitrary components.
    pub fn from_parts(
        settings: Settings,
        selector: ImageSelector,
        captioner: CaptionGenerator,
        synthesizer: ImageSynthesizer,
        source: Box<dyn ImageSource>,
        publisher: Box<dyn Publisher>,
    ) -> Self {
        Self {
            settings,
            selector,
            captioner,
            synthesizer,
            source,
            publisher,
        }
    }

    /// Release the model and clients.
    pub fn shutdown(self) {
        info!("[CORE] Releasing models and clients");
        drop(self);
    }
}

/// Caption generator alone, for callers that never rank images.
pub fn build_captioner(settings: &Settings) -> Result<CaptionGenerator> {
    captioner_with(http_client(MODEL_TIMEOUT)?, settings)
}

fn captioner_with(client: reqwest::Client, settings: &Settings) -> Result<CaptionGenerator> {
    Ok(CaptionGenerator::new(
        Box::new(OllamaChat::new(client, &settings.ollama_url)?),
        &settings.vision_model,
        &settings.caption_model,
    ))
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("build HTTP client")
}
