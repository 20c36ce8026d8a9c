// MUSE Diffusion - Candidate Image Generation
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Text-to-image through the Stable Diffusion WebUI API (`/sdapi/v1/txt2img`).
// Each candidate is requested on its own so one failure only costs one image.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;

pub const NEGATIVE_PROMPT: &str = "Text on image, Blur, Pixelated, Low quality";
pub const INFERENCE_STEPS: u32 = 50;
pub const GUIDANCE_SCALE: f32 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionParams {
    pub negative_prompt: String,
    pub steps: u32,
    pub guidance_scale: f32,
}

impl Default for DiffusionParams {
    fn default() -> Self {
        Self {
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            steps: INFERENCE_STEPS,
            guidance_scale: GUIDANCE_SCALE,
        }
    }
}

/// Returns the encoded bytes of one generated image.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, params: &DiffusionParams) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
pub struct Txt2ImgRequest<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub steps: u32,
    pub cfg_scale: f32,
    pub batch_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct Txt2ImgResponse {
    #[serde(default)]
    pub images: Vec<String>,
}

pub struct StableDiffusionWebUi {
    client: reqwest::Client,
    endpoint: Url,
}

impl StableDiffusionWebUi {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self> {
        let endpoint = Url::parse(&format!("{}/sdapi/v1/txt2img", base_url.trim_end_matches('/')))
            .with_context(|| format!("invalid diffusion URL {:?}", base_url))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ImageGenerator for StableDiffusionWebUi {
    async fn generate(&self, prompt: &str, params: &DiffusionParams) -> Result<Vec<u8>> {
        let request = Txt2ImgRequest {
            prompt,
            negative_prompt: &params.negative_prompt,
            steps: params.steps,
            cfg_scale: params.guidance_scale,
            batch_size: 1,
        };
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("txt2img request to {} failed", self.endpoint))?;
        if !resp.status().is_success() {
            bail!("Diffusion API Error: {}", resp.status());
        }
        let body: Txt2ImgResponse = resp.json().await.context("decode txt2img response")?;
        decode_first_image(&body)
    }
}

pub fn decode_first_image(body: &Txt2ImgResponse) -> Result<Vec<u8>> {
    let first = body
        .images
        .first()
        .ok_or_else(|| anyhow!("txt2img returned no images"))?;
    // Some WebUI builds prefix a data URI header.
    let payload = first.split_once(',').map_or(first.as_str(), |(_, b)| b);
    BASE64.decode(payload).context("decode base64 image")
}

pub fn build_prompt(caption: &str) -> String {
    format!("A monochromatic image which captures : {}", caption)
}

pub struct ImageSynthesizer {
    generator: Box<dyn ImageGenerator>,
    params: DiffusionParams,
}

impl ImageSynthesizer {
    pub fn new(generator: Box<dyn ImageGenerator>) -> Self {
        Self {
            generator,
            params: DiffusionParams::default(),
        }
    }

    pub fn with_params(mut self, params: DiffusionParams) -> Self {
        self.params = params;
        self
    }

    /// Generate up to `num_images` candidates into `out_dir` as
    /// `sd_gen_{i}.png`. Returns the ones that succeeded, possibly none.
    pub async fn generate(&self, caption: &str, num_images: usize, out_dir: &Path) -> Vec<PathBuf> {
        info!("[DIFFUSION] Generating {} images with prompt: {}", num_images, caption);
        if let Err(e) = tokio::fs::create_dir_all(out_dir).await {
            warn!("[DIFFUSION] Cannot create {:?}: {}", out_dir, e);
            return Vec::new();
        }

        let prompt = build_prompt(caption);
        let mut generated = Vec::new();
        for i in 0..num_images {
            let path = out_dir.join(format!("sd_gen_{}.png", i));
            match self.render(&prompt, &path).await {
                Ok(()) => {
                    info!("[DIFFUSION] Generated image {}/{}", i + 1, num_images);
                    generated.push(path);
                }
                Err(e) => warn!("[DIFFUSION] Error generating image {}: {:#}", i + 1, e),
            }
        }
        generated
    }

    async fn render(&self, prompt: &str, path: &Path) -> Result<()> {
        let bytes = self.generator.generate(prompt, &self.params).await?;
        let img = image::load_from_memory(&bytes).context("generated payload is not an image")?;
        img.save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("save {:?}", path))?;
        Ok(())
    }
}
