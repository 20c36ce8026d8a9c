// MUSE Embedder - CLIP Image/Text Vectors
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Native CLIP (ViT-B/32) through candle. Weights and tokenizer come from
// the HuggingFace hub and are cached by hf-hub. Every vector leaving this
// module is L2-normalized.

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::info;

pub const CLIP_MODEL_ID: &str = "openai/clip-vit-base-patch32";
/// Revision of the hub repo that ships `model.safetensors`.
pub const CLIP_REVISION: &str = "refs/pr/15";
/// CLIP text context length.
const CONTEXT_LENGTH: usize = 77;
const END_OF_TEXT: &str = "<|endoftext|>";
/// Per-channel pixel statistics the OpenAI CLIP weights were trained with.
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// Anything that maps images and text into the same embedding space.
pub trait Embedder: Send + Sync {
    fn embed_image(&self, path: &Path) -> Result<Vec<f32>>;
    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct ClipEmbedder {
    model: ClipModel,
    tokenizer: Tokenizer,
    device: Device,
    image_size: usize,
    eot_id: u32,
}

impl ClipEmbedder {
    /// Download (or reuse the cached) CLIP weights and build the model.
    /// Blocking: call from a blocking context.
    pub fn load() -> Result<Self> {
        let device = Device::cuda_if_available(0).context("select compute device")?;
        info!("[EMBEDDER] Loading {} on {:?}", CLIP_MODEL_ID, device);

        let api = Api::new().context("connect to HuggingFace hub")?;
        let repo = api.repo(Repo::with_revision(
            CLIP_MODEL_ID.to_string(),
            RepoType::Model,
            CLIP_REVISION.to_string(),
        ));
        let weights = repo.get("model.safetensors").context("fetch CLIP weights")?;
        let tokenizer_file = repo.get("tokenizer.json").context("fetch CLIP tokenizer")?;

        let tokenizer = Tokenizer::from_file(&tokenizer_file).map_err(anyhow::Error::msg)?;
        let eot_id = tokenizer
            .token_to_id(END_OF_TEXT)
            .ok_or_else(|| anyhow!("tokenizer has no {} token", END_OF_TEXT))?;

        let config = ClipConfig::vit_base_patch32();
        // SAFETY: the safetensors file is owned by the hf-hub cache and not
        // modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)? };
        let model = ClipModel::new(vb, &config).context("build CLIP model")?;

        info!("[EMBEDDER] CLIP ready (image size {})", config.image_size);
        Ok(Self {
            model,
            tokenizer,
            device,
            image_size: config.image_size,
            eot_id,
        })
    }

    fn load_pixels(&self, path: &Path) -> Result<Tensor> {
        let img = image::open(path).with_context(|| format!("open image {:?}", path))?;
        preprocess_image(&img, self.image_size, &self.device)
    }

    fn tokenize(&self, text: &str) -> Result<Tensor> {
        let encoding = self.tokenizer.encode(text, true).map_err(anyhow::Error::msg)?;
        let mut ids = encoding.get_ids().to_vec();
        if ids.len() > CONTEXT_LENGTH {
            ids.truncate(CONTEXT_LENGTH - 1);
            ids.push(self.eot_id);
        }
        Ok(Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?)
    }
}

impl Embedder for ClipEmbedder {
    fn embed_image(&self, path: &Path) -> Result<Vec<f32>> {
        let pixels = self.load_pixels(path)?;
        let features = self.model.get_image_features(&pixels)?;
        let raw = features.squeeze(0)?.to_vec1::<f32>()?;
        l2_normalize(raw).with_context(|| format!("embed image {:?}", path))
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let ids = self.tokenize(text)?;
        let features = self.model.get_text_features(&ids)?;
        let raw = features.squeeze(0)?.to_vec1::<f32>()?;
        l2_normalize(raw).context("embed text prompt")
    }
}

/// Size after scaling the shortest side to `size`, keeping aspect ratio.
pub fn resize_dims(width: u32, height: u32, size: u32) -> (u32, u32) {
    let scale = |long: u32, short: u32| {
        (u64::from(long) * u64::from(size) / u64::from(short.max(1))) as u32
    };
    if width <= height {
        (size, scale(height, width))
    } else {
        (scale(width, height), size)
    }
}

/// CLIP input tensor `(1, 3, size, size)`: bicubic resize of the shortest
/// side, center crop, then per-channel mean/std normalization.
pub fn preprocess_image(img: &image::DynamicImage, size: usize, device: &Device) -> Result<Tensor> {
    let side = size as u32;
    let (w, h) = resize_dims(img.width(), img.height(), side);
    let resized = img.resize_exact(w, h, image::imageops::FilterType::CatmullRom);
    let cropped = resized
        .crop_imm((w - side) / 2, (h - side) / 2, side, side)
        .to_rgb8()
        .into_raw();

    let mean = Tensor::new(&CLIP_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&CLIP_STD, device)?.reshape((3, 1, 1))?;
    let pixels = Tensor::from_vec(cropped, (size, size, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1. / 255., 0.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?
        .unsqueeze(0)?;
    Ok(pixels)
}

/// Scale `v` to unit length. A zero (or non-finite) vector has no direction.
pub fn l2_normalize(mut v: Vec<f32>) -> Result<Vec<f32>> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        bail!("cannot normalize vector with norm {}", norm);
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(v)
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity in [-1, 1]. Works on raw vectors; for unit vectors
/// it equals the dot product.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        bail!("dimension mismatch: {} vs {}", a.len(), b.len());
    }
    let na = dot(a, a).sqrt();
    let nb = dot(b, b).sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return Ok(0.0);
    }
    Ok((dot(a, b) / (na * nb)).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_produces_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!((dot(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_rejects_zero_vector() {
        assert!(l2_normalize(vec![0.0; 8]).is_err());
    }

    #[test]
    fn test_cosine_matches_dot_for_unit_vectors() {
        let a = l2_normalize(vec![1.0, 2.0, 3.0]).unwrap();
        let b = l2_normalize(vec![-2.0, 0.5, 1.0]).unwrap();
        let cos = cosine_similarity(&a, &b).unwrap();
        assert!((cos - dot(&a, &b)).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_is_scale_invariant() {
        let cos = cosine_similarity(&[1.0, 1.0], &[10.0, 10.0]).unwrap();
        assert!((cos - 1.0).abs() < 1e-6);
        let opposite = cosine_similarity(&[1.0, 0.0], &[-3.0, 0.0]).unwrap();
        assert!((opposite + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_resize_keeps_shortest_side() {
        assert_eq!(resize_dims(300, 200, 224), (336, 224));
        assert_eq!(resize_dims(100, 400, 224), (224, 896));
        assert_eq!(resize_dims(224, 224, 224), (224, 224));
    }

    #[test]
    fn test_preprocess_applies_clip_statistics() {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            300,
            200,
            image::Rgb([255, 0, 51]),
        ));
        let pixels = preprocess_image(&img, 224, &Device::Cpu).unwrap();
        assert_eq!(pixels.dims(), &[1, 3, 224, 224]);

        let values = pixels.squeeze(0).unwrap().to_vec3::<f32>().unwrap();
        for (c, raw) in [255.0f32, 0.0, 51.0].iter().enumerate() {
            let expected = (raw / 255.0 - CLIP_MEAN[c]) / CLIP_STD[c];
            assert!((values[c][0][0] - expected).abs() < 1e-4);
            assert!((values[c][112][112] - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn test_cosine_rejects_dimension_mismatch() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_err());
    }
}
