// MUSE Image Selector - Dedup, Score, Rank
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Images are keyed by path in the embedding store. A new image is compared
// against every stored embedding; anything at or above the similarity
// threshold is dropped before scoring. Survivors are scored against fixed
// text prompts and ranked.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::agent::embedder::{cosine_similarity, l2_normalize, Embedder};
use crate::agent::embedding_store::{check_dimension, EmbeddingMap, EmbeddingStore};

pub const SIMILARITY_THRESHOLD: f32 = 0.80;

pub const DEFAULT_PROMPTS: &[&str] =
    &["beautiful, high-quality image, aesthetic, meaning full and motivating/sptirual"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredImage {
    pub path: PathBuf,
    pub score: f32,
}

pub struct ImageSelector {
    embedder: Box<dyn Embedder>,
    store: EmbeddingStore,
    prompt_embeddings: Vec<Vec<f32>>,
    threshold: f32,
}

impl ImageSelector {
    /// Selector scoring against `DEFAULT_PROMPTS`.
    pub fn new(embedder: Box<dyn Embedder>, store: EmbeddingStore) -> Result<Self> {
        Self::with_prompts(embedder, store, DEFAULT_PROMPTS)
    }

    /// Prompt embeddings are computed once here, not per image.
    pub fn with_prompts<S: AsRef<str>>(
        embedder: Box<dyn Embedder>,
        store: EmbeddingStore,
        prompts: &[S],
    ) -> Result<Self> {
        if prompts.is_empty() {
            bail!("at least one scoring prompt is required");
        }
        let prompt_embeddings = prompts
            .iter()
            .map(|p| {
                embedder
                    .embed_text(p.as_ref())
                    .and_then(l2_normalize)
                    .with_context(|| format!("embed prompt {:?}", p.as_ref()))
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            "[SELECTOR] Ready with {} scoring prompt(s), store {:?}",
            prompt_embeddings.len(),
            store.path()
        );
        Ok(Self {
            embedder,
            store,
            prompt_embeddings,
            threshold: SIMILARITY_THRESHOLD,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn is_duplicate(&self, new: &[f32], existing: &[f32]) -> Result<bool> {
        Ok(cosine_similarity(new, existing)? >= self.threshold)
    }

    /// Mean cosine similarity against the scoring prompts.
    pub fn score_image(&self, embedding: &[f32]) -> Result<f32> {
        let mut total = 0.0;
        for prompt in &self.prompt_embeddings {
            total += cosine_similarity(embedding, prompt)?;
        }
        let score = total / self.prompt_embeddings.len() as f32;
        if !score.is_finite() {
            bail!("non-finite score {}", score);
        }
        Ok(score)
    }

    /// The `top_k` highest-scoring non-duplicate images, best first.
    pub fn select_top_images(&self, image_paths: &[PathBuf], top_k: usize) -> Result<Vec<PathBuf>> {
        let mut ranked = self.rank_images(image_paths)?;
        ranked.truncate(top_k);
        Ok(ranked.into_iter().map(|s| s.path).collect())
    }

    /// Every surviving image with its score, sorted descending. Ties keep
    /// input order. Only a store that cannot be loaded fails the batch.
    pub fn rank_images(&self, image_paths: &[PathBuf]) -> Result<Vec<ScoredImage>> {
        let mut records = self.store.load().context("load embedding store")?;
        let mut scored = Vec::with_capacity(image_paths.len());

        for path in image_paths {
            let embedding = match self.embedding_for(path, &mut records) {
                Ok(Some(embedding)) => embedding,
                Ok(None) => continue,
                Err(e) => {
                    warn!("[SELECTOR] Error scoring image {:?}: {:#}", path, e);
                    continue;
                }
            };
            match self.score_image(&embedding) {
                Ok(score) => {
                    debug!("[SELECTOR] {:?} scored {:.4}", path, score);
                    scored.push(ScoredImage {
                        path: path.clone(),
                        score,
                    });
                }
                Err(e) => warn!("[SELECTOR] Error scoring image {:?}: {:#}", path, e),
            }
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        info!(
            "[SELECTOR] Scored {}/{} images",
            scored.len(),
            image_paths.len()
        );
        Ok(scored)
    }

    /// Fresh embedding to score `path` with, or `None` for a near-duplicate.
    ///
    /// Known keys skip the duplicate scan and keep their stored record; the
    /// file is still re-embedded, since the same path may now hold a
    /// different image. New keys are scanned against every stored record
    /// and persisted when unique.
    fn embedding_for(&self, path: &Path, records: &mut EmbeddingMap) -> Result<Option<Vec<f32>>> {
        let key = EmbeddingStore::key_for(path);
        let embedding = l2_normalize(self.embedder.embed_image(path)?)?;
        if records.contains_key(&key) {
            debug!("[SELECTOR] {:?} already stored, skipping duplicate scan", path);
            return Ok(Some(embedding));
        }

        check_dimension(records, &embedding)?;
        for (stored_key, stored) in records.iter() {
            if self.is_duplicate(&embedding, stored)? {
                info!(
                    "[SELECTOR] Skipping {:?}: similar to an existing image ({})",
                    path, stored_key
                );
                return Ok(None);
            }
        }

        self.store.put(records, &key, embedding).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Embeds by looking the path up in a fixed table. Text found in
    /// `prompts` gets its own vector, anything else gets `prompt`.
    struct TableEmbedder {
        images: HashMap<PathBuf, Vec<f32>>,
        prompt: Vec<f32>,
        prompts: HashMap<String, Vec<f32>>,
    }

    impl Embedder for TableEmbedder {
        fn embed_image(&self, path: &Path) -> Result<Vec<f32>> {
            self.images
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unreadable image {:?}", path))
        }

        fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self
                .prompts
                .get(text)
                .cloned()
                .unwrap_or_else(|| self.prompt.clone()))
        }
    }

    fn selector(dir: &Path, images: &[(&str, Vec<f32>)]) -> ImageSelector {
        let embedder = TableEmbedder {
            images: images
                .iter()
                .map(|(p, v)| (PathBuf::from(p), v.clone()))
                .collect(),
            prompt: vec![1.0, 0.0, 0.0],
            prompts: HashMap::new(),
        };
        let store = EmbeddingStore::new(dir.join("embeddings.bin"));
        ImageSelector::new(Box::new(embedder), store).unwrap()
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let s = selector(dir.path(), &[]).with_threshold(1.0);
        assert!(s.is_duplicate(&[1.0, 0.0], &[2.0, 0.0]).unwrap());
        assert!(!s.is_duplicate(&[1.0, 0.0], &[0.0, 1.0]).unwrap());
    }

    #[test]
    fn test_ranks_descending_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let s = selector(
            dir.path(),
            &[
                ("low.jpg", vec![0.0, 1.0, 0.0]),
                ("high.jpg", vec![1.0, 0.0, 0.0]),
                ("mid.jpg", vec![1.0, 0.0, 1.0]),
            ],
        );
        let top = s
            .select_top_images(&paths(&["low.jpg", "high.jpg", "mid.jpg"]), 2)
            .unwrap();
        assert_eq!(top, paths(&["high.jpg", "mid.jpg"]));
    }

    #[test]
    fn test_failed_image_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let s = selector(dir.path(), &[("ok.jpg", vec![1.0, 0.0, 0.0])]);
        let top = s
            .select_top_images(&paths(&["missing.jpg", "ok.jpg"]), 5)
            .unwrap();
        assert_eq!(top, paths(&["ok.jpg"]));
    }

    #[test]
    fn test_known_key_skips_duplicate_scan() {
        let dir = tempfile::tempdir().unwrap();
        let s = selector(
            dir.path(),
            &[
                ("a.jpg", vec![1.0, 0.0, 0.0]),
                ("b.jpg", vec![0.0, 1.0, 0.0]),
            ],
        );
        // Store "b.jpg" under a vector identical to "a.jpg".
        let mut records = EmbeddingMap::new();
        records.insert("b.jpg".to_string(), vec![1.0, 0.0, 0.0]);
        s.store().save(&records).unwrap();

        let ranked = s.rank_images(&paths(&["a.jpg", "b.jpg"])).unwrap();
        // "a.jpg" is new and duplicates stored "b.jpg". "b.jpg" is known,
        // so it is kept and scored on what the file holds now.
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].path, PathBuf::from("b.jpg"));
        assert!(ranked[0].score.abs() < 1e-6);
        assert_eq!(s.store().load().unwrap(), records);
    }

    #[test]
    fn test_score_is_mean_over_prompts() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = TableEmbedder {
            images: HashMap::new(),
            prompt: vec![0.0, 0.0, 1.0],
            prompts: HashMap::from([
                ("warm".to_string(), vec![1.0, 0.0, 0.0]),
                ("cool".to_string(), vec![0.0, 2.0, 0.0]),
            ]),
        };
        let store = EmbeddingStore::new(dir.path().join("embeddings.bin"));
        let s = ImageSelector::with_prompts(Box::new(embedder), store, &["warm", "cool"]).unwrap();

        // cos = 0.6 and 0.8 against the two prompts.
        let score = s.score_image(&[3.0, 4.0, 0.0]).unwrap();
        assert!((score - 0.7).abs() < 1e-6);
        let score = s.score_image(&[1.0, 0.0, 0.0]).unwrap();
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_empty_prompt_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = TableEmbedder {
            images: HashMap::new(),
            prompt: vec![1.0],
            prompts: HashMap::new(),
        };
        let store = EmbeddingStore::new(dir.path().join("embeddings.bin"));
        let empty: [&str; 0] = [];
        assert!(ImageSelector::with_prompts(Box::new(embedder), store, &empty).is_err());
    }
}
