// Near-duplicate filtering and ranking through a real on-disk store.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use muse_core::agent::embedder::Embedder;
use muse_core::agent::embedding_store::EmbeddingStore;
use muse_core::agent::image_selector::ImageSelector;

/// Embeds by file name; the scoring prompt points along `[1, 1, 0]`.
struct NamedEmbedder {
    vectors: HashMap<&'static str, Vec<f32>>,
}

impl NamedEmbedder {
    fn new(entries: &[(&'static str, [f32; 3])]) -> Self {
        Self {
            vectors: entries.iter().map(|(n, v)| (*n, v.to_vec())).collect(),
        }
    }
}

impl Embedder for NamedEmbedder {
    fn embed_image(&self, path: &Path) -> Result<Vec<f32>> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.vectors
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("cannot open {:?}", path))
    }

    fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 1.0, 0.0])
    }
}

fn selector(store_path: &Path, entries: &[(&'static str, [f32; 3])]) -> ImageSelector {
    ImageSelector::new(
        Box::new(NamedEmbedder::new(entries)),
        EmbeddingStore::new(store_path),
    )
    .unwrap()
}

fn paths(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(|n| dir.join(n)).collect()
}

#[test]
fn test_near_duplicate_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("embeddings.bin");
    // cos(a, b) = 0.95
    let s = selector(
        &store_path,
        &[("a.jpg", [1.0, 0.0, 0.0]), ("b.jpg", [0.95, 0.312_25, 0.0])],
    );

    let top = s
        .select_top_images(&paths(dir.path(), &["a.jpg", "b.jpg"]), 5)
        .unwrap();

    assert_eq!(top, paths(dir.path(), &["a.jpg"]));
    assert_eq!(s.store().len().unwrap(), 1);
}

#[test]
fn test_distinct_images_are_both_scored() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("embeddings.bin");
    // cos(a, b) = 0.5; b leans toward the prompt.
    let s = selector(
        &store_path,
        &[("a.jpg", [1.0, 0.0, 0.0]), ("b.jpg", [0.5, 0.866_025_4, 0.0])],
    );

    let ranked = s.rank_images(&paths(dir.path(), &["a.jpg", "b.jpg"])).unwrap();

    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].path.file_name().unwrap(), "b.jpg");
    assert!(ranked[0].score > ranked[1].score);
    assert!((ranked[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
}

#[test]
fn test_top_k_bounds_and_order() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("embeddings.bin");
    let s = selector(
        &store_path,
        &[
            ("low.jpg", [0.0, 0.0, 1.0]),
            ("mid.jpg", [1.0, 0.0, 1.0]),
            ("high.jpg", [1.0, 1.0, 0.2]),
        ],
    );
    let all = paths(dir.path(), &["low.jpg", "mid.jpg", "high.jpg"]);

    let top = s.select_top_images(&all, 2).unwrap();
    assert_eq!(top, paths(dir.path(), &["high.jpg", "mid.jpg"]));

    let everything = s.select_top_images(&all, 10).unwrap();
    assert_eq!(everything.len(), 3);
    assert!(s.select_top_images(&all, 0).unwrap().is_empty());
}

#[test]
fn test_repeat_selection_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("embeddings.bin");
    let s = selector(
        &store_path,
        &[("a.jpg", [1.0, 0.0, 0.0]), ("c.jpg", [0.0, 0.0, 1.0])],
    );
    let all = paths(dir.path(), &["a.jpg", "c.jpg"]);

    let first = s.select_top_images(&all, 2).unwrap();
    let second = s.select_top_images(&all, 2).unwrap();

    assert_eq!(first, second);
    assert_eq!(s.store().len().unwrap(), 2);
}

#[test]
fn test_store_survives_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("embeddings.bin");

    let first = selector(&store_path, &[("old.jpg", [3.0, 4.0, 0.0])]);
    first
        .select_top_images(&paths(dir.path(), &["old.jpg"]), 1)
        .unwrap();

    // A later run sees a near copy of last run's image under a new name.
    let second = selector(&store_path, &[("copy.jpg", [3.0, 4.1, 0.0])]);
    let top = second
        .select_top_images(&paths(dir.path(), &["copy.jpg"]), 1)
        .unwrap();
    assert!(top.is_empty());

    let records = EmbeddingStore::new(&store_path).load().unwrap();
    assert_eq!(records.len(), 1);
    let stored = records.values().next().unwrap();
    let norm: f32 = stored.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
}

#[test]
fn test_unreadable_image_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("embeddings.bin");
    let s = selector(&store_path, &[("a.jpg", [1.0, 0.0, 0.0])]);

    let top = s
        .select_top_images(&paths(dir.path(), &["missing.jpg", "a.jpg"]), 5)
        .unwrap();

    assert_eq!(top, paths(dir.path(), &["a.jpg"]));
}

/// Embeds by file contents, so the same path can hold different images.
struct ContentEmbedder;

impl Embedder for ContentEmbedder {
    fn embed_image(&self, path: &Path) -> Result<Vec<f32>> {
        match std::fs::read_to_string(path)?.as_str() {
            "good" => Ok(vec![1.0, 1.0, 0.0]),
            "bad" => Ok(vec![0.0, 0.0, 1.0]),
            other => Err(anyhow!("unexpected contents {:?}", other)),
        }
    }

    fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 1.0, 0.0])
    }
}

#[test]
fn test_rewritten_image_is_scored_on_new_contents() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("embeddings.bin");
    let generated = paths(dir.path(), &["sd_gen_0.png", "sd_gen_1.png"]);

    // First run.
    std::fs::write(&generated[0], "good").unwrap();
    std::fs::write(&generated[1], "bad").unwrap();
    let first = ImageSelector::new(Box::new(ContentEmbedder), EmbeddingStore::new(&store_path)).unwrap();
    assert_eq!(first.select_top_images(&generated, 1).unwrap(), vec![generated[0].clone()]);

    // Next run writes new candidates over the same file names.
    std::fs::write(&generated[0], "bad").unwrap();
    std::fs::write(&generated[1], "good").unwrap();
    let second = ImageSelector::new(Box::new(ContentEmbedder), EmbeddingStore::new(&store_path)).unwrap();
    let ranked = second.rank_images(&generated).unwrap();

    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].path, generated[1]);
    assert!((ranked[0].score - 1.0).abs() < 1e-6);
    assert!(ranked[1].score.abs() < 1e-6);
}
