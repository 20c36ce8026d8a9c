// MUSE Embedding Store
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Persistent image-key -> unit-vector map. Loaded and saved whole on every
// access. Single process, single writer: there is no locking.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::agent::embedder::l2_normalize;

/// Bumped whenever the on-disk envelope changes shape.
pub const STORE_VERSION: u32 = 1;

pub type EmbeddingMap = BTreeMap<String, Vec<f32>>;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    records: EmbeddingMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub records: usize,
    pub dimension: Option<usize>,
    pub file_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    path: PathBuf,
}

impl EmbeddingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store key for an image path.
    pub fn key_for(image: &Path) -> String {
        image.to_string_lossy().into_owned()
    }

    /// Full map, or an empty one if no backing file exists yet.
    pub fn load(&self) -> Result<EmbeddingMap> {
        if !self.path.exists() {
            debug!("[STORE] No store at {:?}, starting empty", self.path);
            return Ok(EmbeddingMap::new());
        }
        let bytes = fs::read(&self.path).with_context(|| format!("read {:?}", self.path))?;
        let file: StoreFile = bincode::deserialize(&bytes)
            .with_context(|| format!("decode embedding store {:?}", self.path))?;
        if file.version != STORE_VERSION {
            bail!(
                "unsupported embedding store version {} in {:?} (expected {})",
                file.version,
                self.path,
                STORE_VERSION
            );
        }
        Ok(file.records)
    }

    /// Overwrite the backing file. Writes a sibling temp file and renames it
    /// over the target so a reader never sees a partial store.
    pub fn save(&self, records: &EmbeddingMap) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
        }
        let file = StoreFile {
            version: STORE_VERSION,
            records: records.clone(),
        };
        let bytes = bincode::serialize(&file).context("encode embedding store")?;

        let tmp = self.tmp_path();
        fs::write(&tmp, &bytes).with_context(|| format!("write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {:?} with {:?}", self.path, tmp))?;
        debug!("[STORE] Saved {} records to {:?}", records.len(), self.path);
        Ok(())
    }

    /// Load, add one normalized record, save.
    pub fn insert(&self, key: &str, vector: Vec<f32>) -> Result<Vec<f32>> {
        let mut records = self.load()?;
        self.put(&mut records, key, vector)
    }

    /// Add one normalized record to an already loaded map and persist it.
    /// On a failed save the record is taken back out of `records`.
    pub fn put(&self, records: &mut EmbeddingMap, key: &str, vector: Vec<f32>) -> Result<Vec<f32>> {
        let vector = l2_normalize(vector).with_context(|| format!("insert {}", key))?;
        check_dimension(records, &vector)?;
        records.insert(key.to_string(), vector.clone());
        if let Err(e) = self.save(records) {
            records.remove(key);
            return Err(e);
        }
        info!("[STORE] Stored embedding for {} ({} total)", key, records.len());
        Ok(vector)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let records = self.load()?;
        let file_bytes = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(StoreStats {
            records: records.len(),
            dimension: records.values().next().map(Vec::len),
            file_bytes,
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// All records in one store share a dimension.
pub fn check_dimension(records: &EmbeddingMap, vector: &[f32]) -> Result<()> {
    if let Some(existing) = records.values().next() {
        if existing.len() != vector.len() {
            bail!(
                "embedding dimension {} does not match store dimension {}",
                vector.len(),
                existing.len()
            );
        }
    }
    Ok(())
}
