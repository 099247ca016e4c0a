//! Persisted similarity index over embedded chunks.
//!
//! An index is built once from a chunk list, written to a directory, and
//! afterwards only read. Search is exact (brute-force cosine over every
//! vector), which keeps results reproducible across runs.
//!
//! # On-disk layout
//!
//! ```text
//! <dir>/
//! ├── manifest.json   format version, model, dims, count, created_at
//! ├── vectors.bin     count × dims little-endian f32, row-major
//! └── chunks.json     chunk payloads, same order as the vectors
//! ```
//!
//! Each file is written to a temporary name and renamed into place, so a
//! rebuild fully replaces the previous index instead of merging with it.
//! [`VectorIndex::load`] refuses anything that is not mutually consistent.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::text_hash;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_in_batches, vec_to_blob, Embedder};
use crate::error::{PortalError, Result};
use crate::models::{Chunk, ScoredChunk};

pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.bin";
const CHUNKS_FILE: &str = "chunks.json";

/// Which index a chat turn reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    /// The index owned by one session.
    Session(String),
    /// The shared index at the root of `storage.index_dir`, read-only for chat.
    SharedRoot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub model: String,
    pub dims: usize,
    pub count: usize,
    pub created_at: DateTime<Utc>,
}

/// In-memory index: chunk payloads with one embedding per chunk.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: IndexManifest,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Embed every chunk and build an index. Chunk order is preserved and
    /// becomes the tie-break order for [`query`](Self::query).
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(PortalError::EmptyInput);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_in_batches(embedder, &texts, batch_size).await?;

        tracing::info!(
            chunks = chunks.len(),
            model = embedder.model_name(),
            dims = embedder.dims(),
            "built vector index"
        );

        Ok(Self {
            manifest: IndexManifest {
                version: FORMAT_VERSION,
                model: embedder.model_name().to_string(),
                dims: embedder.dims(),
                count: chunks.len(),
                created_at: Utc::now(),
            },
            chunks,
            vectors,
        })
    }

    /// Write the index to `dir`, replacing whatever index was there.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| PortalError::io(dir, e))?;

        let mut blob = Vec::with_capacity(self.manifest.count * self.manifest.dims * 4);
        for vector in &self.vectors {
            blob.extend_from_slice(&vec_to_blob(vector));
        }
        let chunks_json = serde_json::to_vec(&self.chunks).map_err(|e| corrupt(dir, e))?;
        let manifest_json =
            serde_json::to_vec_pretty(&self.manifest).map_err(|e| corrupt(dir, e))?;

        // Manifest last: a reader that finds a new manifest finds new payloads.
        write_replace(dir, VECTORS_FILE, &blob)?;
        write_replace(dir, CHUNKS_FILE, &chunks_json)?;
        write_replace(dir, MANIFEST_FILE, &manifest_json)?;

        tracing::info!(path = %dir.display(), chunks = self.manifest.count, "persisted vector index");
        Ok(())
    }

    /// Load a persisted index without re-embedding.
    ///
    /// `embedder` must produce vectors of the width the index was built
    /// with, otherwise [`PortalError::DimensionMismatch`].
    pub fn load(dir: &Path, embedder: &dyn Embedder) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let vectors_path = dir.join(VECTORS_FILE);
        let chunks_path = dir.join(CHUNKS_FILE);

        if !dir.is_dir() || !manifest_path.is_file() || !vectors_path.is_file() || !chunks_path.is_file()
        {
            return Err(PortalError::IndexNotFound(dir.to_path_buf()));
        }

        let manifest_bytes =
            std::fs::read(&manifest_path).map_err(|e| PortalError::io(&manifest_path, e))?;
        let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| corrupt(dir, format!("unreadable manifest: {}", e)))?;
        if manifest.version != FORMAT_VERSION {
            return Err(corrupt(
                dir,
                format!("unsupported index format version {}", manifest.version),
            ));
        }

        if manifest.dims != embedder.dims() {
            return Err(PortalError::DimensionMismatch {
                expected: manifest.dims,
                actual: embedder.dims(),
            });
        }
        if manifest.model != embedder.model_name() {
            tracing::warn!(
                index_model = %manifest.model,
                embedder_model = embedder.model_name(),
                "index was built with a different embedding model of the same width"
            );
        }

        let blob = std::fs::read(&vectors_path).map_err(|e| PortalError::io(&vectors_path, e))?;
        let expected_bytes = manifest
            .count
            .checked_mul(manifest.dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                corrupt(
                    dir,
                    format!(
                        "manifest size {} × {} overflows",
                        manifest.count, manifest.dims
                    ),
                )
            })?;
        if blob.len() != expected_bytes {
            return Err(corrupt(
                dir,
                format!(
                    "vectors.bin has {} bytes, expected {} ({} × {} × 4)",
                    blob.len(),
                    expected_bytes,
                    manifest.count,
                    manifest.dims
                ),
            ));
        }

        let chunks_bytes = std::fs::read(&chunks_path).map_err(|e| PortalError::io(&chunks_path, e))?;
        let chunks: Vec<Chunk> = serde_json::from_slice(&chunks_bytes)
            .map_err(|e| corrupt(dir, format!("unreadable chunks.json: {}", e)))?;
        if chunks.len() != manifest.count {
            return Err(corrupt(
                dir,
                format!(
                    "chunks.json has {} chunks, manifest says {}",
                    chunks.len(),
                    manifest.count
                ),
            ));
        }
        if let Some(bad) = chunks.iter().find(|c| text_hash(&c.text) != c.hash) {
            return Err(corrupt(dir, format!("chunk {} hash does not match its text", bad.id)));
        }

        let vectors = if manifest.dims == 0 {
            vec![Vec::new(); manifest.count]
        } else {
            blob.chunks_exact(manifest.dims * 4).map(blob_to_vec).collect()
        };

        tracing::debug!(path = %dir.display(), chunks = manifest.count, "loaded vector index");

        Ok(Self {
            manifest,
            chunks,
            vectors,
        })
    }

    /// Nearest chunks to `vector`: descending cosine similarity, ties broken
    /// by chunk position. Returns `min(k, len)` results.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if vector.len() != self.manifest.dims {
            return Err(PortalError::DimensionMismatch {
                expected: self.manifest.dims,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, v)| (position, cosine_similarity(vector, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| ScoredChunk {
                chunk: self.chunks[position].clone(),
                score,
                position,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.manifest.dims
    }

    pub fn model(&self) -> &str {
        &self.manifest.model
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }
}

fn write_replace(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let final_path = dir.join(name);
    let tmp_path: PathBuf = dir.join(format!(".{}.tmp", name));
    std::fs::write(&tmp_path, bytes).map_err(|e| PortalError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, &final_path).map_err(|e| PortalError::io(&final_path, e))?;
    Ok(())
}

fn corrupt(dir: &Path, message: impl std::fmt::Display) -> PortalError {
    PortalError::CorruptIndex {
        path: dir.to_path_buf(),
        message: message.to_string(),
    }
}
