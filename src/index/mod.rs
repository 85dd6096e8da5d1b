//! Exact inner-product vector index with a position → chunk id mapping.
//!
//! The index itself only knows positions `0..len`. [`VectorIndexManager`]
//! keeps a parallel `id_map` translating each position back to the chunk id
//! issued by the relational store, and owns persistence of both files.
//!
//! Vectors are expected to be L2-normalized, so inner product equals cosine
//! similarity.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Index serialization error: {0}")]
    Serialization(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// `add` was called with different numbers of vectors and ids
    #[error("Got {vectors} vectors but {ids} chunk ids")]
    LengthMismatch { vectors: usize, ids: usize },
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

fn io_error(path: &Path, e: impl std::fmt::Display) -> IndexError {
    IndexError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Brute-force inner-product index over a flat `f32` buffer.
///
/// Every search scores every stored vector, so results are exact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlatIpIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIpIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_dimension(&self, vector: &[f32]) -> IndexResult<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Append vectors in order. Nothing is appended if any vector has the wrong length.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> IndexResult<()> {
        for vector in vectors {
            self.check_dimension(vector)?;
        }
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Drop every vector at position `len` and beyond.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dimension);
    }

    /// Score every vector against `query` and return the best `k` as
    /// `(position, score)`, highest score first.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<(usize, f32)>> {
        self.check_dimension(query)?;
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, stored)| {
                let score = stored.iter().zip(query).map(|(a, b)| a * b).sum::<f32>();
                (position, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k.min(self.len()));
        Ok(scored)
    }
}

/// One search hit, translated back to a chunk id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    pub position: usize,
    pub chunk_id: i64,
    pub score: f32,
}

/// Owns the in-memory index, its id mapping and their two files.
///
/// Not safe for several processes to mutate the same files; within a
/// process, wrap it in a lock.
#[derive(Debug)]
pub struct VectorIndexManager {
    index: FlatIpIndex,
    id_map: Vec<i64>,
    index_path: PathBuf,
    id_map_path: PathBuf,
}

impl VectorIndexManager {
    /// An empty index bound to the given file locations. Nothing is read.
    pub fn new(
        index_path: impl Into<PathBuf>,
        id_map_path: impl Into<PathBuf>,
        dimension: usize,
    ) -> Self {
        Self {
            index: FlatIpIndex::new(dimension),
            id_map: Vec::new(),
            index_path: index_path.into(),
            id_map_path: id_map_path.into(),
        }
    }

    /// Load the persisted index, or start empty if there is none.
    ///
    /// A missing mapping file next to an existing index is recovered with the
    /// identity mapping `0..len`.
    ///
    /// # Errors
    /// Returns `IndexError::DimensionMismatch` if the stored index was built
    /// for a different dimension.
    pub fn load(
        index_path: impl Into<PathBuf>,
        id_map_path: impl Into<PathBuf>,
        dimension: usize,
    ) -> IndexResult<Self> {
        let mut manager = Self::new(index_path, id_map_path, dimension);

        if !manager.index_path.exists() {
            info!(dimension, "Created new inner-product index");
            return Ok(manager);
        }

        let file = File::open(&manager.index_path).map_err(|e| io_error(&manager.index_path, e))?;
        let index: FlatIpIndex = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| IndexError::Serialization(e.to_string()))?;
        if index.dimension() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: index.dimension(),
            });
        }

        let id_map = if manager.id_map_path.exists() {
            let raw = fs::read_to_string(&manager.id_map_path)
                .map_err(|e| io_error(&manager.id_map_path, e))?;
            let map: Vec<i64> = serde_json::from_str(&raw)
                .map_err(|e| IndexError::Serialization(e.to_string()))?;
            if map.len() != index.len() {
                warn!(
                    vectors = index.len(),
                    mapped = map.len(),
                    "Index and id map lengths differ; unmapped positions will be skipped"
                );
            }
            map
        } else {
            warn!(
                path = %manager.id_map_path.display(),
                "Id map missing, falling back to identity mapping"
            );
            (0..index.len() as i64).collect()
        };

        info!(vectors = index.len(), "Loaded vector index");
        manager.index = index;
        manager.id_map = id_map;
        Ok(manager)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Chunk ids by position.
    pub fn id_map(&self) -> &[i64] {
        &self.id_map
    }

    /// Append vectors and their chunk ids.
    ///
    /// Both inputs are validated before anything is appended, so the index
    /// and the mapping grow together or not at all.
    ///
    /// # Returns
    /// The contiguous positions assigned, `old_len..old_len + n`
    pub fn add(&mut self, vectors: &[Vec<f32>], chunk_ids: &[i64]) -> IndexResult<Range<usize>> {
        if vectors.len() != chunk_ids.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                ids: chunk_ids.len(),
            });
        }

        let start = self.index.len();
        self.index.add(vectors)?;
        self.id_map.extend_from_slice(chunk_ids);
        debug!(added = vectors.len(), total = self.index.len(), "Added vectors");
        Ok(start..start + vectors.len())
    }

    /// Shrink the index and the mapping back to `len` entries.
    ///
    /// Undoes an [`add`](Self::add) whose positions could not be recorded
    /// elsewhere. A `len` at or beyond the current size is a no-op.
    pub fn truncate_to(&mut self, len: usize) {
        if len >= self.index.len() {
            return;
        }
        self.index.truncate(len);
        self.id_map.truncate(len);
        debug!(total = len, "Truncated vector index");
    }

    /// Up to `min(top_k, len)` hits, best first.
    ///
    /// Positions without a mapping entry are skipped rather than guessed.
    pub fn search(&self, query: &[f32], top_k: usize) -> IndexResult<Vec<IndexHit>> {
        let raw = self.index.search(query, top_k)?;
        let hits = raw
            .into_iter()
            .filter_map(|(position, score)| match self.id_map.get(position) {
                Some(&chunk_id) => Some(IndexHit {
                    position,
                    chunk_id,
                    score,
                }),
                None => {
                    warn!(position, "Index position has no chunk id, skipping");
                    None
                }
            })
            .collect();
        Ok(hits)
    }

    /// Write the index and the id map to disk.
    ///
    /// Each file is written to a temporary sibling and renamed into place.
    pub fn save(&self) -> IndexResult<()> {
        for path in [&self.index_path, &self.id_map_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
        }

        write_atomic(&self.index_path, |writer| {
            bincode::serialize_into(writer, &self.index)
                .map_err(|e| IndexError::Serialization(e.to_string()))
        })?;
        write_atomic(&self.id_map_path, |writer| {
            serde_json::to_writer(writer, &self.id_map)
                .map_err(|e| IndexError::Serialization(e.to_string()))
        })?;

        info!(
            vectors = self.index.len(),
            path = %self.index_path.display(),
            "Saved vector index"
        );
        Ok(())
    }

    /// Delete both files and clear the in-memory state.
    pub fn reset(&mut self) -> IndexResult<()> {
        for path in [&self.index_path, &self.id_map_path] {
            if path.exists() {
                fs::remove_file(path).map_err(|e| io_error(path, e))?;
            }
        }
        self.index = FlatIpIndex::new(self.index.dimension());
        self.id_map.clear();
        info!("Vector index reset");
        Ok(())
    }
}

fn write_atomic<F>(path: &Path, write: F) -> IndexResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> IndexResult<()>,
{
    let tmp = path.with_extension("tmp");
    let file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush().map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))?;
    Ok(())
}
