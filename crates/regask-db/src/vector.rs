//! File-backed vector index for semantic search.
//!
//! Stores vectors in a JSONL file keyed by registry row identifier and uses
//! linear scan with cosine similarity for search. Registry-scale indexes
//! (hundreds of thousands of companies) stay comfortably within linear-scan
//! territory, so the overhead of a full vector database is not justified.
//!
//! Two vector schemes share this index type:
//!
//! - **Name vectors** ([`name_vector`]): character-trigram hash vectors over
//!   the normalized company name, dimension 256. Used as the semantic leg of
//!   name resolution when exact and lexical search come up short.
//! - **Activity vectors** ([`activity_vector`]): activity-code (CNAE) vectors,
//!   dimension 600, the primary code group at weight 1.0, secondary groups at
//!   weight 0.3. Used for "similar companies" search.

use crate::error::{DbError, DbResult};
use crate::normalize::normalize_name;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, trace};

/// Dimension of name-trigram vectors.
pub const NAME_VECTOR_DIM: usize = 256;

/// Dimension of activity-code vectors (one slot per 3-digit activity group).
pub const ACTIVITY_VECTOR_DIM: usize = 600;

/// Weight of the primary activity code in an activity vector.
pub const PRIMARY_ACTIVITY_WEIGHT: f32 = 1.0;

/// Weight of each secondary activity code in an activity vector.
pub const SECONDARY_ACTIVITY_WEIGHT: f32 = 0.3;

/// A stored vector entry, one JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVector {
    id: String,
    vector: Vec<f32>,
}

/// A search hit: (row identifier, similarity score).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// Registry row identifier the vector was stored under.
    pub id: String,
    /// Cosine similarity, clamped to [0, 1).
    pub score: f32,
}

/// File-backed vector index with linear-scan cosine search.
#[derive(Debug)]
pub struct VectorIndex {
    /// Path to the JSONL data file, if persistent. `None` for in-memory.
    path: Option<PathBuf>,

    /// Dimension every stored vector must have.
    dimension: usize,

    /// In-memory vector store keyed by row identifier.
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl VectorIndex {
    /// Create an in-memory index (tests, ephemeral pipelines).
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            path: None,
            dimension,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Open an index backed by a JSONL file, loading existing entries.
    ///
    /// Fails with [`DbError::IndexNotFound`] if the file does not exist;
    /// callers treat that as a degraded-service condition, not a fatal one.
    pub fn open(path: impl Into<PathBuf>, dimension: usize) -> DbResult<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(DbError::IndexNotFound { path });
        }
        let index = Self {
            path: Some(path.clone()),
            dimension,
            vectors: RwLock::new(HashMap::new()),
        };
        index.load_from_file(&path)?;
        Ok(index)
    }

    /// Open an index file, creating it empty if absent.
    pub fn open_or_create(path: impl Into<PathBuf>, dimension: usize) -> DbResult<Self> {
        let path = path.into();
        match Self::open(path.clone(), dimension) {
            Ok(index) => Ok(index),
            Err(DbError::IndexNotFound { .. }) => Ok(Self {
                path: Some(path),
                dimension,
                vectors: RwLock::new(HashMap::new()),
            }),
            Err(e) => Err(e),
        }
    }

    fn load_from_file(&self, path: &Path) -> DbResult<()> {
        debug!("Loading vectors from {:?}", path);

        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut vectors = self
            .vectors
            .write()
            .map_err(|e| DbError::internal(format!("Failed to acquire write lock: {}", e)))?;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredVector>(&line) {
                Ok(stored) => {
                    if stored.vector.len() != self.dimension {
                        return Err(DbError::DimensionMismatch {
                            expected: self.dimension,
                            actual: stored.vector.len(),
                        });
                    }
                    vectors.insert(stored.id, stored.vector);
                }
                Err(e) => {
                    debug!("Skipping invalid line {}: {}", line_num + 1, e);
                }
            }
        }

        debug!("Loaded {} vectors", vectors.len());
        Ok(())
    }

    fn save_to_file(&self) -> DbResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let vectors = self
            .vectors
            .read()
            .map_err(|e| DbError::internal(format!("Failed to acquire read lock: {}", e)))?;

        let mut file = File::create(path)?;
        for (id, vector) in vectors.iter() {
            let line = serde_json::to_string(&StoredVector {
                id: id.clone(),
                vector: vector.clone(),
            })?;
            writeln!(file, "{}", line)?;
        }

        debug!("Saved {} vectors to {:?}", vectors.len(), path);
        Ok(())
    }

    /// Insert or replace a vector under a row identifier.
    pub fn upsert(&self, id: impl Into<String>, vector: Vec<f32>) -> DbResult<()> {
        if vector.len() != self.dimension {
            return Err(DbError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let mut vectors = self
            .vectors
            .write()
            .map_err(|e| DbError::internal(format!("Failed to acquire write lock: {}", e)))?;
        vectors.insert(id.into(), vector);
        Ok(())
    }

    /// Fetch the stored vector for a row identifier.
    pub fn get(&self, id: &str) -> DbResult<Option<Vec<f32>>> {
        let vectors = self
            .vectors
            .read()
            .map_err(|e| DbError::internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(vectors.get(id).cloned())
    }

    /// Nearest-neighbor search by cosine similarity.
    ///
    /// Returns up to `limit` hits sorted by descending score, ties broken by
    /// row identifier for deterministic output. `exclude` drops one identifier
    /// from the results (used to remove the query company itself from
    /// similar-company search).
    pub fn query(&self, embedding: &[f32], limit: usize, exclude: Option<&str>) -> DbResult<Vec<VectorHit>> {
        if embedding.len() != self.dimension {
            return Err(DbError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        trace!("Querying vector index, limit={}", limit);

        let vectors = self
            .vectors
            .read()
            .map_err(|e| DbError::internal(format!("Failed to acquire read lock: {}", e)))?;

        let mut scored: Vec<VectorHit> = vectors
            .iter()
            .filter(|(id, _)| exclude != Some(id.as_str()))
            .map(|(id, v)| VectorHit {
                id: id.clone(),
                score: clamp_score(cosine_similarity(embedding, v)),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);

        trace!("Found {} results", scored.len());
        Ok(scored)
    }

    /// Persist the index to its backing file (no-op for in-memory indexes).
    pub fn flush(&self) -> DbResult<()> {
        self.save_to_file()
    }

    /// Number of stored vectors.
    pub fn len(&self) -> DbResult<usize> {
        let vectors = self
            .vectors
            .read()
            .map_err(|e| DbError::internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(vectors.len())
    }

    /// Whether the index holds no vectors.
    pub fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Dimension of stored vectors.
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Vector construction
// ============================================================================

/// Build a character-trigram hash vector for a company name.
///
/// The name is normalized (see [`normalize_name`]), padded with boundary
/// markers, and each trigram is hashed into one of [`NAME_VECTOR_DIM`]
/// buckets. The result is L2-normalized so cosine similarity reflects trigram
/// overlap. Deterministic: the same name always yields the same vector.
pub fn name_vector(name: &str) -> Vec<f32> {
    let normalized = normalize_name(name);
    let mut v = vec![0.0f32; NAME_VECTOR_DIM];
    if normalized.is_empty() {
        return v;
    }

    let padded: Vec<char> = std::iter::once(' ')
        .chain(normalized.chars())
        .chain(std::iter::once(' '))
        .collect();

    for window in padded.windows(3) {
        let mut hash: u32 = 2166136261; // FNV-1a
        for c in window {
            hash ^= *c as u32;
            hash = hash.wrapping_mul(16777619);
        }
        v[(hash as usize) % NAME_VECTOR_DIM] += 1.0;
    }

    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Build an activity-code vector for a company.
///
/// `primary` is the company's main activity code, `secondary` an optional
/// comma-separated list of additional codes. The first three digits of each
/// code select the activity-group slot; primary weighs 1.0 and each secondary
/// 0.3. Codes with fewer than three digits are ignored.
pub fn activity_vector(primary: &str, secondary: Option<&str>) -> Vec<f32> {
    let mut v = vec![0.0f32; ACTIVITY_VECTOR_DIM];

    if let Some(slot) = activity_group_slot(primary) {
        v[slot] = PRIMARY_ACTIVITY_WEIGHT;
    }
    if let Some(list) = secondary {
        for code in list.split(',') {
            if let Some(slot) = activity_group_slot(code) {
                if v[slot] == 0.0 {
                    v[slot] = SECONDARY_ACTIVITY_WEIGHT;
                }
            }
        }
    }
    v
}

/// Map an activity code to its 3-digit group slot, if it has one.
fn activity_group_slot(code: &str) -> Option<usize> {
    let digits: String = code.chars().filter(|c| c.is_ascii_digit()).take(3).collect();
    if digits.len() < 3 {
        return None;
    }
    digits.parse::<usize>().ok().map(|n| n % ACTIVITY_VECTOR_DIM)
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Clamp a similarity into [0, 1).
///
/// Semantic scores stay strictly below the 1.0 reserved for exact matches,
/// so identical vectors rank just under an exact hit.
pub fn clamp_score(similarity: f32) -> f32 {
    similarity.clamp(0.0, 0.999)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
    }

    #[test]
    fn test_semantic_score_stays_below_one() {
        assert!(clamp_score(1.0) < 1.0);
        assert_eq!(clamp_score(-0.2), 0.0);
    }

    #[test]
    fn test_name_vector_deterministic() {
        assert_eq!(name_vector("Petrobras"), name_vector("PETROBRAS"));
        assert_eq!(name_vector("São João"), name_vector("sao joao"));
    }

    #[test]
    fn test_name_vector_similarity_ordering() {
        let base = name_vector("Petrobras Distribuidora");
        let close = name_vector("Petrobras");
        let far = name_vector("Laticinios Aurora");

        let sim_close = cosine_similarity(&base, &close);
        let sim_far = cosine_similarity(&base, &far);
        assert!(sim_close > sim_far);
    }

    #[test]
    fn test_activity_vector_weights() {
        let v = activity_vector("62015", Some("63119,62015"));
        assert_eq!(v[620 % ACTIVITY_VECTOR_DIM], 1.0);
        assert_eq!(v[631 % ACTIVITY_VECTOR_DIM], 0.3);
    }

    #[test]
    fn test_activity_vector_ignores_short_codes() {
        let v = activity_vector("6", None);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_index_query_and_exclude() {
        let index = VectorIndex::in_memory(ACTIVITY_VECTOR_DIM);
        index
            .upsert("c1", activity_vector("62015", None))
            .unwrap();
        index
            .upsert("c2", activity_vector("62040", None))
            .unwrap();
        index
            .upsert("c3", activity_vector("10110", None))
            .unwrap();

        let query = activity_vector("62015", None);
        let hits = index.query(&query, 10, Some("c1")).unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.id != "c1"));
        // Same activity group ranks first.
        assert_eq!(hits[0].id, "c2");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_index_rejects_wrong_dimension() {
        let index = VectorIndex::in_memory(4);
        let err = index.upsert("x", vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, DbError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.jsonl");

        let index = VectorIndex::open_or_create(&path, NAME_VECTOR_DIM).unwrap();
        index.upsert("c1", name_vector("Petrobras")).unwrap();
        index.flush().unwrap();

        let reloaded = VectorIndex::open(&path, NAME_VECTOR_DIM).unwrap();
        assert_eq!(reloaded.len().unwrap(), 1);
        assert_eq!(reloaded.get("c1").unwrap().unwrap(), name_vector("Petrobras"));
    }

    #[test]
    fn test_open_missing_file_is_index_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = VectorIndex::open(dir.path().join("absent.jsonl"), 8).unwrap_err();
        assert!(err.is_index_missing());
    }
}
