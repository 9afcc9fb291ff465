//! # CaptionStore
//!
//! Persistent image-caption collection with semantic search.
//!
//! This module wraps a [HNSW](https://arxiv.org/abs/1603.09320) approximate
//! nearest-neighbor index (`hora` crate) around a list of caption records. Each
//! caption is embedded with an [`Embedder`] and can later be found by running a
//! text query through the same model.
//!
//! ## Responsibilities
//! - **Embedding**: captions and queries go through the same [`Embedder`].
//! - **Indexing**: a HNSW index over all record embeddings. `hora` cannot remove
//!   nodes, so the index is rebuilt from the records after every mutation.
//! - **Persistence**: the records (embeddings included) are encoded with
//!   `bincode` into `<db_dir>/<collection>.bin`, written atomically.
//! - **Identity**: records are keyed by [`doc_id`], a slug of the image path.
//!   Adding the same path twice replaces the earlier caption.
//!
//! ## Scores
//! Embeddings are unit vectors. `distance` is the squared Euclidean distance
//! between query and caption, and `similarity = 1 - distance`.
//!
//! ## Quick Example
//! ```no_run
//! use std::sync::Arc;
//! use llava_search::embeddings::SentenceEmbeddingsModel;
//! use llava_search::vector_store::CaptionStore;
//!
//! # fn main() -> llava_search::Result<()> {
//! let model = SentenceEmbeddingsModel::load("sentence-transformers/all-MiniLM-L6-v2", "main")?;
//! let mut store = CaptionStore::open("chroma_db", "image_captions", Arc::new(model))?;
//! store.add_image("cat.jpg", "A cat sleeping on a sofa", None)?;
//! for hit in store.search("sleeping pet", 5)? {
//!     println!("{} {:.3}", hit.image_path, hit.similarity);
//! }
//! # Ok(()) }
//! ```

use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embeddings::{Embedder, normalized, squared_l2};
use crate::error::{GatewayError, Result};

/// One stored image-caption pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptionRecord {
    pub id: String,
    pub image_path: String,
    pub caption: String,
    pub metadata: BTreeMap<String, String>,
    pub embedding: Vec<f32>,
}

/// A search result, best match first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub image_path: String,
    pub caption: String,
    pub similarity: f32,
    pub distance: f32,
}

/// A listing entry returned by [`CaptionStore::get_all`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageEntry {
    pub image_path: String,
    pub caption: String,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    collection: String,
    dimension: usize,
    records: Vec<CaptionRecord>,
}

/// Record id for an image path: slashes, backslashes and dots become `_`.
pub fn doc_id(image_path: &str) -> String {
    image_path.replace(['/', '\\', '.'], "_")
}

/// Caption collection backed by a HNSW index and a snapshot file.
pub struct CaptionStore {
    collection: String,
    file: PathBuf,
    embedder: Arc<dyn Embedder>,
    records: Vec<CaptionRecord>,
    /// `None` while the collection is empty.
    index: Option<HNSWIndex<f32, usize>>,
}

impl CaptionStore {
    /// Open (or create) the collection `collection` under `db_dir`.
    ///
    /// # Errors
    /// - The directory cannot be created or the snapshot cannot be read.
    /// - The snapshot was written with an embedding model of another dimension.
    pub fn open(
        db_dir: impl AsRef<Path>,
        collection: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        fs::create_dir_all(db_dir)?;
        let file = db_dir.join(format!("{collection}.bin"));

        let records = if file.exists() {
            let bytes = fs::read(&file)?;
            let (snapshot, _): (Snapshot, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                    .map_err(|e| GatewayError::Persist(format!("corrupt snapshot: {e}")))?;
            if snapshot.dimension != embedder.dimension() && !snapshot.records.is_empty() {
                return Err(GatewayError::Index(format!(
                    "collection {collection} holds {}-d vectors but the embedding model produces {}-d",
                    snapshot.dimension,
                    embedder.dimension()
                )));
            }
            info!(
                "Loaded existing collection {} with {} items",
                collection,
                snapshot.records.len()
            );
            snapshot.records
        } else {
            info!("Created new collection {}", collection);
            Vec::new()
        };

        let index = build_index(embedder.dimension(), &records)?;
        Ok(Self {
            collection: collection.to_string(),
            file,
            embedder,
            records,
            index,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Number of stored records.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Embed `caption` and store it under `image_path`.
    ///
    /// `metadata` is merged over the generated `image_path`, `caption` and
    /// `indexed_at` keys. Returns the record id.
    pub fn add_image(
        &mut self,
        image_path: &str,
        caption: &str,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<String> {
        let embedding = normalized(self.embedder.encode(caption)?);
        if embedding.len() != self.dimension() {
            return Err(GatewayError::Index(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension(),
                embedding.len()
            )));
        }

        let mut meta = BTreeMap::from([
            ("image_path".to_string(), image_path.to_string()),
            ("caption".to_string(), caption.to_string()),
            ("indexed_at".to_string(), chrono::Utc::now().to_rfc3339()),
        ]);
        if let Some(extra) = metadata {
            meta.extend(extra);
        }

        let id = doc_id(image_path);
        let record = CaptionRecord {
            id: id.clone(),
            image_path: image_path.to_string(),
            caption: caption.to_string(),
            metadata: meta,
            embedding,
        };

        let mut records = self.records.clone();
        match records.iter_mut().find(|r| r.id == id) {
            Some(existing) => {
                debug!("Replacing caption for {}", image_path);
                *existing = record;
            }
            None => records.push(record),
        }

        self.commit(records)?;
        info!("Added image: {}", image_path);
        Ok(id)
    }

    /// Find the `n_results` captions closest to `query_text`.
    pub fn search(&self, query_text: &str, n_results: usize) -> Result<Vec<SearchHit>> {
        let Some(index) = self.index.as_ref() else {
            return Ok(Vec::new());
        };
        if n_results == 0 {
            return Ok(Vec::new());
        }

        let query = normalized(self.embedder.encode(query_text)?);
        if query.len() != self.dimension() {
            return Err(GatewayError::Index(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension(),
                query.len()
            )));
        }

        let k = n_results.min(self.count());
        let mut hits: Vec<SearchHit> = index
            .search(&query, k)
            .into_iter()
            .filter_map(|idx| self.records.get(idx))
            .map(|record| {
                let distance = squared_l2(&query, &record.embedding);
                SearchHit {
                    image_path: record.image_path.clone(),
                    caption: record.caption.clone(),
                    similarity: 1.0 - distance,
                    distance,
                }
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    /// All stored pairs, in insertion order.
    pub fn get_all(&self) -> Vec<ImageEntry> {
        self.records
            .iter()
            .map(|r| ImageEntry {
                image_path: r.image_path.clone(),
                caption: r.caption.clone(),
            })
            .collect()
    }

    pub fn get(&self, image_path: &str) -> Option<&CaptionRecord> {
        let id = doc_id(image_path);
        self.records.iter().find(|r| r.id == id)
    }

    /// Remove the record for `image_path`. Returns whether one existed.
    pub fn delete_image(&mut self, image_path: &str) -> Result<bool> {
        let id = doc_id(image_path);
        if !self.records.iter().any(|r| r.id == id) {
            warn!("No indexed image for {}", image_path);
            return Ok(false);
        }
        let records = self.records.iter().filter(|r| r.id != id).cloned().collect();
        self.commit(records)?;
        info!("Deleted image: {}", image_path);
        Ok(true)
    }

    /// Drop every record.
    pub fn clear_all(&mut self) -> Result<()> {
        self.commit(Vec::new())?;
        info!("Collection {} cleared", self.collection);
        Ok(())
    }

    /// Index and persist `records`, then make them the live collection.
    ///
    /// Nothing in memory changes unless the snapshot was written.
    fn commit(&mut self, records: Vec<CaptionRecord>) -> Result<()> {
        let index = build_index(self.dimension(), &records)?;
        self.persist(&records)?;
        self.records = records;
        self.index = index;
        Ok(())
    }

    fn persist(&self, records: &[CaptionRecord]) -> Result<()> {
        let snapshot = Snapshot {
            collection: self.collection.clone(),
            dimension: self.dimension(),
            records: records.to_vec(),
        };
        let bytes = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
            .map_err(|e| GatewayError::Persist(e.to_string()))?;

        let dir = self.file.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&self.file)
            .map_err(|e| GatewayError::Persist(e.to_string()))?;
        debug!("Persisted {} records to {}", records.len(), self.file.display());
        Ok(())
    }
}

/// HNSW index over `records`, keyed by position. `None` for an empty list.
fn build_index(
    dimension: usize,
    records: &[CaptionRecord],
) -> Result<Option<HNSWIndex<f32, usize>>> {
    if records.is_empty() {
        return Ok(None);
    }
    let mut index = HNSWIndex::<f32, usize>::new(dimension, &HNSWParams::default());
    for (idx, record) in records.iter().enumerate() {
        index
            .add(&record.embedding, idx)
            .map_err(|e| GatewayError::Index(format!("add failed: {e}")))?;
    }
    index
        .build(Metric::Euclidean)
        .map_err(|e| GatewayError::Index(format!("build failed: {e}")))?;
    Ok(Some(index))
}
