use crate::cancel::CancelToken;
use crate::embeddings::embed_with_retry;
use crate::error::IndexError;
use crate::models::{
    ClauseKind, Document, EmbeddingFailure, ExtractionRecord, IndexGranularity, SearchHit,
};
use crate::retry::RetryPolicy;
use crate::traits::Embedder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const INDEX_FORMAT_VERSION: u32 = 1;
const PREVIEW_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub document_id: String,
    pub clause: Option<ClauseKind>,
    pub preview: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexInput {
    pub id: String,
    pub document_id: String,
    pub clause: Option<ClauseKind>,
    pub text: String,
}

impl IndexInput {
    pub fn document(document: &Document, max_chars: usize) -> Option<Self> {
        if !document.is_valid() {
            return None;
        }
        let text: String = document.normalized_text().chars().take(max_chars).collect();
        Some(Self {
            id: document.id().to_string(),
            document_id: document.id().to_string(),
            clause: None,
            text,
        })
    }

    pub fn clauses(record: &ExtractionRecord) -> Vec<Self> {
        if !record.is_success() {
            return Vec::new();
        }
        record
            .clauses
            .iter()
            .filter_map(|(kind, value)| {
                value.text().map(|text| Self {
                    id: format!("{}#{}", record.document_id, kind),
                    document_id: record.document_id.clone(),
                    clause: Some(kind),
                    text: text.to_string(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    format_version: u32,
    model_id: String,
    dimension: usize,
    granularity: IndexGranularity,
    built_at: DateTime<Utc>,
    entries: BTreeMap<String, IndexEntry>,
}

impl VectorIndex {
    pub fn new(model_id: impl Into<String>, dimension: usize, granularity: IndexGranularity) -> Self {
        Self {
            format_version: INDEX_FORMAT_VERSION,
            model_id: model_id.into(),
            dimension,
            granularity,
            built_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn granularity(&self) -> IndexGranularity {
        self.granularity
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Inserts or replaces the entry with the same id. Returns the replaced entry.
    pub fn add(&mut self, entry: IndexEntry) -> Result<Option<IndexEntry>, IndexError> {
        self.check_dimension(&entry.vector)?;
        Ok(self.entries.insert(entry.id.clone(), entry))
    }

    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidArgument("k must be a positive integer".to_string()));
        }
        self.check_dimension(query)?;

        let mut hits: Vec<SearchHit> = self
            .entries
            .values()
            .map(|entry| SearchHit {
                id: entry.id.clone(),
                document_id: entry.document_id.clone(),
                clause: entry.clause,
                score: cosine_similarity(query, &entry.vector),
                preview: entry.preview.clone(),
            })
            .collect();

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.id.cmp(&right.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_vec(self)?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = fs::read(path)?;
        let index: Self = serde_json::from_slice(&bytes)?;

        if index.format_version != INDEX_FORMAT_VERSION {
            return Err(IndexError::FormatVersion {
                expected: INDEX_FORMAT_VERSION,
                found: index.format_version,
            });
        }
        for entry in index.entries.values() {
            index.check_dimension(&entry.vector)?;
        }
        Ok(index)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let (dot, left_norm, right_norm) = left.iter().zip(right).fold(
        (0f32, 0f32, 0f32),
        |(dot, left_norm, right_norm), (a, b)| (dot + a * b, left_norm + a * a, right_norm + b * b),
    );
    let denominator = left_norm.sqrt() * right_norm.sqrt();
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct IndexBuild {
    pub index: VectorIndex,
    pub failures: Vec<EmbeddingFailure>,
}

#[derive(Clone)]
pub struct EmbeddingIndexer {
    embedder: Arc<dyn Embedder>,
    policy: RetryPolicy,
    granularity: IndexGranularity,
}

impl EmbeddingIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, policy: RetryPolicy, granularity: IndexGranularity) -> Self {
        Self {
            embedder,
            policy,
            granularity,
        }
    }

    pub fn granularity(&self) -> IndexGranularity {
        self.granularity
    }

    pub async fn build_index(&self, inputs: Vec<IndexInput>, cancel: &CancelToken) -> IndexBuild {
        let mut index = VectorIndex::new(
            self.embedder.model_id(),
            self.embedder.dimensions(),
            self.granularity,
        );
        let failures = self.extend(&mut index, inputs, cancel).await;
        info!(
            entries = index.len(),
            failures = failures.len(),
            model = index.model_id(),
            "embedding index built"
        );
        IndexBuild { index, failures }
    }

    pub async fn extend(
        &self,
        index: &mut VectorIndex,
        inputs: Vec<IndexInput>,
        cancel: &CancelToken,
    ) -> Vec<EmbeddingFailure> {
        let mut failures = Vec::new();

        if index.model_id() != self.embedder.model_id() {
            let reason = IndexError::ModelMismatch {
                index_model: index.model_id().to_string(),
                query_model: self.embedder.model_id().to_string(),
            }
            .to_string();
            return inputs
                .into_iter()
                .map(|input| EmbeddingFailure {
                    id: input.id,
                    document_id: input.document_id,
                    reason: reason.clone(),
                })
                .collect();
        }

        for input in inputs {
            let embedded =
                embed_with_retry(self.embedder.as_ref(), &input.text, &self.policy, cancel).await;

            let outcome = embedded.map_err(|error| error.to_string()).and_then(|vector| {
                index
                    .add(IndexEntry {
                        id: input.id.clone(),
                        document_id: input.document_id.clone(),
                        clause: input.clause,
                        preview: input.text.chars().take(PREVIEW_CHARS).collect(),
                        vector,
                    })
                    .map_err(|error| error.to_string())
            });

            if let Err(reason) = outcome {
                warn!(id = %input.id, %reason, "entry excluded from index");
                failures.push(EmbeddingFailure {
                    id: input.id,
                    document_id: input.document_id,
                    reason,
                });
            }
        }

        failures
    }
}
