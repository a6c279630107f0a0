use crate::cancel::CancelToken;
use crate::clauses::{ClauseExtractor, ExtractionConfig};
use crate::error::{IngestError, PipelineError};
use crate::index::{EmbeddingIndexer, IndexInput};
use crate::models::{Document, ExtractionRecord, IndexGranularity, SkippedDocument, SourceDocument};
use crate::normalize::{NormalizerConfig, TextNormalizer};
use crate::retry::RetryPolicy;
use crate::store::{ResultStore, RunReport};
use crate::traits::{Embedder, LanguageModel};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const DUPLICATE_ID: &str = "duplicate_id";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    pub granularity: IndexGranularity,
    pub max_embed_chars: usize,
    pub retry: RetryPolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            granularity: IndexGranularity::Clause,
            max_embed_chars: 8_000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub normalizer: NormalizerConfig,
    pub extraction: ExtractionConfig,
    pub concurrency: usize,
    pub max_documents: Option<usize>,
    pub index: Option<IndexConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            normalizer: NormalizerConfig::default(),
            extraction: ExtractionConfig::default(),
            concurrency: 4,
            max_documents: None,
            index: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.normalizer.validate()?;
        self.extraction.validate()?;
        if self.concurrency == 0 {
            return Err(PipelineError::Config(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.max_documents == Some(0) {
            return Err(PipelineError::Config(
                "max_documents must be greater than 0".to_string(),
            ));
        }
        if let Some(index) = &self.index {
            index.retry.validate().map_err(PipelineError::Config)?;
            if index.max_embed_chars == 0 {
                return Err(PipelineError::Config(
                    "max_embed_chars must be greater than 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    normalizer: TextNormalizer,
    extractor: ClauseExtractor,
    indexer: Option<EmbeddingIndexer>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        model: Arc<dyn LanguageModel>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let indexer = match (&config.index, embedder) {
            (Some(index), Some(embedder)) => Some(EmbeddingIndexer::new(
                embedder,
                index.retry,
                index.granularity,
            )),
            (Some(_), None) => {
                return Err(PipelineError::Config(
                    "indexing is enabled but no embedder was provided".to_string(),
                ))
            }
            (None, _) => None,
        };

        Ok(Self {
            normalizer: TextNormalizer::new(config.normalizer)?,
            extractor: ClauseExtractor::new(model, config.extraction.clone())?,
            indexer,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(
        &self,
        mut sources: Vec<SourceDocument>,
        cancel: &CancelToken,
    ) -> Result<RunReport, PipelineError> {
        if sources.is_empty() {
            return Err(PipelineError::NoDocuments(
                "the batch contains no documents".to_string(),
            ));
        }
        if let Some(limit) = self.config.max_documents {
            sources.truncate(limit);
        }

        let mut store = ResultStore::new();
        let mut valid = Vec::new();
        let mut seen_ids = HashSet::new();
        for source in sources {
            if !seen_ids.insert(source.id.clone()) {
                warn!(document_id = %source.id, path = %source.source_path, "duplicate document id");
                store.skip(SkippedDocument {
                    document_id: source.id,
                    source_path: source.source_path,
                    reason: DUPLICATE_ID.to_string(),
                });
                continue;
            }

            let document = self.normalizer.normalize_document(source);
            match document.verdict().reason() {
                None => valid.push(Arc::new(document)),
                Some(reason) => {
                    let skip = IngestError::InvalidDocument {
                        document_id: document.id().to_string(),
                        reason,
                    };
                    info!(document_id = document.id(), %reason, "document skipped");
                    store.skip(skipped(&document, skip.to_string()));
                }
            }
        }

        for record in self.extract_all(&valid, &mut store, cancel).await {
            store.insert(record);
        }

        let index = match &self.indexer {
            Some(indexer) => {
                let inputs = self.index_inputs(indexer.granularity(), &valid, store.records());
                let build = indexer.build_index(inputs, cancel).await;
                store.record_embedding_failures(build.failures);
                Some(build.index)
            }
            None => None,
        };

        let report = store.into_report(index);
        let stats = report.stats();
        info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            cancelled = stats.cancelled,
            skipped = stats.skipped,
            "batch finished"
        );
        Ok(report)
    }

    /// Returns records in document order. Documents that never started because
    /// the batch was cancelled are added to the store's skipped list.
    async fn extract_all(
        &self,
        documents: &[Arc<Document>],
        store: &mut ResultStore,
        cancel: &CancelToken,
    ) -> Vec<ExtractionRecord> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut workers = JoinSet::new();
        let mut started = 0usize;

        for (position, document) in documents.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                break;
            };

            let extractor = self.extractor.clone();
            let document = Arc::clone(document);
            let cancel = cancel.clone();
            workers.spawn(async move {
                let _permit = permit;
                (position, extractor.extract_document(&document, &cancel).await)
            });
            started += 1;
        }

        let mut slots: Vec<Option<ExtractionRecord>> = vec![None; documents.len()];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((position, record)) => slots[position] = Some(record),
                Err(join_error) => error!(%join_error, "extraction worker failed"),
            }
        }

        let mut records = Vec::with_capacity(started);
        for (position, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(record) => records.push(record),
                None if position >= started => {
                    store.skip(skipped(&documents[position], "cancelled".to_string()))
                }
                None => store.skip(skipped(
                    &documents[position],
                    "extraction worker failed".to_string(),
                )),
            }
        }
        records
    }

    fn index_inputs(
        &self,
        granularity: IndexGranularity,
        documents: &[Arc<Document>],
        records: &[ExtractionRecord],
    ) -> Vec<IndexInput> {
        match granularity {
            IndexGranularity::Document => {
                let max_chars = self
                    .config
                    .index
                    .as_ref()
                    .map(|index| index.max_embed_chars)
                    .unwrap_or(usize::MAX);
                documents
                    .iter()
                    .filter_map(|document| IndexInput::document(document, max_chars))
                    .collect()
            }
            IndexGranularity::Clause => records.iter().flat_map(IndexInput::clauses).collect(),
        }
    }
}

fn skipped(document: &Document, reason: String) -> SkippedDocument {
    SkippedDocument {
        document_id: document.id().to_string(),
        source_path: document.source_path().to_string(),
        reason,
    }
}
