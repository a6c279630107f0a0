use crate::cancel::CancelToken;
use crate::embeddings::embed_with_retry;
use crate::error::IndexError;
use crate::index::VectorIndex;
use crate::models::SearchHit;
use crate::retry::RetryPolicy;
use crate::traits::Embedder;
use std::sync::Arc;
use tracing::debug;

pub struct SemanticSearcher {
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    policy: RetryPolicy,
}

impl SemanticSearcher {
    pub fn new(index: VectorIndex, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        if index.model_id() != embedder.model_id() {
            return Err(IndexError::ModelMismatch {
                index_model: index.model_id().to_string(),
                query_model: embedder.model_id().to_string(),
            });
        }
        if index.dimension() != embedder.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimensions(),
            });
        }

        Ok(Self {
            index,
            embedder,
            policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub async fn search(
        &self,
        query_text: &str,
        k: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if query_text.trim().is_empty() {
            return Err(IndexError::InvalidArgument("query is empty".to_string()));
        }
        if k == 0 {
            return Err(IndexError::InvalidArgument("k must be a positive integer".to_string()));
        }
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector =
            embed_with_retry(self.embedder.as_ref(), query_text, &self.policy, cancel).await?;

        let hits = self.index.nearest(&query_vector, k)?;
        debug!(query = query_text, k, returned = hits.len(), "semantic search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::index::{EmbeddingIndexer, IndexInput};
    use crate::error::EmbeddingError;
    use crate::models::{ClauseKind, IndexGranularity};
    use async_trait::async_trait;
    use std::time::Duration;

    fn clause(document: &str, kind: ClauseKind, text: &str) -> IndexInput {
        IndexInput {
            id: format!("{document}#{kind}"),
            document_id: document.to_string(),
            clause: Some(kind),
            text: text.to_string(),
        }
    }

    async fn four_entry_index(embedder: Arc<CharacterNgramEmbedder>) -> VectorIndex {
        let indexer = EmbeddingIndexer::new(embedder, RetryPolicy::default(), IndexGranularity::Clause);
        let inputs = vec![
            clause(
                "msa",
                ClauseKind::Termination,
                "Either party may terminate this Agreement for cause upon written notice of a material breach.",
            ),
            clause(
                "nda",
                ClauseKind::Confidentiality,
                "The Recipient shall hold all Confidential Information in strict confidence.",
            ),
            clause(
                "msa",
                ClauseKind::Liability,
                "In no event shall aggregate liability exceed the fees paid in the prior twelve months.",
            ),
            clause(
                "lease",
                ClauseKind::Termination,
                "The Landlord may terminate the lease upon sixty days notice.",
            ),
        ];
        indexer.build_index(inputs, &CancelToken::new()).await.index
    }

    #[tokio::test]
    async fn returns_k_results_in_descending_order() -> Result<(), IndexError> {
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let index = four_entry_index(embedder.clone()).await;
        assert_eq!(index.len(), 4);

        let searcher = SemanticSearcher::new(index, embedder)?;
        let hits = searcher.search("termination for cause", 2, &CancelToken::new()).await?;

        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].id, "msa#termination");
        Ok(())
    }

    #[tokio::test]
    async fn repeated_queries_return_identical_ordering() -> Result<(), IndexError> {
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let searcher = SemanticSearcher::new(four_entry_index(embedder.clone()).await, embedder)?;

        let first = searcher.search("limitation of liability", 4, &CancelToken::new()).await?;
        let second = searcher.search("limitation of liability", 4, &CancelToken::new()).await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_k_returns_everything() -> Result<(), IndexError> {
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let searcher = SemanticSearcher::new(four_entry_index(embedder.clone()).await, embedder)?;
        assert_eq!(searcher.search("notice", 50, &CancelToken::new()).await?.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_returns_no_hits() -> Result<(), IndexError> {
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let index = VectorIndex::new(
            embedder.model_id().to_string(),
            embedder.dimensions(),
            IndexGranularity::Document,
        );
        let searcher = SemanticSearcher::new(index, embedder)?;
        assert!(searcher.search("anything", 3, &CancelToken::new()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_queries_are_rejected() -> Result<(), IndexError> {
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let searcher = SemanticSearcher::new(four_entry_index(embedder.clone()).await, embedder)?;
        assert!(matches!(
            searcher.search("notice", 0, &CancelToken::new()).await,
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(matches!(
            searcher.search("   ", 3, &CancelToken::new()).await,
            Err(IndexError::InvalidArgument(_))
        ));
        Ok(())
    }

    struct StalledEmbedder {
        inner: CharacterNgramEmbedder,
    }

    #[async_trait]
    impl Embedder for StalledEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(EmbeddingError::Transient("never answers".to_string()))
        }
    }

    #[tokio::test]
    async fn cancelling_stops_a_stalled_query_embedding() -> Result<(), IndexError> {
        let local = Arc::new(CharacterNgramEmbedder::default());
        let index = four_entry_index(local).await;
        let stalled = Arc::new(StalledEmbedder {
            inner: CharacterNgramEmbedder::default(),
        });
        let searcher = SemanticSearcher::new(index, stalled)?;

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            searcher.search("termination for cause", 2, &cancel),
        )
        .await
        .expect("search returns promptly after cancellation");

        assert!(matches!(
            result,
            Err(IndexError::Embedding(EmbeddingError::Cancelled))
        ));
        Ok(())
    }

    #[test]
    fn index_from_another_model_is_refused() {
        let index = VectorIndex::new("text-embedding-3-small", 128, IndexGranularity::Clause);
        let result = SemanticSearcher::new(index, Arc::new(CharacterNgramEmbedder::default()));
        assert!(matches!(result, Err(IndexError::ModelMismatch { .. })));
    }
}
