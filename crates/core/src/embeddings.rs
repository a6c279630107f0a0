use crate::cancel::CancelToken;
use crate::error::{EmbeddingError, PipelineError};
use crate::retry::{sleep_unless_cancelled, RetryPolicy};
use crate::traits::Embedder;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    dimensions: usize,
    model_id: String,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("char-trigram-v1/{dimensions}"),
        }
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0f32; self.dimensions];
        let chars: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

        let mut utf8 = [0u8; 4];
        for trigram in chars.windows(3) {
            let hash = trigram
                .iter()
                .flat_map(|ch| ch.encode_utf8(&mut utf8).as_bytes().to_vec())
                .fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME));
            vector[(hash % self.dimensions as u64) as usize] += 1.0;
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        Ok(vector)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, PipelineError> {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(PipelineError::Config("embedding endpoint is empty".to_string()));
        }
        if dimensions == 0 {
            return Err(PipelineError::Config(
                "embedding dimensions must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            endpoint,
            model: model.into(),
            api_key: None,
            dimensions,
            client: Client::new(),
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| EmbeddingError::Transient(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let details = format!("{} returned {status}", self.endpoint);
            return Err(
                if status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
                {
                    EmbeddingError::Transient(details)
                } else {
                    EmbeddingError::Rejected(details)
                },
            );
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingError::InvalidResponse(error.to_string()))?;

        payload
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("response has no embedding".to_string()))
    }
}

pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<Vec<f32>, EmbeddingError> {
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(EmbeddingError::Cancelled);
        }
        attempt += 1;

        let call = tokio::time::timeout(policy.call_timeout(), embedder.embed(text));
        let result = tokio::select! {
            result = call => result.unwrap_or(Err(EmbeddingError::Timeout(policy.call_timeout_ms))),
            _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
        };

        match result {
            Err(error) if error.is_transient() && attempt < policy.max_attempts => {
                warn!(attempt, %error, "transient embedding failure");
                if !sleep_unless_cancelled(policy.backoff(attempt), cancel).await {
                    return Err(EmbeddingError::Cancelled);
                }
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn embedder_is_deterministic() -> Result<(), EmbeddingError> {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Either party may terminate").await?;
        let second = embedder.embed("Either party may terminate").await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() -> Result<(), EmbeddingError> {
        let embedder = CharacterNgramEmbedder::new(32);
        assert_eq!(embedder.embed("abc").await?.len(), 32);
        assert_eq!(embedder.model_id(), "char-trigram-v1/32");
        Ok(())
    }

    #[tokio::test]
    async fn short_text_embeds_to_zero_vector() -> Result<(), EmbeddingError> {
        let vector = CharacterNgramEmbedder::new(8).embed("ab").await?;
        assert!(vector.iter().all(|value| *value == 0.0));
        Ok(())
    }

    #[test]
    fn zero_dimension_request_is_clamped() {
        let embedder = CharacterNgramEmbedder::new(0);
        assert_eq!(embedder.dimensions(), 1);
    }

    struct FlakyEmbedder {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_id(&self) -> &str {
            "flaky"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(EmbeddingError::Transient("HTTP 429".to_string()))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            call_timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_budget() {
        let embedder = FlakyEmbedder {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let vector = embed_with_retry(&embedder, "text", &quick_policy(), &CancelToken::new()).await;
        assert_eq!(vector.ok(), Some(vec![1.0, 0.0]));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let embedder = FlakyEmbedder {
            failures: 10,
            calls: AtomicUsize::new(0),
        };
        let result = embed_with_retry(&embedder, "text", &quick_policy(), &CancelToken::new()).await;
        assert!(matches!(result, Err(EmbeddingError::Transient(_))));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    struct SlowEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn model_id(&self) -> &str {
            "slow"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn each_call_is_bounded_by_the_timeout() {
        let embedder = SlowEmbedder {
            calls: AtomicUsize::new(0),
        };
        let policy = RetryPolicy {
            call_timeout_ms: 10,
            ..quick_policy()
        };

        let result = embed_with_retry(&embedder, "text", &policy, &CancelToken::new()).await;

        assert!(matches!(result, Err(EmbeddingError::Timeout(10))));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), policy.max_attempts as usize);
    }

    #[test]
    fn http_embedder_requires_endpoint() {
        assert!(HttpEmbedder::new(" ", "text-embedding-3-small", 1536).is_err());
        assert!(HttpEmbedder::new("http://localhost:8080/v1/", "m", 0).is_err());
        let embedder = HttpEmbedder::new("http://localhost:8080/v1/", "m", 8).expect("valid");
        assert_eq!(embedder.endpoint, "http://localhost:8080/v1");
    }
}
