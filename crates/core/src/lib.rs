pub mod cancel;
pub mod clauses;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod search;
pub mod source;
pub mod store;
pub mod traits;

pub use cancel::CancelToken;
pub use clauses::{parse_response, ClauseExtractor, ExtractionConfig};
pub use embeddings::{CharacterNgramEmbedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    EmbeddingError, IndexError, IngestError, LlmError, PipelineError, ResponseError, SinkError,
};
pub use index::{EmbeddingIndexer, IndexBuild, IndexEntry, IndexInput, VectorIndex};
pub use llm::{AnthropicClient, DEFAULT_ANTHROPIC_MODEL};
pub use models::{
    ClauseKind, ClauseSet, ClauseValue, Document, ExtractionRecord, ExtractionStatus,
    FailureKind, IndexGranularity, SearchHit, SkippedDocument, SourceDocument, SourceFormat,
    Verdict,
};
pub use normalize::{NormalizerConfig, TextNormalizer};
pub use pipeline::{IndexConfig, Pipeline, PipelineConfig};
pub use retry::RetryPolicy;
pub use search::SemanticSearcher;
pub use source::{discover_documents, load_document, load_folder_best_effort, LoadReport};
pub use store::{read_json, timestamped_path, write_csv, write_json, ResultStore, RunReport, RunStats};
pub use traits::{CallOptions, Embedder, LanguageModel};
