use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use contract_clause_core::{
    load_folder_best_effort, read_json, timestamped_path, write_csv, write_json, AnthropicClient,
    CancelToken, CharacterNgramEmbedder, Embedder, EmbeddingIndexer, ExtractionConfig,
    HttpEmbedder, IndexConfig, IndexGranularity, IndexInput, Pipeline, PipelineConfig,
    RetryPolicy, RunStats, SemanticSearcher, VectorIndex, DEFAULT_ANTHROPIC_MODEL,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "contract-clauses", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Model used to embed clauses and queries. Defaults to the local trigram embedder.
    #[arg(long, env = "EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// OpenAI-compatible embeddings base URL, e.g. http://localhost:8080/v1
    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Extract clauses from every contract in a folder.
    Analyze {
        /// Folder that contains .pdf or .txt contracts, searched recursively.
        #[arg(long)]
        folder: PathBuf,
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Both)]
        format: OutputFormat,
        #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
        api_key: String,
        #[arg(long, env = "ANTHROPIC_MODEL", default_value = DEFAULT_ANTHROPIC_MODEL)]
        model: String,
        /// Number of contracts extracted at the same time.
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Only process the first N contracts.
        #[arg(long)]
        max_documents: Option<usize>,
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
        /// Include worked examples in the extraction prompt.
        #[arg(long, default_value_t = false)]
        few_shot: bool,
        /// Also build an embedding index and save it here.
        #[arg(long)]
        index_path: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Granularity::Clause)]
        granularity: Granularity,
    },
    /// Build a clause index from a results file written by `analyze`.
    Index {
        #[arg(long)]
        results: PathBuf,
        #[arg(long)]
        index_path: PathBuf,
    },
    /// Query a saved index.
    Search {
        #[arg(long)]
        index_path: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Both,
}

#[derive(Clone, Copy, ValueEnum)]
enum Granularity {
    Document,
    Clause,
}

impl From<Granularity> for IndexGranularity {
    fn from(value: Granularity) -> Self {
        match value {
            Granularity::Document => IndexGranularity::Document,
            Granularity::Clause => IndexGranularity::Clause,
        }
    }
}

impl Cli {
    fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        match &self.embedding_endpoint {
            Some(endpoint) => {
                let model = self
                    .embedding_model
                    .clone()
                    .context("EMBEDDING_MODEL is required with EMBEDDING_ENDPOINT")?;
                let embedder = HttpEmbedder::new(endpoint, model, self.embedding_dimensions)?
                    .with_api_key(self.embedding_api_key.clone());
                Ok(Arc::new(embedder))
            }
            None => Ok(Arc::new(CharacterNgramEmbedder::new(
                self.embedding_dimensions,
            ))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "contract-clauses boot"
    );

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            on_interrupt.cancel();
        }
    });

    match &cli.command {
        Command::Analyze {
            folder,
            output_dir,
            format,
            api_key,
            model,
            concurrency,
            max_documents,
            max_attempts,
            few_shot,
            index_path,
            granularity,
        } => {
            let loaded = load_folder_best_effort(folder, *max_documents)?;
            for skipped in &loaded.skipped {
                warn!(path = %skipped.source_path, reason = %skipped.reason, "skipped file");
            }

            let config = PipelineConfig {
                extraction: ExtractionConfig {
                    retry: RetryPolicy {
                        max_attempts: *max_attempts,
                        ..RetryPolicy::default()
                    },
                    few_shot: *few_shot,
                    ..ExtractionConfig::default()
                },
                concurrency: *concurrency,
                max_documents: *max_documents,
                index: index_path.as_ref().map(|_| IndexConfig {
                    granularity: (*granularity).into(),
                    ..IndexConfig::default()
                }),
                ..PipelineConfig::default()
            };

            let embedder = match index_path {
                Some(_) => Some(cli.embedder()?),
                None => None,
            };
            let llm = Arc::new(AnthropicClient::new(api_key.clone(), model.clone())?);
            let pipeline = Pipeline::new(config, llm, embedder)?;

            let mut report = pipeline.run(loaded.documents, &cancel).await?;
            report.skipped.extend(loaded.skipped);

            let now = Utc::now();
            if matches!(format, OutputFormat::Json | OutputFormat::Both) {
                let path = timestamped_path(output_dir, "json", now);
                write_json(&path, &report.records)?;
                println!("results written to {}", path.display());
            }
            if matches!(format, OutputFormat::Csv | OutputFormat::Both) {
                let path = timestamped_path(output_dir, "csv", now);
                write_csv(&path, &report.records)?;
                println!("results written to {}", path.display());
            }

            if let (Some(index), Some(path)) = (&report.index, index_path) {
                index.save(path)?;
                println!("{} index entries saved to {}", index.len(), path.display());
            }
            for failure in &report.embedding_failures {
                warn!(id = %failure.id, reason = %failure.reason, "not indexed");
            }
            for skipped in &report.skipped {
                println!("skipped {}: {}", skipped.document_id, skipped.reason);
            }

            print_stats(&report.stats());
        }
        Command::Index {
            results,
            index_path,
        } => {
            let records = read_json(results)
                .with_context(|| format!("reading results from {}", results.display()))?;
            let inputs: Vec<_> = records.iter().flat_map(IndexInput::clauses).collect();

            let indexer = EmbeddingIndexer::new(
                cli.embedder()?,
                RetryPolicy::default(),
                IndexGranularity::Clause,
            );
            let build = indexer.build_index(inputs, &cancel).await;
            for failure in &build.failures {
                warn!(id = %failure.id, reason = %failure.reason, "not indexed");
            }

            build.index.save(index_path)?;
            println!(
                "{} index entries saved to {} ({} failed)",
                build.index.len(),
                index_path.display(),
                build.failures.len()
            );
        }
        Command::Search {
            index_path,
            query,
            top_k,
        } => {
            let index = VectorIndex::load(Path::new(index_path))
                .with_context(|| format!("loading index from {}", index_path.display()))?;
            let searcher = SemanticSearcher::new(index, cli.embedder()?)?;

            let hits = searcher.search(query, *top_k, &cancel).await?;
            println!(
                "query: {query} (index of {} entries built {})",
                searcher.index().len(),
                searcher.index().built_at().to_rfc3339()
            );
            if hits.is_empty() {
                println!("no matches");
            }
            for hit in hits {
                let clause = hit.clause.map(|kind| kind.as_str()).unwrap_or("document");
                println!(
                    "score={:.4} id={} document_id={} clause={}",
                    hit.score, hit.id, hit.document_id, clause
                );
                println!("  {}", hit.preview);
            }
        }
    }

    Ok(())
}

fn print_stats(stats: &RunStats) {
    println!(
        "processed={} succeeded={} failed={} cancelled={} skipped={}",
        stats.processed, stats.succeeded, stats.failed, stats.cancelled, stats.skipped
    );
    for (kind, count) in &stats.found {
        let rate = if stats.succeeded > 0 {
            *count as f64 * 100.0 / stats.succeeded as f64
        } else {
            0.0
        };
        println!("  {kind}: found in {count}/{} ({rate:.1}%)", stats.succeeded);
    }
}
