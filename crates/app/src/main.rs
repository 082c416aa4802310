use async_trait::async_trait;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use knowledge_rag_core::providers::openai::DEFAULT_BASE_URL;
use knowledge_rag_core::{
    build_bundle, load_folder_documents, BundleLoader, CharacterNgramEmbedder, ChunkingConfig,
    DocumentMetadataIndex, EmbeddingGenerator, EmbeddingOptions, EmbeddingProgress,
    EmbeddingProvider, ExpansionOptions, InMemoryMetadataIndex, KnowledgeCoordinator,
    KnowledgeStatus, OpenAiChat, OpenAiConfig, OpenAiEmbeddings, ProviderError, RagConfig,
    SearchOptions, VectorStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "knowledge-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Args)]
struct ProviderArgs {
    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// API key for the embedding and chat endpoints
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Embedding model
    #[arg(long, default_value = knowledge_rag_core::embeddings::DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Chat model used to expand queries
    #[arg(long, default_value = knowledge_rag_core::expansion::DEFAULT_EXPANSION_MODEL)]
    expansion_model: String,

    /// Chunks per embedding request
    #[arg(long, default_value = "10")]
    batch_size: usize,

    /// Timeout for each provider call, in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Use the local n-gram embedder and skip query expansion
    #[arg(long, default_value_t = false)]
    offline: bool,
}

#[derive(Args)]
struct ChunkArgs {
    /// Chunk size in tokens
    #[arg(long, default_value = "500")]
    chunk_size: usize,

    /// Overlap between consecutive chunks in tokens
    #[arg(long, default_value = "50")]
    chunk_overlap: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk and embed a folder of text files into a precached bundle.
    Bundle {
        /// Folder that contains .txt/.md files recursively.
        #[arg(long)]
        folder: PathBuf,
        /// Where to write the bundle JSON.
        #[arg(long)]
        output: PathBuf,
        #[command(flatten)]
        chunking: ChunkArgs,
    },
    /// Load knowledge from a bundle and/or a folder and search it.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Precached bundle to load before searching.
        #[arg(long)]
        bundle: Option<PathBuf>,
        /// Folder of text files to index before searching.
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Maximum number of ranked chunks.
        #[arg(long, default_value = "10")]
        top_k: usize,
        /// Minimum cosine similarity.
        #[arg(long, default_value = "0.3")]
        threshold: f32,
        /// Context budget in tokens.
        #[arg(long, default_value = "4000")]
        token_budget: usize,
        /// Disable LLM query expansion.
        #[arg(long, default_value_t = false)]
        no_expansion: bool,
        #[command(flatten)]
        chunking: ChunkArgs,
    },
}

enum Embeddings {
    Remote(OpenAiEmbeddings),
    Local(CharacterNgramEmbedder),
}

#[async_trait]
impl EmbeddingProvider for Embeddings {
    fn name(&self) -> &str {
        match self {
            Self::Remote(provider) => provider.name(),
            Self::Local(provider) => provider.name(),
        }
    }

    async fn embed_batch(
        &self,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        match self {
            Self::Remote(provider) => provider.embed_batch(model, inputs).await,
            Self::Local(provider) => provider.embed_batch(model, inputs).await,
        }
    }
}

impl ProviderArgs {
    fn openai(&self) -> OpenAiConfig {
        OpenAiConfig::new(self.base_url.clone(), self.api_key.clone())
    }

    fn embeddings(&self) -> Embeddings {
        if self.offline {
            Embeddings::Local(CharacterNgramEmbedder::default())
        } else {
            Embeddings::Remote(OpenAiEmbeddings::new(self.openai()))
        }
    }

    fn embedding_options(&self) -> EmbeddingOptions {
        EmbeddingOptions {
            model: if self.offline {
                "ngram".to_string()
            } else {
                self.embedding_model.clone()
            },
            batch_size: self.batch_size,
            timeout: Duration::from_secs(self.timeout_secs),
            ..Default::default()
        }
    }
}

impl ChunkArgs {
    fn config(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size_tokens: self.chunk_size,
            overlap_tokens: self.chunk_overlap,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        offline = cli.provider.offline,
        "knowledge-rag boot"
    );

    match cli.command {
        Command::Bundle {
            folder,
            output,
            chunking,
        } => run_bundle(&cli.provider, &folder, &output, chunking.config()).await,
        Command::Search {
            query,
            bundle,
            folder,
            top_k,
            threshold,
            token_budget,
            no_expansion,
            chunking,
        } => {
            let config = RagConfig {
                chunking: chunking.config(),
                embedding: cli.provider.embedding_options(),
                expansion: ExpansionOptions {
                    enabled: !(no_expansion || cli.provider.offline),
                    model: cli.provider.expansion_model.clone(),
                    timeout: Duration::from_secs(cli.provider.timeout_secs),
                    ..Default::default()
                },
                search: SearchOptions {
                    similarity_threshold: threshold,
                    max_results: top_k,
                    token_budget,
                    ..Default::default()
                },
            };
            run_search(&cli.provider, config, &query, bundle.as_deref(), folder.as_deref()).await
        }
    }
}

async fn run_bundle(
    provider: &ProviderArgs,
    folder: &Path,
    output: &Path,
    chunking: ChunkingConfig,
) -> anyhow::Result<()> {
    let report = load_folder_documents(folder)?;
    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
    }

    let options = provider.embedding_options();
    let model = options.model.clone();
    let generator = EmbeddingGenerator::new(provider.embeddings(), options);
    let bundle = build_bundle(&report.documents, &generator, &chunking, &model).await?;
    bundle.write_to(output).await?;

    println!(
        "{} documents, {} vectors written to {} at {}",
        bundle.documents.len(),
        bundle.vector_count(),
        output.display(),
        bundle.generated_at.to_rfc3339()
    );
    Ok(())
}

async fn run_search(
    provider: &ProviderArgs,
    config: RagConfig,
    query: &str,
    bundle: Option<&Path>,
    folder: Option<&Path>,
) -> anyhow::Result<()> {
    if bundle.is_none() && folder.is_none() {
        anyhow::bail!("pass --bundle and/or --folder to give the search some knowledge");
    }

    let store = Arc::new(VectorStore::new());
    let metadata = Arc::new(InMemoryMetadataIndex::new());

    if let Some(path) = bundle {
        let loader = BundleLoader::from_path(path)
            .await?
            .with_expected_model(config.embedding.model.clone());
        let report = loader.initialize_precached_embeddings(&store, metadata.as_ref());
        info!(loaded = report.loaded.len(), rejected = report.rejected.len(), "bundle loaded");
    }

    let coordinator = KnowledgeCoordinator::new(
        provider.embeddings(),
        OpenAiChat::new(provider.openai()),
        Arc::clone(&store),
        Arc::clone(&metadata),
        config,
    );

    if let Some(folder) = folder {
        let report = load_folder_documents(folder)?;
        for skipped in &report.skipped_files {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
        }
        for document in &report.documents {
            let indexed = coordinator
                .index_document_with_progress(document, &mut |progress: EmbeddingProgress| {
                    info!(percent = progress.percent, message = %progress.message, "indexing");
                })
                .await?;
            info!(document = %document.name, chunks = indexed.chunk_count, "indexed");
        }
    }

    let outcome = coordinator.search(query).await;
    println!("query: {}", outcome.query);
    if outcome.expanded_terms.len() > 1 {
        println!("expanded: {}", outcome.expanded_terms.join(" | "));
    }

    match outcome.status {
        KnowledgeStatus::NoKnowledge => println!("no knowledge sources are indexed"),
        KnowledgeStatus::Unavailable => println!("search unavailable: query embedding failed"),
        KnowledgeStatus::NoMatches => println!("no chunk cleared the similarity threshold"),
        KnowledgeStatus::Found => {}
    }

    for result in &outcome.results {
        let name = document_name(metadata.as_ref(), &result.document_id);
        println!(
            "[{}] score={:.4} {} chunk={}/{} chars={}..{}{}",
            result.rank,
            result.score,
            name,
            result.chunk_index + 1,
            result.total_chunks,
            result.position.start,
            result.position.end,
            if result.gap_filler { " (context)" } else { "" }
        );
        if let Some(text) = &result.text {
            println!("  {}", text.trim().replace('\n', "\n  "));
        }
    }

    Ok(())
}

fn document_name(metadata: &InMemoryMetadataIndex, document_id: &str) -> String {
    metadata
        .get(document_id)
        .map(|record| record.name)
        .unwrap_or_else(|| document_id.to_string())
}
