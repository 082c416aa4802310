pub mod bundle;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod expansion;
pub mod ingest;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod search;
pub mod traits;
pub mod vector_store;

pub use bundle::{build_bundle, BundleLoader, BundleReport, PrecachedBundle};
pub use chunking::{chunk_document, chunk_text, estimate_tokens, ChunkingConfig};
pub use embeddings::{
    cache_key, CacheStats, EmbeddingGenerator, EmbeddingOptions, EmbeddingProgress,
};
pub use error::{BundleError, IndexError, IngestError, ProviderError};
pub use expansion::{ExpansionCacheStats, ExpansionOptions, QueryExpander};
pub use ingest::{discover_text_files, load_document, load_folder_documents, IngestionReport, SkippedFile};
pub use metadata::InMemoryMetadataIndex;
pub use models::{
    Chunk, ChunkPosition, ChunkVector, Document, DocumentMetadata, ExpandedQuery, IndexReport,
    KnowledgeStatus, SearchOptions, SearchOutcome, SearchResult,
};
pub use orchestrator::{KnowledgeCoordinator, RagConfig};
pub use providers::{CharacterNgramEmbedder, OpenAiChat, OpenAiConfig, OpenAiEmbeddings};
pub use search::{cosine_similarity, search};
pub use traits::{ChatProvider, DocumentMetadataIndex, EmbeddingProvider};
pub use vector_store::{StoreStats, VectorStore};
