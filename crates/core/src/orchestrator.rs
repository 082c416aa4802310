use crate::chunking::{chunk_document, ChunkingConfig};
use crate::embeddings::{EmbeddingGenerator, EmbeddingOptions, EmbeddingProgress};
use crate::error::IndexError;
use crate::expansion::{ExpansionOptions, QueryExpander};
use crate::models::{
    ChunkVector, Document, DocumentMetadata, IndexReport, KnowledgeStatus, SearchOptions,
    SearchOutcome,
};
use crate::search::search;
use crate::traits::{ChatProvider, DocumentMetadataIndex, EmbeddingProvider};
use crate::vector_store::VectorStore;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingOptions,
    pub expansion: ExpansionOptions,
    pub search: SearchOptions,
}

/// Indexes documents and answers searches over a shared vector store.
pub struct KnowledgeCoordinator<E, C, M>
where
    E: EmbeddingProvider,
    C: ChatProvider,
    M: DocumentMetadataIndex,
{
    store: Arc<VectorStore>,
    metadata: Arc<M>,
    generator: EmbeddingGenerator<E>,
    expander: QueryExpander<C>,
    chunking: ChunkingConfig,
    search_options: SearchOptions,
    latest_request: AtomicU64,
}

impl<E, C, M> KnowledgeCoordinator<E, C, M>
where
    E: EmbeddingProvider,
    C: ChatProvider,
    M: DocumentMetadataIndex,
{
    pub fn new(
        embeddings: E,
        chat: C,
        store: Arc<VectorStore>,
        metadata: Arc<M>,
        config: RagConfig,
    ) -> Self {
        Self {
            store,
            metadata,
            generator: EmbeddingGenerator::new(embeddings, config.embedding),
            expander: QueryExpander::new(chat, config.expansion),
            chunking: config.chunking,
            search_options: config.search,
            latest_request: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn metadata(&self) -> &Arc<M> {
        &self.metadata
    }

    pub fn generator(&self) -> &EmbeddingGenerator<E> {
        &self.generator
    }

    pub fn expander(&self) -> &QueryExpander<C> {
        &self.expander
    }

    pub async fn index_document(&self, document: &Document) -> Result<IndexReport, IndexError> {
        self.index_document_with_progress(document, &mut |_| {}).await
    }

    /// Chunks, embeds and stores one document. Either every chunk is stored or none.
    pub async fn index_document_with_progress(
        &self,
        document: &Document,
        on_progress: &mut (dyn FnMut(EmbeddingProgress) + Send),
    ) -> Result<IndexReport, IndexError> {
        let chunks = chunk_document(&document.text, &self.chunking);
        if chunks.is_empty() {
            warn!(document_id = %document.id, "document has no text to index");
            return Ok(IndexReport {
                document_id: document.id.clone(),
                chunk_count: 0,
            });
        }

        let model = self.generator.options().model.clone();
        let embeddings = self
            .generator
            .generate_embeddings_with_progress(&chunks, &model, on_progress)
            .await
            .map_err(|source| IndexError::Embedding {
                document_id: document.id.clone(),
                source,
            })?;

        let vectors = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| ChunkVector::from_chunk(&document.id, chunk, embedding))
            .collect::<Result<Vec<_>, _>>()?;

        let chunk_count = vectors.len();
        self.store.store_vectors(&document.id, vectors);

        let enabled = self
            .metadata
            .get(&document.id)
            .map_or(true, |existing| existing.enabled);
        self.metadata.upsert(
            &document.id,
            DocumentMetadata {
                name: document.name.clone(),
                enabled,
                last_indexed: Utc::now(),
                chunks: chunk_count,
                metadata: document.metadata.clone(),
            },
        );

        info!(document_id = %document.id, chunks = chunk_count, "indexed document");
        Ok(IndexReport {
            document_id: document.id.clone(),
            chunk_count,
        })
    }

    pub fn remove_document(&self, document_id: &str) -> bool {
        let had_vectors = self.store.remove_vectors(document_id);
        let had_metadata = self.metadata.remove(document_id).is_some();
        had_vectors || had_metadata
    }

    /// True while no newer search has been started than `request_id`.
    pub fn is_latest(&self, request_id: u64) -> bool {
        self.latest_request.load(Ordering::SeqCst) == request_id
    }

    /// Expands, embeds and ranks `query` over enabled documents.
    ///
    /// Never fails; problems surface as an empty result with a status.
    pub async fn search(&self, query: &str) -> SearchOutcome {
        let request_id = self.latest_request.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = |expanded_terms: Vec<String>, status: KnowledgeStatus| SearchOutcome {
            request_id,
            query: query.to_string(),
            expanded_terms,
            results: Vec::new(),
            status,
        };

        let document_ids: Vec<String> = self
            .metadata
            .enabled_document_ids()
            .into_iter()
            .filter(|id| self.store.has_vectors(id))
            .collect();
        if document_ids.is_empty() {
            return outcome(vec![query.to_string()], KnowledgeStatus::NoKnowledge);
        }
        if query.trim().is_empty() {
            return outcome(vec![query.to_string()], KnowledgeStatus::NoMatches);
        }

        let expansion_model = self.expander.options().model.clone();
        let terms = self.expander.expand_query(query, &expansion_model).await;

        let embedding_model = self.generator.options().model.clone();
        let expanded = match self
            .expander
            .generate_multiple_embeddings(&terms, &self.generator, &embedding_model)
            .await
        {
            Ok(expanded) => expanded,
            Err(error) => {
                warn!(%error, request_id, "query embedding failed, returning no results");
                return outcome(terms, KnowledgeStatus::Unavailable);
            }
        };

        let query_embeddings: Vec<Vec<f32>> =
            expanded.into_iter().map(|term| term.embedding).collect();
        let results = search(
            &self.store,
            &query_embeddings,
            &document_ids,
            &self.search_options,
        );

        let status = if results.is_empty() {
            KnowledgeStatus::NoMatches
        } else {
            KnowledgeStatus::Found
        };

        SearchOutcome {
            request_id,
            query: query.to_string(),
            expanded_terms: terms,
            results,
            status,
        }
    }
}
