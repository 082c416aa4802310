//! Precached embedding bundles.
//!
//! A bundle is produced at build time from static knowledge sources and
//! loaded on startup so those documents are searchable without calling the
//! embedding provider again.

use crate::chunking::{chunk_document, ChunkingConfig};
use crate::embeddings::EmbeddingGenerator;
use crate::error::{BundleError, IndexError};
use crate::models::{ChunkPosition, ChunkVector, Document, DocumentMetadata};
use crate::traits::{DocumentMetadataIndex, EmbeddingProvider};
use crate::vector_store::VectorStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

pub const BUNDLE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrecachedBundle {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub config: BundleConfig,
    pub documents: Vec<BundleDocument>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BundleConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleDocument {
    pub document_id: String,
    pub document_name: String,
    pub vectors: Vec<BundleVector>,
    pub metadata: BundleDocumentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleVector {
    pub id: String,
    pub embedding: Vec<f32>,
    pub position: ChunkPosition,
    pub metadata: BundleVectorMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BundleVectorMetadata {
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleDocumentMetadata {
    pub total_chunks: usize,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub generated_at: DateTime<Utc>,
}

impl PrecachedBundle {
    pub fn from_json_str(json: &str) -> Result<Self, BundleError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn from_path(path: &Path) -> Result<Self, BundleError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), BundleError> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub fn vector_count(&self) -> usize {
        self.documents.iter().map(|document| document.vectors.len()).sum()
    }
}

impl BundleDocument {
    /// Validated store vectors in chunk order.
    pub fn to_vectors(&self) -> Result<Vec<ChunkVector>, BundleError> {
        let invalid = |details: String| BundleError::InvalidRecord {
            document_id: self.document_id.clone(),
            details,
        };

        let dimensions = self.vectors.first().map(|record| record.embedding.len());
        let mut seen = HashSet::new();
        let mut vectors = Vec::with_capacity(self.vectors.len());
        for record in &self.vectors {
            if Some(record.embedding.len()) != dimensions {
                return Err(invalid(format!(
                    "vector {} has {} dimensions, expected {}",
                    record.id,
                    record.embedding.len(),
                    dimensions.unwrap_or_default()
                )));
            }
            if record.metadata.document_id != self.document_id {
                return Err(invalid(format!(
                    "vector {} belongs to {}",
                    record.id, record.metadata.document_id
                )));
            }
            if !seen.insert(record.metadata.chunk_index) {
                return Err(invalid(format!(
                    "chunk index {} appears twice",
                    record.metadata.chunk_index
                )));
            }

            let vector = ChunkVector::new(
                self.document_id.as_str(),
                record.metadata.chunk_index,
                record.metadata.total_chunks,
                record.position,
                record.embedding.clone(),
                record.text.clone(),
            )
            .map_err(|error| invalid(error.to_string()))?;
            vectors.push(vector);
        }

        vectors.sort_by_key(|vector| vector.chunk_index);
        Ok(vectors)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleReport {
    pub loaded: Vec<String>,
    pub already_present: Vec<String>,
    pub rejected: Vec<String>,
}

impl BundleReport {
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty() && self.already_present.is_empty() && self.rejected.is_empty()
    }
}

pub struct BundleLoader {
    bundle: PrecachedBundle,
    expected_model: Option<String>,
}

impl BundleLoader {
    pub fn new(bundle: PrecachedBundle) -> Self {
        Self {
            bundle,
            expected_model: None,
        }
    }

    /// Rejects bundled documents embedded with any other model than `model`.
    pub fn with_expected_model(mut self, model: impl Into<String>) -> Self {
        self.expected_model = Some(model.into());
        self
    }

    pub async fn from_path(path: &Path) -> Result<Self, BundleError> {
        Ok(Self::new(PrecachedBundle::from_path(path).await?))
    }

    pub fn bundle(&self) -> &PrecachedBundle {
        &self.bundle
    }

    /// Loads every bundled document that the store does not hold yet.
    ///
    /// Invalid documents are skipped and reported; the rest still load.
    pub fn initialize_precached_embeddings<M>(&self, store: &VectorStore, metadata: &M) -> BundleReport
    where
        M: DocumentMetadataIndex + ?Sized,
    {
        let mut report = BundleReport::default();

        for document in &self.bundle.documents {
            if store.has_vectors(&document.document_id) {
                report.already_present.push(document.document_id.clone());
                continue;
            }

            let vectors = match self
                .check_model(document)
                .and_then(|()| document.to_vectors())
            {
                Ok(vectors) => vectors,
                Err(error) => {
                    warn!(document_id = %document.document_id, %error, "skipping invalid bundle document");
                    report.rejected.push(document.document_id.clone());
                    continue;
                }
            };

            let chunks = vectors.len();
            store.store_vectors(&document.document_id, vectors);

            let enabled = metadata
                .get(&document.document_id)
                .map_or(true, |existing| existing.enabled);
            metadata.upsert(
                &document.document_id,
                DocumentMetadata {
                    name: document.document_name.clone(),
                    enabled,
                    last_indexed: document.metadata.generated_at,
                    chunks,
                    metadata: bundle_metadata(document),
                },
            );
            report.loaded.push(document.document_id.clone());
        }

        info!(
            loaded = report.loaded.len(),
            already_present = report.already_present.len(),
            rejected = report.rejected.len(),
            "precached embeddings initialised"
        );
        report
    }

    fn check_model(&self, document: &BundleDocument) -> Result<(), BundleError> {
        let Some(expected) = self.expected_model.as_deref() else {
            return Ok(());
        };

        let model = if document.metadata.embedding_model.is_empty() {
            self.bundle.model.as_str()
        } else {
            document.metadata.embedding_model.as_str()
        };
        if model == expected {
            return Ok(());
        }

        Err(BundleError::InvalidRecord {
            document_id: document.document_id.clone(),
            details: format!("embedded with {model}, queries use {expected}"),
        })
    }

    /// Waits for the store to be handed over, then loads the bundle.
    ///
    /// If the store never arrives within `wait`, or its sender is dropped,
    /// nothing is loaded and the host carries on without precached data.
    pub async fn initialize_when_ready<M>(
        &self,
        ready: oneshot::Receiver<Arc<VectorStore>>,
        metadata: &M,
        wait: Duration,
    ) -> BundleReport
    where
        M: DocumentMetadataIndex + ?Sized,
    {
        match tokio::time::timeout(wait, ready).await {
            Ok(Ok(store)) => self.initialize_precached_embeddings(&store, metadata),
            Ok(Err(_)) => {
                warn!("vector store was dropped before it became ready, precached embeddings not loaded");
                BundleReport::default()
            }
            Err(_) => {
                warn!(?wait, "vector store not ready in time, precached embeddings not loaded");
                BundleReport::default()
            }
        }
    }
}

fn bundle_metadata(document: &BundleDocument) -> Map<String, Value> {
    match serde_json::to_value(&document.metadata) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Chunks and embeds `documents` into a bundle. Documents without text are left out.
pub async fn build_bundle<P>(
    documents: &[Document],
    generator: &EmbeddingGenerator<P>,
    chunking: &ChunkingConfig,
    model: &str,
) -> Result<PrecachedBundle, BundleError>
where
    P: EmbeddingProvider,
{
    let generated_at = Utc::now();
    let mut bundled = Vec::with_capacity(documents.len());

    for document in documents {
        let chunks = chunk_document(&document.text, chunking);
        if chunks.is_empty() {
            warn!(document_id = %document.id, "document has no text, left out of bundle");
            continue;
        }

        let embeddings = generator
            .generate_embeddings(&chunks, model)
            .await
            .map_err(|source| IndexError::Embedding {
                document_id: document.id.clone(),
                source,
            })?;

        let vectors = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| BundleVector {
                id: format!("{}_chunk_{}", document.id, chunk.chunk_index),
                embedding,
                position: chunk.position(),
                metadata: BundleVectorMetadata {
                    document_id: document.id.clone(),
                    document_name: document.name.clone(),
                    chunk_index: chunk.chunk_index,
                    total_chunks: chunk.total_chunks,
                    chunk_size: chunk.char_len(),
                },
                text: Some(chunk.content.clone()),
            })
            .collect::<Vec<_>>();

        info!(document_id = %document.id, chunks = vectors.len(), "bundled document");
        bundled.push(BundleDocument {
            document_id: document.id.clone(),
            document_name: document.name.clone(),
            metadata: BundleDocumentMetadata {
                total_chunks: vectors.len(),
                embedding_model: model.to_string(),
                chunk_size: chunking.chunk_size_tokens,
                chunk_overlap: chunking.overlap_tokens,
                generated_at,
            },
            vectors,
        });
    }

    Ok(PrecachedBundle {
        version: BUNDLE_VERSION.to_string(),
        generated_at,
        model: model.to_string(),
        config: BundleConfig {
            chunk_size: chunking.chunk_size_tokens,
            chunk_overlap: chunking.overlap_tokens,
        },
        documents: bundled,
    })
}
