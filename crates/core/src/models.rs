use crate::error::IndexError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A registered knowledge source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            text: text.into(),
            metadata: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct ChunkPosition {
    pub start: usize,
    pub end: usize,
}

/// A contiguous slice of a document. Offsets count characters, `end` is exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub start: usize,
    pub end: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

impl Chunk {
    pub fn position(&self) -> ChunkPosition {
        ChunkPosition {
            start: self.start,
            end: self.end,
        }
    }

    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// An embedded chunk as held by the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkVector {
    pub document_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub chunk_size: usize,
    pub position: ChunkPosition,
    pub embedding: Vec<f32>,
    pub text: Option<String>,
}

impl ChunkVector {
    pub fn new(
        document_id: impl Into<String>,
        chunk_index: usize,
        total_chunks: usize,
        position: ChunkPosition,
        embedding: Vec<f32>,
        text: Option<String>,
    ) -> Result<Self, IndexError> {
        let document_id = document_id.into();
        if document_id.is_empty() {
            return Err(IndexError::InvalidVector("document id is empty".to_string()));
        }
        if embedding.is_empty() {
            return Err(IndexError::InvalidVector(format!(
                "chunk {chunk_index} of {document_id} has an empty embedding"
            )));
        }
        if chunk_index >= total_chunks {
            return Err(IndexError::InvalidVector(format!(
                "chunk index {chunk_index} is out of range for {total_chunks} chunks of {document_id}"
            )));
        }
        if position.end < position.start {
            return Err(IndexError::InvalidVector(format!(
                "chunk {chunk_index} of {document_id} ends before it starts"
            )));
        }

        Ok(Self {
            document_id,
            chunk_index,
            total_chunks,
            chunk_size: position.end - position.start,
            position,
            embedding,
            text,
        })
    }

    pub fn from_chunk(
        document_id: &str,
        chunk: &Chunk,
        embedding: Vec<f32>,
    ) -> Result<Self, IndexError> {
        Self::new(
            document_id,
            chunk.chunk_index,
            chunk.total_chunks,
            chunk.position(),
            embedding,
            Some(chunk.content.clone()),
        )
    }
}

/// A search term produced by query expansion, with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedQuery {
    pub term: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub document_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub position: ChunkPosition,
    pub text: Option<String>,
    pub score: f32,
    pub rank: usize,
    pub gap_filler: bool,
}

/// Display record kept by the document metadata index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub name: String,
    pub enabled: bool,
    pub last_indexed: DateTime<Utc>,
    pub chunks: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SearchOptions {
    pub similarity_threshold: f32,
    pub max_results: usize,
    pub token_budget: usize,
    pub fill_gaps: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
            max_results: 10,
            token_budget: 4_000,
            fill_gaps: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KnowledgeStatus {
    /// At least one chunk matched.
    Found,
    /// Documents were searched but nothing cleared the threshold.
    NoMatches,
    /// No enabled document has vectors.
    NoKnowledge,
    /// Query embeddings could not be produced.
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub request_id: u64,
    pub query: String,
    pub expanded_terms: Vec<String>,
    pub results: Vec<SearchResult>,
    pub status: KnowledgeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub document_id: String,
    pub chunk_count: usize,
}
