use crate::models::ChunkVector;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub documents: usize,
    pub vectors: usize,
}

/// In-memory document id to vectors mapping shared by indexing and search.
///
/// Lookups of unknown ids return empty values rather than errors.
#[derive(Debug, Default)]
pub struct VectorStore {
    documents: RwLock<HashMap<String, Arc<[ChunkVector]>>>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever was stored for `document_id`.
    pub fn store_vectors(&self, document_id: &str, mut vectors: Vec<ChunkVector>) {
        vectors.sort_by_key(|vector| vector.chunk_index);
        self.write()
            .insert(document_id.to_string(), Arc::from(vectors));
    }

    pub fn get_vectors(&self, document_id: &str) -> Arc<[ChunkVector]> {
        self.read()
            .get(document_id)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    pub fn has_vectors(&self, document_id: &str) -> bool {
        self.read()
            .get(document_id)
            .is_some_and(|vectors| !vectors.is_empty())
    }

    pub fn get_document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn remove_vectors(&self, document_id: &str) -> bool {
        self.write().remove(document_id).is_some()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn stats(&self) -> StoreStats {
        let documents = self.read();
        StoreStats {
            documents: documents.len(),
            vectors: documents.values().map(|vectors| vectors.len()).sum(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<[ChunkVector]>>> {
        self.documents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<[ChunkVector]>>> {
        self.documents.write().unwrap_or_else(PoisonError::into_inner)
    }
}
