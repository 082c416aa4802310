use crate::models::DocumentMetadata;
use crate::traits::DocumentMetadataIndex;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct InMemoryMetadataIndex {
    records: Mutex<BTreeMap<String, DocumentMetadata>>,
}

impl InMemoryMetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, DocumentMetadata>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentMetadataIndex for InMemoryMetadataIndex {
    fn upsert(&self, document_id: &str, metadata: DocumentMetadata) {
        self.records().insert(document_id.to_string(), metadata);
    }

    fn get(&self, document_id: &str) -> Option<DocumentMetadata> {
        self.records().get(document_id).cloned()
    }

    fn remove(&self, document_id: &str) -> Option<DocumentMetadata> {
        self.records().remove(document_id)
    }

    fn document_ids(&self) -> Vec<String> {
        self.records().keys().cloned().collect()
    }

    fn set_enabled(&self, document_id: &str, enabled: bool) -> bool {
        match self.records().get_mut(document_id) {
            Some(record) => {
                record.enabled = enabled;
                true
            }
            None => false,
        }
    }

    fn enabled_document_ids(&self) -> Vec<String> {
        self.records()
            .iter()
            .filter(|(_, record)| record.enabled)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
