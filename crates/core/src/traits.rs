use crate::error::ProviderError;
use crate::models::DocumentMetadata;
use async_trait::async_trait;

/// Remote (or local) source of embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Embeds `inputs` in order, one vector per input.
    async fn embed_batch(
        &self,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Chat-completion capable model used for query expansion.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProviderError>;
}

/// Display-level bookkeeping for documents, owned by the host application.
pub trait DocumentMetadataIndex: Send + Sync {
    fn upsert(&self, document_id: &str, metadata: DocumentMetadata);

    fn get(&self, document_id: &str) -> Option<DocumentMetadata>;

    fn remove(&self, document_id: &str) -> Option<DocumentMetadata>;

    fn document_ids(&self) -> Vec<String>;

    fn set_enabled(&self, document_id: &str, enabled: bool) -> bool;

    fn enabled_document_ids(&self) -> Vec<String> {
        self.document_ids()
            .into_iter()
            .filter(|id| self.get(id).is_some_and(|metadata| metadata.enabled))
            .collect()
    }
}
