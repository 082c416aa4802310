use crate::error::ProviderError;
use crate::models::Chunk;
use crate::traits::EmbeddingProvider;
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Documents kept in the embedding cache before older ones are evicted.
pub const DEFAULT_CACHE_CAPACITY: u64 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingOptions {
    pub model: String,
    pub batch_size: usize,
    /// Applied to every provider call.
    pub timeout: Duration,
    pub cache_capacity: u64,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: Duration::from_secs(30),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingProgress {
    pub percent: u8,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Whole-document cache key over the ordered chunk contents and the model.
pub fn cache_key(chunks: &[Chunk], model: &str) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.content.as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Turns chunks into embeddings through a provider, caching whole documents.
pub struct EmbeddingGenerator<P> {
    provider: P,
    options: EmbeddingOptions,
    cache: Cache<String, Arc<Vec<Vec<f32>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P> EmbeddingGenerator<P>
where
    P: EmbeddingProvider,
{
    pub fn new(provider: P, options: EmbeddingOptions) -> Self {
        let cache = Cache::builder()
            .max_capacity(options.cache_capacity)
            .build();

        Self {
            provider,
            options,
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &EmbeddingOptions {
        &self.options
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn generate_embeddings(
        &self,
        chunks: &[Chunk],
        model: &str,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.generate_embeddings_with_progress(chunks, model, &mut |_| {})
            .await
    }

    /// Embeds every chunk, one provider call per batch, all or nothing.
    ///
    /// The returned vectors line up with `chunks`. A failed batch discards
    /// the work of earlier batches and nothing is cached.
    pub async fn generate_embeddings_with_progress(
        &self,
        chunks: &[Chunk],
        model: &str,
        on_progress: &mut (dyn FnMut(EmbeddingProgress) + Send),
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let key = cache_key(chunks, model);
        if let Some(cached) = self.lookup(&key) {
            debug!(chunks = chunks.len(), model, "embedding cache hit");
            on_progress(EmbeddingProgress {
                percent: 100,
                message: format!("loaded {} embeddings from cache", cached.len()),
            });
            return Ok(cached.as_ref().clone());
        }

        let batch_size = self.options.batch_size.max(1);
        let batch_count = chunks.len().div_ceil(batch_size);
        let mut vectors = Vec::with_capacity(chunks.len());

        for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
            let inputs: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();
            let embedded = self
                .call_provider(model, &inputs)
                .await
                .map_err(|source| ProviderError::Batch {
                    batch_index,
                    source: Box::new(source),
                })?;

            debug!(
                provider = self.provider.name(),
                batch = batch_index + 1,
                batches = batch_count,
                "embedded batch"
            );
            vectors.extend(embedded);

            let done = batch_index + 1;
            on_progress(EmbeddingProgress {
                percent: ((done * 100) / batch_count) as u8,
                message: format!("embedded batch {done}/{batch_count}"),
            });
        }

        self.insert(key, vectors.clone());
        Ok(vectors)
    }

    /// Embeds a single query-time text without touching the document cache.
    pub async fn embed_text(&self, text: &str, model: &str) -> Result<Vec<f32>, ProviderError> {
        self.call_provider(model, &[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ProviderError::malformed(self.provider.name(), "no embedding returned"))
    }

    async fn call_provider(
        &self,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let timeout = self.options.timeout;
        let embedded = tokio::time::timeout(timeout, self.provider.embed_batch(model, inputs))
            .await
            .map_err(|_| ProviderError::Timeout(timeout))??;

        if embedded.len() != inputs.len() {
            return Err(ProviderError::malformed(
                self.provider.name(),
                format!(
                    "expected {} embeddings, received {}",
                    inputs.len(),
                    embedded.len()
                ),
            ));
        }
        if embedded.iter().any(|vector| vector.is_empty()) {
            return Err(ProviderError::malformed(
                self.provider.name(),
                "received an empty embedding",
            ));
        }

        Ok(embedded)
    }

    fn lookup(&self, key: &str) -> Option<Arc<Vec<Vec<f32>>>> {
        let found = self.cache.get(key);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn insert(&self, key: String, vectors: Vec<Vec<f32>>) {
        self.cache.insert(key, Arc::new(vectors));
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.run_pending_tasks();
        CacheStats {
            entries: self.cache.entry_count() as usize,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chunking::chunk_text;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Embeds each input as `[len, 1.0]`, optionally failing on one call.
    #[derive(Default)]
    pub(crate) struct CountingProvider {
        pub calls: AtomicUsize,
        pub fail_on_call: Option<usize>,
        pub delay: Option<Duration>,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn embed_batch(
            &self,
            _model: &str,
            inputs: &[String],
        ) -> Result<Vec<Vec<f32>>, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_on_call == Some(call) {
                return Err(ProviderError::Status {
                    provider: "counting".to_string(),
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(inputs
                .iter()
                .map(|input| vec![input.chars().count() as f32, 1.0])
                .collect())
        }
    }

    fn options(batch_size: usize) -> EmbeddingOptions {
        EmbeddingOptions {
            batch_size,
            ..Default::default()
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        chunk_text(&"lorem ipsum dolor sit amet ".repeat(40), 10, 2, None)
    }

    #[tokio::test]
    async fn embeddings_align_with_chunks_and_batch() {
        let chunks = sample_chunks();
        let generator = EmbeddingGenerator::new(CountingProvider::default(), options(10));

        let vectors = generator
            .generate_embeddings(&chunks, "model-a")
            .await
            .expect("embedding succeeds");

        assert_eq!(vectors.len(), chunks.len());
        for (chunk, vector) in chunks.iter().zip(&vectors) {
            assert_eq!(vector[0], chunk.content.chars().count() as f32);
        }
        let expected_calls = chunks.len().div_ceil(10);
        assert_eq!(generator.provider().calls.load(Ordering::SeqCst), expected_calls);
    }

    #[tokio::test]
    async fn second_generation_hits_cache_without_provider_calls() {
        let chunks = sample_chunks();
        let generator = EmbeddingGenerator::new(CountingProvider::default(), options(4));

        let first = generator.generate_embeddings(&chunks, "model-a").await.unwrap();
        let calls_after_first = generator.provider().calls.load(Ordering::SeqCst);
        let second = generator.generate_embeddings(&chunks, "model-a").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(generator.provider().calls.load(Ordering::SeqCst), calls_after_first);
        let stats = generator.cache_stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));
    }

    #[tokio::test]
    async fn different_model_misses_cache() {
        let chunks = sample_chunks();
        let generator = EmbeddingGenerator::new(CountingProvider::default(), options(100));

        generator.generate_embeddings(&chunks, "model-a").await.unwrap();
        generator.generate_embeddings(&chunks, "model-b").await.unwrap();

        assert_eq!(generator.provider().calls.load(Ordering::SeqCst), 2);
        assert_eq!(generator.cache_stats().entries, 2);
    }

    #[tokio::test]
    async fn failed_batch_aborts_and_caches_nothing() {
        let chunks = sample_chunks();
        let provider = CountingProvider {
            fail_on_call: Some(1),
            ..Default::default()
        };
        let generator = EmbeddingGenerator::new(provider, options(3));

        let error = generator
            .generate_embeddings(&chunks, "model-a")
            .await
            .expect_err("second batch fails");

        assert!(matches!(error, ProviderError::Batch { batch_index: 1, .. }));
        assert_eq!(generator.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn timeout_is_a_provider_failure() {
        let chunks = sample_chunks();
        let provider = CountingProvider {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let generator = EmbeddingGenerator::new(
            provider,
            EmbeddingOptions {
                timeout: Duration::from_millis(10),
                ..Default::default()
            },
        );

        let error = generator.generate_embeddings(&chunks, "model-a").await.unwrap_err();
        match error {
            ProviderError::Batch { source, .. } => {
                assert!(matches!(*source, ProviderError::Timeout(_)))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(generator.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn progress_reaches_one_hundred_percent() {
        let chunks = sample_chunks();
        let generator = EmbeddingGenerator::new(CountingProvider::default(), options(5));
        let mut updates = Vec::new();

        generator
            .generate_embeddings_with_progress(&chunks, "model-a", &mut |progress| {
                updates.push(progress.percent)
            })
            .await
            .unwrap();

        assert_eq!(updates.len(), chunks.len().div_ceil(5));
        assert_eq!(updates.last(), Some(&100));
        assert!(updates.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let generator = EmbeddingGenerator::new(CountingProvider::default(), options(5));
        let vectors = generator.generate_embeddings(&[], "model-a").await.unwrap();
        assert!(vectors.is_empty());
        assert_eq!(generator.provider().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_is_bounded_by_capacity() {
        let generator = EmbeddingGenerator::new(
            CountingProvider::default(),
            EmbeddingOptions {
                cache_capacity: 2,
                ..Default::default()
            },
        );

        for round in 0..6 {
            let chunks = chunk_text(&format!("document number {round} "), 10, 0, None);
            generator.generate_embeddings(&chunks, "model-a").await.unwrap();
        }

        let stats = generator.cache_stats();
        assert!(stats.entries <= 2, "cache kept {} entries", stats.entries);
        assert_eq!(stats.misses, 6);

    }

    #[tokio::test]
    async fn cleared_cache_calls_provider_again() {
        let chunks = sample_chunks();
        let generator = EmbeddingGenerator::new(CountingProvider::default(), options(100));

        generator.generate_embeddings(&chunks, "model-a").await.unwrap();
        generator.clear_cache();
        generator.generate_embeddings(&chunks, "model-a").await.unwrap();

        assert_eq!(generator.provider().calls.load(Ordering::SeqCst), 2);
        assert_eq!(generator.cache_stats().hits, 0);
    }

    #[test]
    fn cache_key_depends_on_content_and_model() {
        let chunks = sample_chunks();
        assert_eq!(cache_key(&chunks, "m"), cache_key(&chunks, "m"));
        assert_ne!(cache_key(&chunks, "m"), cache_key(&chunks, "n"));
        assert_ne!(cache_key(&chunks[..1], "m"), cache_key(&chunks, "m"));
    }
}
