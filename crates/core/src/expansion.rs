use crate::embeddings::EmbeddingGenerator;
use crate::error::ProviderError;
use crate::models::ExpandedQuery;
use crate::traits::{ChatProvider, EmbeddingProvider};
use moka::sync::Cache;
use regex::Regex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_EXPANSION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EXPANSION_CACHE_CAPACITY: u64 = 100;

const LIST_MARKER_PATTERN: &str = r"^\s*(?:[-*•]+|\d+[.)])\s*";

const SYSTEM_PROMPT: &str = "You rewrite search queries for a semantic document search. \
Given a user query, produce alternative phrasings that improve recall: synonyms, \
sub-questions that decompose the query, and variants of the entities it mentions. \
Answer with a JSON array of strings and nothing else.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionOptions {
    pub enabled: bool,
    pub model: String,
    /// Total number of terms returned, the original query included.
    pub max_terms: usize,
    pub timeout: Duration,
    pub cache_capacity: u64,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            model: DEFAULT_EXPANSION_MODEL.to_string(),
            max_terms: 5,
            timeout: Duration::from_secs(20),
            cache_capacity: DEFAULT_EXPANSION_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpansionCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Multi-query expansion through a chat model, with a per-session cache.
pub struct QueryExpander<C> {
    chat: C,
    options: ExpansionOptions,
    cache: Cache<(String, String), Vec<String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<C> QueryExpander<C>
where
    C: ChatProvider,
{
    pub fn new(chat: C, options: ExpansionOptions) -> Self {
        let cache = Cache::builder()
            .max_capacity(options.cache_capacity)
            .build();

        Self {
            chat,
            options,
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &ExpansionOptions {
        &self.options
    }

    /// Returns the original query followed by distinct alternative search terms.
    ///
    /// Never fails: any provider problem degrades to `[query]`.
    pub async fn expand_query(&self, query: &str, model: &str) -> Vec<String> {
        let fallback = vec![query.to_string()];
        if !self.options.enabled || query.trim().is_empty() || self.options.max_terms <= 1 {
            return fallback;
        }

        let key = (query.to_string(), model.to_string());
        if let Some(terms) = self.cached(&key) {
            return terms;
        }

        let user_prompt = format!(
            "Query: {query}\nReturn up to {} alternative search queries.",
            self.options.max_terms - 1
        );
        let timeout = self.options.timeout;
        let reply = tokio::time::timeout(
            timeout,
            self.chat.complete(model, SYSTEM_PROMPT, &user_prompt),
        )
        .await
        .unwrap_or(Err(ProviderError::Timeout(timeout)));

        let reply = match reply {
            Ok(reply) => reply,
            Err(error) => {
                warn!(provider = self.chat.name(), %error, "query expansion failed, using the original query");
                return fallback;
            }
        };

        let alternatives = match parse_terms(&reply) {
            Ok(alternatives) => alternatives,
            Err(error) => {
                warn!(%error, "could not parse query expansion reply");
                return fallback;
            }
        };
        if alternatives.is_empty() {
            warn!(provider = self.chat.name(), "query expansion returned no usable terms");
            return fallback;
        }

        let terms = distinct_terms(query, alternatives, self.options.max_terms);
        debug!(query, terms = terms.len(), "expanded query");
        self.cache.insert(key, terms.clone());
        terms
    }

    /// Embeds every term on its own, outside the document cache.
    ///
    /// Terms that fail to embed are dropped; the call only fails when none succeed.
    pub async fn generate_multiple_embeddings<P>(
        &self,
        terms: &[String],
        embedder: &EmbeddingGenerator<P>,
        embedding_model: &str,
    ) -> Result<Vec<ExpandedQuery>, ProviderError>
    where
        P: EmbeddingProvider,
    {
        let mut expanded = Vec::with_capacity(terms.len());
        let mut last_error = None;

        for term in terms {
            match embedder.embed_text(term, embedding_model).await {
                Ok(embedding) => expanded.push(ExpandedQuery {
                    term: term.clone(),
                    embedding,
                }),
                Err(error) => {
                    warn!(term = %term, %error, "skipping search term that failed to embed");
                    last_error = Some(error);
                }
            }
        }

        match (expanded.is_empty(), last_error) {
            (true, Some(error)) => Err(error),
            _ => Ok(expanded),
        }
    }

    pub fn cache_stats(&self) -> ExpansionCacheStats {
        self.cache.run_pending_tasks();
        ExpansionCacheStats {
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

    fn cached(&self, key: &(String, String)) -> Option<Vec<String>> {
        let found = self.cache.get(key);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }
}

fn list_marker() -> Result<&'static Regex, regex::Error> {
    static MARKER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(LIST_MARKER_PATTERN))
        .as_ref()
        .map_err(Clone::clone)
}

/// Reads alternative queries from a model reply: a JSON array, or one per line.
fn parse_terms(reply: &str) -> Result<Vec<String>, regex::Error> {
    let trimmed = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Ok(terms) = serde_json::from_str::<Vec<String>>(trimmed) {
        return Ok(terms
            .into_iter()
            .map(|term| term.trim().to_string())
            .filter(|term| !term.is_empty())
            .collect());
    }

    let marker = list_marker()?;
    Ok(trimmed
        .lines()
        .map(|line| marker.replace(line, "").into_owned())
        .map(|line| {
            line.trim()
                .trim_matches(|c: char| c == '"' || c == '\'' || c == ',')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty() && !line.starts_with('[') && !line.starts_with(']'))
        .collect())
}

fn distinct_terms(query: &str, alternatives: Vec<String>, max_terms: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    std::iter::once(query.to_string())
        .chain(alternatives)
        .filter(|term| seen.insert(term.to_lowercase()))
        .take(max_terms.max(1))
        .collect()
}
