use crate::chunking::estimate_tokens_for_chars;
use crate::models::{ChunkVector, SearchOptions, SearchResult};
use crate::vector_store::VectorStore;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Cosine of the angle between `a` and `b`; 0 for zero-magnitude or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0f64, 0f64, 0f64),
        |(dot, norm_a, norm_b), (&x, &y)| {
            let (x, y) = (f64::from(x), f64::from(y));
            (dot + x * y, norm_a + x * x, norm_b + y * y)
        },
    );

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

#[derive(Debug, Clone, Copy)]
struct Scored<'a> {
    vector: &'a ChunkVector,
    score: f32,
    gap_filler: bool,
}

fn rank_order(left: &Scored<'_>, right: &Scored<'_>) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| left.gap_filler.cmp(&right.gap_filler))
        .then_with(|| left.vector.chunk_index.cmp(&right.vector.chunk_index))
        .then_with(|| left.vector.document_id.cmp(&right.vector.document_id))
}

/// Ranks the chunks of `document_ids` against every query embedding.
///
/// A chunk scores the best similarity it reaches with any query. Results are
/// thresholded, capped at `max_results`, fitted to `token_budget` and finally
/// gap-filled: the chunks right before and after each hit are returned as
/// context while the budget allows.
pub fn search(
    store: &VectorStore,
    query_embeddings: &[Vec<f32>],
    document_ids: &[String],
    options: &SearchOptions,
) -> Vec<SearchResult> {
    if query_embeddings.is_empty() || document_ids.is_empty() || options.max_results == 0 {
        return Vec::new();
    }

    let requested: BTreeSet<&String> = document_ids.iter().collect();
    let documents: HashMap<&str, Arc<[ChunkVector]>> = requested
        .into_iter()
        .map(|id| (id.as_str(), store.get_vectors(id)))
        .filter(|(_, vectors)| !vectors.is_empty())
        .collect();

    let mut ranked: Vec<Scored<'_>> = documents
        .values()
        .flat_map(|vectors| vectors.iter())
        .filter_map(|vector| {
            let score = query_embeddings
                .iter()
                .map(|query| cosine_similarity(query, &vector.embedding))
                .fold(f32::NEG_INFINITY, f32::max);
            (score >= options.similarity_threshold).then_some(Scored {
                vector,
                score,
                gap_filler: false,
            })
        })
        .collect();

    ranked.sort_by(rank_order);
    ranked.truncate(options.max_results);

    let mut used_tokens = 0usize;
    let mut accepted = Vec::with_capacity(ranked.len());
    for hit in ranked {
        let tokens = estimate_tokens_for_chars(hit.vector.chunk_size);
        if used_tokens + tokens > options.token_budget {
            break;
        }
        used_tokens += tokens;
        accepted.push(hit);
    }

    if options.fill_gaps {
        let fillers = gap_fillers(&documents, &accepted);
        for filler in fillers {
            let tokens = estimate_tokens_for_chars(filler.vector.chunk_size);
            if used_tokens + tokens > options.token_budget {
                continue;
            }
            used_tokens += tokens;
            accepted.push(filler);
        }
    }

    accepted.sort_by(rank_order);
    accepted
        .into_iter()
        .enumerate()
        .map(|(position, hit)| SearchResult {
            document_id: hit.vector.document_id.clone(),
            chunk_index: hit.vector.chunk_index,
            total_chunks: hit.vector.total_chunks,
            position: hit.vector.position,
            text: hit.vector.text.clone(),
            score: hit.score,
            rank: position + 1,
            gap_filler: hit.gap_filler,
        })
        .collect()
}

/// Neighbours (index ±1, same document) of accepted hits that are not
/// retained yet, strongest first. A neighbour scores as the weakest hit it touches.
fn gap_fillers<'a>(
    documents: &'a HashMap<&str, Arc<[ChunkVector]>>,
    accepted: &[Scored<'a>],
) -> Vec<Scored<'a>> {
    let retained: HashSet<(&str, usize)> = accepted
        .iter()
        .map(|hit| (hit.vector.document_id.as_str(), hit.vector.chunk_index))
        .collect();

    let mut candidates: HashMap<(&str, usize), f32> = HashMap::new();
    for hit in accepted {
        let document_id = hit.vector.document_id.as_str();
        let index = hit.vector.chunk_index;
        let neighbours = [
            index.checked_sub(1),
            Some(index + 1).filter(|&next| next < hit.vector.total_chunks),
        ];

        for neighbour in neighbours.into_iter().flatten() {
            let key = (document_id, neighbour);
            if retained.contains(&key) {
                continue;
            }
            candidates
                .entry(key)
                .and_modify(|score| *score = score.min(hit.score))
                .or_insert(hit.score);
        }
    }

    let mut fillers: Vec<Scored<'a>> = candidates
        .into_iter()
        .filter_map(|((document_id, chunk_index), score)| {
            let vector = find_chunk(documents.get(document_id)?, chunk_index)?;
            Some(Scored {
                vector,
                score,
                gap_filler: true,
            })
        })
        .collect();

    fillers.sort_by(rank_order);
    fillers
}

fn find_chunk<'a>(vectors: &'a Arc<[ChunkVector]>, chunk_index: usize) -> Option<&'a ChunkVector> {
    vectors
        .binary_search_by_key(&chunk_index, |vector| vector.chunk_index)
        .ok()
        .map(|position| &vectors[position])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkPosition;

    fn vector(document_id: &str, chunk_index: usize, total: usize, embedding: Vec<f32>) -> ChunkVector {
        ChunkVector::new(
            document_id,
            chunk_index,
            total,
            ChunkPosition {
                start: chunk_index * 100,
                end: chunk_index * 100 + 40,
            },
            embedding,
            Some(format!("{document_id}-{chunk_index}")),
        )
        .unwrap()
    }

    fn open_options() -> SearchOptions {
        SearchOptions {
            similarity_threshold: 0.0,
            max_results: 10,
            token_budget: 10_000,
            fill_gaps: true,
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = [0.3, -1.2, 4.0, 0.01];
        assert_eq!(cosine_similarity(&v, &v), 1.0);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]), 0.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = [0.2, 0.7, -0.1];
        let b = [0.9, -0.3, 0.4];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn zero_or_mismatched_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn results_are_ranked_by_similarity() {
        let store = VectorStore::new();
        store.store_vectors(
            "doc",
            vec![
                vector("doc", 0, 3, vec![0.9, 0.1, 0.1, 0.1, 0.1]),
                vector("doc", 1, 3, vec![0.1, 0.9, 0.1, 0.1, 0.1]),
                vector("doc", 2, 3, vec![0.8, 0.2, 0.1, 0.1, 0.1]),
            ],
        );

        let results = search(
            &store,
            &[vec![0.9, 0.1, 0.1, 0.1, 0.1]],
            &ids(&["doc"]),
            &open_options(),
        );

        let order: Vec<usize> = results.iter().map(|result| result.chunk_index).collect();
        assert_eq!(order, vec![0, 2, 1]);
        assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
        assert_eq!(
            results.iter().map(|result| result.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(results.iter().all(|result| !result.gap_filler));
    }

    #[test]
    fn empty_store_returns_no_results() {
        let store = VectorStore::new();
        let results = search(&store, &[vec![1.0, 0.0]], &ids(&["doc"]), &open_options());
        assert!(results.is_empty());

        let results = search(&store, &[vec![1.0, 0.0]], &[], &open_options());
        assert!(results.is_empty());
    }

    #[test]
    fn best_query_embedding_wins() {
        let store = VectorStore::new();
        store.store_vectors(
            "doc",
            vec![
                vector("doc", 0, 2, vec![1.0, 0.0]),
                vector("doc", 1, 2, vec![0.0, 1.0]),
            ],
        );

        let results = search(
            &store,
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            &ids(&["doc"]),
            &SearchOptions {
                similarity_threshold: 0.99,
                ..open_options()
            },
        );
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| result.score >= 0.99));
    }

    #[test]
    fn threshold_excludes_weak_matches() {
        let store = VectorStore::new();
        store.store_vectors("doc", vec![vector("doc", 0, 1, vec![0.0, 1.0])]);
        let results = search(
            &store,
            &[vec![1.0, 0.0]],
            &ids(&["doc"]),
            &SearchOptions {
                similarity_threshold: 0.5,
                ..open_options()
            },
        );
        assert!(results.is_empty());
    }

    #[test]
    fn ties_are_broken_by_chunk_index() {
        let store = VectorStore::new();
        store.store_vectors(
            "doc",
            vec![
                vector("doc", 0, 3, vec![1.0, 0.0]),
                vector("doc", 1, 3, vec![1.0, 0.0]),
                vector("doc", 2, 3, vec![1.0, 0.0]),
            ],
        );
        let results = search(&store, &[vec![1.0, 0.0]], &ids(&["doc"]), &open_options());
        let order: Vec<usize> = results.iter().map(|result| result.chunk_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn token_budget_stops_before_overflow() {
        let store = VectorStore::new();
        store.store_vectors(
            "doc",
            (0..5)
                .map(|index| vector("doc", index, 5, vec![1.0, index as f32 * 0.1]))
                .collect(),
        );

        // every chunk is 40 chars, i.e. 10 tokens
        let results = search(
            &store,
            &[vec![1.0, 0.0]],
            &ids(&["doc"]),
            &SearchOptions {
                token_budget: 25,
                fill_gaps: false,
                ..open_options()
            },
        );
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn max_results_caps_output() {
        let store = VectorStore::new();
        store.store_vectors(
            "doc",
            (0..6)
                .map(|index| vector("doc", index, 6, vec![1.0, index as f32]))
                .collect(),
        );
        let results = search(
            &store,
            &[vec![1.0, 0.0]],
            &ids(&["doc"]),
            &SearchOptions {
                max_results: 3,
                fill_gaps: false,
                ..open_options()
            },
        );
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn isolated_hit_gets_both_neighbours_as_context() {
        let store = VectorStore::new();
        store.store_vectors(
            "doc",
            vec![
                vector("doc", 0, 3, vec![0.0, 1.0]),
                vector("doc", 1, 3, vec![1.0, 0.0]),
                vector("doc", 2, 3, vec![0.0, 1.0]),
            ],
        );

        let results = search(
            &store,
            &[vec![1.0, 0.0]],
            &ids(&["doc"]),
            &SearchOptions {
                similarity_threshold: 0.5,
                ..open_options()
            },
        );

        let summary: Vec<(usize, f32, bool)> = results
            .iter()
            .map(|result| (result.chunk_index, result.score, result.gap_filler))
            .collect();
        assert_eq!(summary, vec![(1, 1.0, false), (0, 1.0, true), (2, 1.0, true)]);
        assert_eq!(
            results.iter().map(|result| result.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn gap_between_hits_takes_weakest_neighbour_score() {
        let store = VectorStore::new();
        store.store_vectors(
            "doc",
            vec![
                vector("doc", 0, 4, vec![1.0, 0.0]),
                vector("doc", 1, 4, vec![0.0, 1.0]),
                vector("doc", 2, 4, vec![0.8, 0.6]),
                vector("doc", 3, 4, vec![-1.0, 0.0]),
            ],
        );

        let results = search(
            &store,
            &[vec![1.0, 0.0]],
            &ids(&["doc"]),
            &SearchOptions {
                similarity_threshold: 0.5,
                ..open_options()
            },
        );

        let order: Vec<(usize, bool)> = results
            .iter()
            .map(|result| (result.chunk_index, result.gap_filler))
            .collect();
        assert_eq!(order, vec![(0, false), (2, false), (1, true), (3, true)]);
        assert!(results
            .iter()
            .filter(|result| result.gap_filler)
            .all(|result| (result.score - 0.8).abs() < 1e-6));
        assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[test]
    fn fillers_stay_inside_the_document() {
        let store = VectorStore::new();
        store.store_vectors(
            "doc",
            vec![
                vector("doc", 0, 2, vec![1.0, 0.0]),
                vector("doc", 1, 2, vec![1.0, 0.0]),
            ],
        );

        let results = search(&store, &[vec![1.0, 0.0]], &ids(&["doc"]), &open_options());
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| !result.gap_filler));
    }

    #[test]
    fn gap_fillers_respect_token_budget() {
        let store = VectorStore::new();
        store.store_vectors(
            "doc",
            vec![
                vector("doc", 0, 3, vec![1.0, 0.0]),
                vector("doc", 1, 3, vec![0.0, 1.0]),
                vector("doc", 2, 3, vec![1.0, 0.1]),
            ],
        );

        let results = search(
            &store,
            &[vec![1.0, 0.0]],
            &ids(&["doc"]),
            &SearchOptions {
                similarity_threshold: 0.5,
                token_budget: 20,
                ..open_options()
            },
        );
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| !result.gap_filler));
    }

    #[test]
    fn searches_only_requested_documents() {
        let store = VectorStore::new();
        store.store_vectors("a", vec![vector("a", 0, 1, vec![1.0, 0.0])]);
        store.store_vectors("b", vec![vector("b", 0, 1, vec![1.0, 0.0])]);

        let results = search(&store, &[vec![1.0, 0.0]], &ids(&["b", "b"]), &open_options());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "b");
    }
}
