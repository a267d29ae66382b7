//! Hybrid search with Reciprocal Rank Fusion (RRF).
//!
//! Vector similarity and FTS5 keyword search each produce a ranked list of
//! chunk ids; RRF fuses them by rank position, since cosine distances and
//! BM25 scores are not comparable.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;

use tars_core::{SearchMode, SearchResult, TarsError};
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::store::MemoryIndex;

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: usize = 60;

/// Which index to query and how.
#[derive(Debug, Clone)]
pub struct SearchEngineConfig {
    /// Index database file.
    pub db_path: PathBuf,
    /// Model used for the query vector when the index records none.
    pub model: String,
    /// RRF smoothing constant.
    pub rrf_k: usize,
}

/// Hybrid search over one index.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use tars_core::SearchMode;
/// use tars_memory::embedding::OllamaClient;
/// use tars_memory::search::{SearchEngine, SearchEngineConfig};
///
/// # async fn example() {
/// let config = SearchEngineConfig {
///     db_path: PathBuf::from("memory/tars.db"),
///     model: "qwen3-embedding:0.6b".into(),
///     rrf_k: 60,
/// };
/// let provider = OllamaClient::new("http://localhost:11434").unwrap();
/// let engine = SearchEngine::new(config, Box::new(provider));
/// let results = engine.search("dog walks", SearchMode::Hybrid, 5, 0.0).await.unwrap();
/// # }
/// ```
pub struct SearchEngine {
    config: SearchEngineConfig,
    provider: Box<dyn EmbeddingProvider>,
}

impl SearchEngine {
    /// Create a search engine.
    pub fn new(config: SearchEngineConfig, provider: Box<dyn EmbeddingProvider>) -> Self {
        Self { config, provider }
    }

    /// Search the index, best match first.
    ///
    /// Each retriever fetches `2 * limit` candidates. `min_score` filters on
    /// the fused RRF score, which lies in `[0, 1]` and depends on how many
    /// lists were fused and on `rrf_k`; it is not a similarity threshold.
    /// A missing or empty index yields no results and no embedding call.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Validation`] for an empty query,
    /// [`TarsError::Provider`] if the query cannot be embedded,
    /// [`TarsError::DimensionMismatch`] if the query vector does not fit the
    /// index, or [`TarsError::Database`] on query failure.
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<SearchResult>, TarsError> {
        if query.trim().is_empty() {
            return Err(TarsError::Validation("query must not be empty".into()));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let Some(index) = MemoryIndex::open_existing(&self.config.db_path)? else {
            debug!(db = %self.config.db_path.display(), "no index to search");
            return Ok(Vec::new());
        };
        if index.chunk_count()? == 0 {
            return Ok(Vec::new());
        }

        let fetch = limit.saturating_mul(2);
        let mut lists: Vec<Vec<i64>> = Vec::with_capacity(2);

        if matches!(mode, SearchMode::Hybrid | SearchMode::Vec) {
            let model = index
                .embedding_model()?
                .unwrap_or_else(|| self.config.model.clone());
            let mut vectors = self.provider.embed(&[query.to_string()], &model).await?;
            if vectors.is_empty() {
                return Err(TarsError::Provider(format!(
                    "model {model:?} returned no embedding for the query"
                )));
            }
            let query_vector = vectors.swap_remove(0);
            lists.push(index.vector_search(&query_vector, fetch)?);
        }
        if matches!(mode, SearchMode::Hybrid | SearchMode::Fts) {
            lists.push(index.keyword_search(query, fetch)?);
        }

        let mut fused = reciprocal_rank_fusion(&lists, self.config.rrf_k);
        fused.retain(|(_, score)| *score >= min_score);
        fused.truncate(limit);

        debug!(%mode, candidates = fused.len(), "fused ranked lists");
        index.hydrate(&fused)
    }
}

/// Make a free-text query safe for FTS5 `MATCH`.
///
/// Each whitespace-separated token becomes a quoted phrase (embedded quotes
/// doubled), so operators and punctuation are matched literally and every
/// token must appear.
///
/// # Examples
///
/// ```
/// use tars_memory::search::sanitize_fts_query;
///
/// assert_eq!(sanitize_fts_query("dog walks"), r#""dog" "walks""#);
/// assert_eq!(sanitize_fts_query(r#"say "hi" OR"#), r#""say" """hi""" "OR""#);
/// assert_eq!(sanitize_fts_query("   "), "");
/// ```
pub fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fuse ranked lists with Reciprocal Rank Fusion.
///
/// An id at 1-based rank `r` in a list gains `1 / (k + r)`. Totals are
/// divided by `lists.len() / (k + 1)`, so an id ranked first everywhere
/// scores exactly `1.0`. Results are sorted by score, descending; ties keep
/// the order in which ids were first seen.
///
/// # Examples
///
/// ```
/// use tars_memory::search::reciprocal_rank_fusion;
///
/// let fused = reciprocal_rank_fusion(&[vec![7, 3], vec![7, 9]], 60);
/// assert_eq!(fused[0], (7, 1.0));
/// assert_eq!(fused.len(), 3);
///
/// assert!(reciprocal_rank_fusion::<i64>(&[], 60).is_empty());
/// ```
pub fn reciprocal_rank_fusion<T>(lists: &[Vec<T>], k: usize) -> Vec<(T, f64)>
where
    T: Copy + Eq + Hash,
{
    let mut order: Vec<T> = Vec::new();
    let mut scores: HashMap<T, f64> = HashMap::new();

    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            let gain = 1.0 / (k as f64 + rank as f64 + 1.0);
            match scores.get_mut(id) {
                Some(score) => *score += gain,
                None => {
                    scores.insert(*id, gain);
                    order.push(*id);
                }
            }
        }
    }

    let max_score = lists.len() as f64 / (k as f64 + 1.0);
    let mut fused: Vec<(T, f64)> = order
        .into_iter()
        .map(|id| (id, scores.get(&id).copied().unwrap_or(0.0) / max_score))
        .collect();

    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_shared_id_ranks_highest() {
        let fused = reciprocal_rank_fusion(&[vec!["auth", "parse"], vec!["parse", "log"]], 60);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].0, "parse");
    }

    #[test]
    fn rrf_top_everywhere_scores_one() {
        let fused = reciprocal_rank_fusion(&[vec![1, 2], vec![1, 3], vec![1]], 60);
        assert_eq!(fused[0].0, 1);
        assert!((fused[0].1 - 1.0).abs() < 1e-12);
        for (_, score) in &fused[1..] {
            assert!(*score < 1.0 && *score > 0.0);
        }
    }

    #[test]
    fn rrf_single_list_normalises_by_rank() {
        let fused = reciprocal_rank_fusion(&[vec![10, 20]], 60);
        assert!((fused[0].1 - 1.0).abs() < 1e-12);
        assert!((fused[1].1 - 61.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn rrf_ties_keep_first_seen_order() {
        let fused = reciprocal_rank_fusion(&[vec![5, 6], vec![6, 5]], 60);
        assert_eq!(fused.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![5, 6]);

        let fused = reciprocal_rank_fusion(&[vec![8], vec![4]], 60);
        assert_eq!(fused.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![8, 4]);
        assert!((fused[0].1 - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rrf_empty_inputs() {
        assert!(reciprocal_rank_fusion::<i64>(&[], 60).is_empty());
        assert!(reciprocal_rank_fusion::<i64>(&[vec![], vec![]], 60).is_empty());
    }

    #[test]
    fn sanitize_quotes_every_token() {
        assert_eq!(sanitize_fts_query("perry"), "\"perry\"");
        assert_eq!(sanitize_fts_query("  a   b "), "\"a\" \"b\"");
        assert_eq!(sanitize_fts_query("NEAR(x y)"), "\"NEAR(x\" \"y)\"");
        assert_eq!(sanitize_fts_query("it's \"quoted\""), "\"it's\" \"\"\"quoted\"\"\"");
        assert_eq!(sanitize_fts_query(""), "");
    }
}
