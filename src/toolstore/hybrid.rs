//! Budget split and merge for hybrid (FTS5 + semantic) search.
//!
//! BM25 rank and cosine distance live on unrelated scales, so results are not
//! fused by score. Each path returns its own top-k and the lists are merged by
//! path priority: semantic first, then full-text.

use std::collections::HashSet;

use super::types::ToolMatch;

/// Split `total` into `(fts_limit, semantic_limit)` using `semantic_ratio`
/// (0 = all FTS5, 1 = all semantic). The two always sum to `total`.
pub fn hybrid_search_limits(total: usize, semantic_ratio: f64) -> (usize, usize) {
    let semantic = (total as f64 * semantic_ratio.clamp(0.0, 1.0)).round() as usize;
    let semantic = semantic.min(total);
    (total - semantic, semantic)
}

/// Semantic matches first in distance order, then FTS5 matches not already
/// present, truncated to `max_results`. The first occurrence of a name wins.
pub fn merge_results(
    fts: Vec<ToolMatch>,
    semantic: Vec<ToolMatch>,
    max_results: usize,
) -> Vec<ToolMatch> {
    let mut seen = HashSet::with_capacity(fts.len() + semantic.len());
    let mut merged = Vec::with_capacity((fts.len() + semantic.len()).min(max_results));

    for m in semantic.into_iter().chain(fts) {
        if merged.len() == max_results {
            break;
        }
        if seen.insert(m.name.clone()) {
            merged.push(m);
        }
    }

    merged
}
