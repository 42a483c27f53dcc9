use crate::types::{MemoryItem, RerankedItem};

/// Weight of the first-stage retrieval score
pub const RETRIEVAL_WEIGHT: f64 = 0.3;
/// Weight of the rerank score
pub const RERANK_WEIGHT: f64 = 0.7;

pub fn combined_score(retrieval_score: f64, rerank_score: f64) -> f64 {
    RETRIEVAL_WEIGHT * retrieval_score + RERANK_WEIGHT * rerank_score
}

/// Merge each candidate with its rerank score, order by combined score and
/// keep the first `top_k`. Ties keep the candidates' input order.
pub fn combine(scored: Vec<(MemoryItem, f64)>, top_k: usize) -> Vec<RerankedItem> {
    let mut ranked: Vec<RerankedItem> = scored
        .into_iter()
        .map(|(item, rerank_score)| RerankedItem {
            combined_score: combined_score(item.score, rerank_score),
            rerank_score,
            item,
        })
        .collect();

    // sort_by is stable
    ranked.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(top_k);
    ranked
}

/// Candidates passed through unranked, with the retrieval score standing in
/// for the rerank score
pub fn passthrough(candidates: Vec<MemoryItem>, top_k: usize) -> Vec<RerankedItem> {
    candidates
        .into_iter()
        .take(top_k)
        .map(|item| RerankedItem {
            rerank_score: item.score,
            combined_score: combined_score(item.score, item.score),
            item,
        })
        .collect()
}
