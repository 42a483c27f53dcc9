use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A stored memory row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub source: String,
    pub content: String,
    pub kind: String,
    pub created_at: String,
}

/// Which first-stage path produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    Vector,
    Keyword,
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMethod::Vector => write!(f, "vector"),
            RetrievalMethod::Keyword => write!(f, "keyword"),
        }
    }
}

/// A scored snippet from the candidate retriever.
///
/// Scores are relative to the method that produced them: cosine similarity for
/// vector hits, matched-term ratio for keyword hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub source: String,
    pub text: String,
    pub score: f64,
    pub method: RetrievalMethod,
}

/// A candidate after the second-stage rerank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankedItem {
    #[serde(flatten)]
    pub item: MemoryItem,
    pub rerank_score: f64,
    pub combined_score: f64,
}

/// One element of a search response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchHit {
    Retrieved(MemoryItem),
    Reranked(RerankedItem),
}

impl SearchHit {
    pub fn item(&self) -> &MemoryItem {
        match self {
            SearchHit::Retrieved(item) => item,
            SearchHit::Reranked(reranked) => &reranked.item,
        }
    }

    /// The score the hit was ranked by
    pub fn score(&self) -> f64 {
        match self {
            SearchHit::Retrieved(item) => item.score,
            SearchHit::Reranked(reranked) => reranked.combined_score,
        }
    }
}

/// Options for a search request
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub rerank: bool,
}

/// Statistics about the memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub total_memories: usize,
    pub embedded_memories: usize,
    pub by_kind: HashMap<String, usize>,
    pub cached_scores: usize,
}
