use crate::embeddings::Embedder;
use crate::error::FallbackReason;
use crate::index::MemoryStore;
use crate::text::{paragraphs, query_terms};
use crate::types::{MemoryItem, RetrievalMethod};
use tracing::{debug, warn};

/// Candidates from the first stage, with the reason the vector path was
/// skipped when the lexical fallback produced them
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub items: Vec<MemoryItem>,
    pub fallback: Option<FallbackReason>,
}

/// First-stage retriever: nearest-neighbour search with a keyword fallback
pub struct CandidateRetriever<'a> {
    store: &'a MemoryStore,
    provider: Option<&'a dyn Embedder>,
}

impl<'a> CandidateRetriever<'a> {
    pub fn new(store: &'a MemoryStore, provider: Option<&'a dyn Embedder>) -> Self {
        Self { store, provider }
    }

    /// Up to `2 * limit` candidates for `query`. Never fails.
    pub async fn retrieve(&self, query: &str, limit: usize) -> Vec<MemoryItem> {
        self.retrieve_traced(query, limit).await.items
    }

    /// Like `retrieve`, but reports which path was taken
    pub async fn retrieve_traced(&self, query: &str, limit: usize) -> Retrieval {
        if query.trim().is_empty() || limit == 0 {
            return Retrieval::default();
        }

        // Extra headroom for the reranker
        let k = limit * 2;

        match self.vector_search(query, k).await {
            Ok(items) => Retrieval {
                items,
                fallback: None,
            },
            Err(reason) => {
                match &reason {
                    FallbackReason::ProviderNotConfigured | FallbackReason::NoVectorResults => {
                        debug!(%reason, "using keyword search")
                    }
                    _ => warn!(%reason, "vector search unavailable, using keyword search"),
                }

                let items = match self.store.documents() {
                    Ok(documents) => lexical_search(query, &documents, k),
                    Err(e) => {
                        warn!(error = %e, "failed to read documents for keyword search");
                        Vec::new()
                    }
                };

                Retrieval {
                    items,
                    fallback: Some(reason),
                }
            }
        }
    }

    async fn vector_search(&self, query: &str, k: usize) -> Result<Vec<MemoryItem>, FallbackReason> {
        let provider = self.provider.ok_or(FallbackReason::ProviderNotConfigured)?;
        let vector = provider.embed(query).await?;

        let hits = self
            .store
            .query(&vector, provider.model_id(), k)
            .map_err(|e| FallbackReason::VectorSearchFailed(e.to_string()))?;

        if hits.is_empty() {
            return Err(FallbackReason::NoVectorResults);
        }

        Ok(hits
            .into_iter()
            .map(|hit| MemoryItem {
                source: hit.metadata.source,
                text: hit.metadata.text,
                score: hit.score,
                method: RetrievalMethod::Vector,
            })
            .collect())
    }
}

/// Score every paragraph of every document by the share of query terms it
/// contains. Chunks with no matching term are dropped.
pub fn lexical_search(query: &str, documents: &[(String, String)], k: usize) -> Vec<MemoryItem> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }

    let mut items = Vec::new();
    for (source, text) in documents {
        for chunk in paragraphs(text) {
            let lower = chunk.to_lowercase();
            let matches = terms.iter().filter(|t| lower.contains(t.as_str())).count();
            if matches == 0 {
                continue;
            }

            items.push(MemoryItem {
                source: source.clone(),
                text: chunk.to_string(),
                score: matches as f64 / terms.len() as f64,
                method: RetrievalMethod::Keyword,
            });
        }
    }

    // Stable: equal scores keep document order
    items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    items.truncate(k);
    items
}
