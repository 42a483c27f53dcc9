//! Second-stage reranking.
//!
//! Each (query, candidate) pair is scored by a local similarity model and the
//! result is blended with the first-stage score. Scores are cached for an hour.
//! Any failure abandons the whole pass and hands back the candidates unranked.

pub mod cache;
pub mod combine;

use futures::future::try_join_all;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::FallbackReason;
use crate::text::truncate_chars;
use crate::types::{MemoryItem, RerankedItem};
use cache::RerankCache;

/// Model calls in flight at once; batches run one after another
pub const BATCH_SIZE: usize = 4;

/// Characters of query or document passed to the similarity model
pub const MAX_TEXT_CHARS: usize = 512;

/// Result of a rerank pass, with the reason it degraded if it did
#[derive(Debug, Clone, Default)]
pub struct RerankOutcome {
    pub items: Vec<RerankedItem>,
    pub fallback: Option<FallbackReason>,
}

pub struct Reranker {
    cache: Mutex<RerankCache>,
    model: Option<Arc<dyn Embedder>>,
    timeout: Duration,
}

impl Reranker {
    pub fn new(cache: RerankCache, model: Option<Arc<dyn Embedder>>, timeout: Duration) -> Self {
        Self {
            cache: Mutex::new(cache),
            model,
            timeout,
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, RerankCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the score cache
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut RerankCache) -> R) -> R {
        f(&mut self.lock_cache())
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model.as_deref().map(|m| m.model_id())
    }

    /// Whether the similarity model loads. Never raises.
    pub async fn is_available(&self) -> bool {
        self.load_model().await.is_ok()
    }

    async fn load_model(&self) -> Result<&dyn Embedder, FallbackReason> {
        let model = self
            .model
            .as_deref()
            .ok_or_else(|| FallbackReason::ModelUnavailable("no rerank model configured".into()))?;

        match tokio::time::timeout(self.timeout, model.probe()).await {
            Ok(Ok(())) => Ok(model),
            Ok(Err(e)) => Err(FallbackReason::ModelUnavailable(e.to_string())),
            Err(_) => Err(FallbackReason::TimedOut(self.timeout.as_secs())),
        }
    }

    /// Rerank `candidates` and keep the best `top_k`. Never fails.
    pub async fn rerank(&self, query: &str, candidates: Vec<MemoryItem>, top_k: usize) -> Vec<RerankedItem> {
        self.rerank_traced(query, candidates, top_k).await.items
    }

    /// Like `rerank`, but reports why the pass degraded
    pub async fn rerank_traced(
        &self,
        query: &str,
        mut candidates: Vec<MemoryItem>,
        top_k: usize,
    ) -> RerankOutcome {
        if candidates.is_empty() || top_k == 0 {
            return RerankOutcome::default();
        }

        candidates.truncate(top_k * 2);

        let docs: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        match self.score_all(query, &docs).await {
            Ok(scores) => RerankOutcome {
                items: combine::combine(candidates.into_iter().zip(scores).collect(), top_k),
                fallback: None,
            },
            Err(reason) => {
                warn!(%reason, "rerank abandoned, keeping retrieval order");
                RerankOutcome {
                    items: combine::passthrough(candidates, top_k),
                    fallback: Some(reason),
                }
            }
        }
    }

    /// Scores for `docs` in order. Cached pairs skip the model; the query is
    /// embedded once and the misses are embedded `BATCH_SIZE` at a time.
    async fn score_all(&self, query: &str, docs: &[&str]) -> Result<Vec<f64>, FallbackReason> {
        let model = self.load_model().await?;

        let mut scores: Vec<Option<f64>> = {
            let mut cache = self.lock_cache();
            docs.iter().map(|doc| cache.get(query, doc)).collect()
        };
        let misses: Vec<usize> = (0..docs.len()).filter(|&i| scores[i].is_none()).collect();
        debug!(hits = docs.len() - misses.len(), misses = misses.len(), "rerank cache lookup");

        if !misses.is_empty() {
            let query_vec = self
                .embed_bounded(model, truncate_chars(query, MAX_TEXT_CHARS))
                .await?;

            for (batch_no, batch) in misses.chunks(BATCH_SIZE).enumerate() {
                let batch_scores = try_join_all(
                    batch
                        .iter()
                        .map(|&i| self.score_doc(model, query, &query_vec, docs[i])),
                )
                .await?;
                debug!(batch = batch_no, size = batch.len(), "scored rerank batch");

                for (&i, score) in batch.iter().zip(batch_scores) {
                    scores[i] = Some(score);
                }
            }
        }

        scores
            .into_iter()
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| FallbackReason::ScoringFailed("candidate left unscored".into()))
    }

    /// Relevance of `doc` to `query` in [0, 1], from the cache when fresh
    pub async fn score(&self, query: &str, doc: &str) -> Result<f64, FallbackReason> {
        let scores = self.score_all(query, &[doc]).await?;
        scores
            .first()
            .copied()
            .ok_or_else(|| FallbackReason::ScoringFailed("no score produced".into()))
    }

    async fn score_doc(
        &self,
        model: &dyn Embedder,
        query: &str,
        query_vec: &[f32],
        doc: &str,
    ) -> Result<f64, FallbackReason> {
        let doc_vec = self
            .embed_bounded(model, truncate_chars(doc, MAX_TEXT_CHARS))
            .await?;

        let cosine = cosine_similarity(query_vec, &doc_vec);
        let score = ((cosine + 1.0) / 2.0).clamp(0.0, 1.0);

        if let Err(e) = self.lock_cache().put(query, doc, score, model.model_id()) {
            warn!(error = %e, "failed to persist rerank cache");
        }

        Ok(score)
    }

    async fn embed_bounded(&self, model: &dyn Embedder, text: &str) -> Result<Vec<f32>, FallbackReason> {
        match tokio::time::timeout(self.timeout, model.embed(text)).await {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(e)) => Err(FallbackReason::ScoringFailed(e.to_string())),
            Err(_) => Err(FallbackReason::TimedOut(self.timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbedError, LiteEmbedder};
    use crate::types::RetrievalMethod;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn item(text: &str, score: f64) -> MemoryItem {
        MemoryItem {
            source: format!("src:{}", text),
            text: text.to_string(),
            score,
            method: RetrievalMethod::Keyword,
        }
    }

    fn reranker(model: Option<Arc<dyn Embedder>>) -> Reranker {
        Reranker::new(RerankCache::in_memory(Duration::from_secs(3600)), model, TIMEOUT)
    }

    /// Counts calls and tracks how many embeds are in flight at once
    #[derive(Default)]
    struct TrackingEmbedder {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for TrackingEmbedder {
        fn model_id(&self) -> &str {
            "tracking"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_id(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Failed("inference crashed".into()))
        }
    }

    struct UnloadableEmbedder;

    #[async_trait]
    impl Embedder for UnloadableEmbedder {
        fn model_id(&self) -> &str {
            "unloadable"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            unreachable!("embed must not run when the model fails to load")
        }

        async fn probe(&self) -> Result<(), EmbedError> {
            Err(EmbedError::Unavailable("weights missing".into()))
        }
    }

    struct HangingEmbedder;

    #[async_trait]
    impl Embedder for HangingEmbedder {
        fn model_id(&self) -> &str {
            "hanging"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn reranks_by_combined_score_and_caches() {
        let rr = reranker(Some(Arc::new(LiteEmbedder::new())));
        let candidates = vec![
            item("bananas are yellow fruit", 0.9),
            item("deploy pipeline runs nightly", 0.5),
            item("the deploy pipeline", 0.4),
        ];

        let outcome = rr.rerank_traced("the deploy pipeline", candidates, 3).await;

        assert!(outcome.fallback.is_none());
        assert_eq!(outcome.items.len(), 3);
        assert_eq!(outcome.items[0].item.text, "the deploy pipeline");
        assert!((outcome.items[0].rerank_score - 1.0).abs() < 1e-6);
        assert!(outcome
            .items
            .windows(2)
            .all(|w| w[0].combined_score >= w[1].combined_score));
        for r in &outcome.items {
            assert!((0.0..=1.0).contains(&r.rerank_score));
            assert!((r.combined_score - (0.3 * r.item.score + 0.7 * r.rerank_score)).abs() < 1e-12);
        }
        assert_eq!(rr.with_cache(|c| c.len()), 3);
    }

    #[tokio::test]
    async fn caps_candidates_at_twice_top_k() {
        let model = Arc::new(TrackingEmbedder::default());
        let rr = reranker(Some(model.clone()));
        let candidates: Vec<_> = (0..10).map(|i| item(&format!("doc {}", i), 0.5)).collect();

        let ranked = rr.rerank("query", candidates, 2).await;

        assert_eq!(ranked.len(), 2);
        // Four candidates scored plus one query embedding
        assert_eq!(model.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn batches_bound_concurrency() {
        let model = Arc::new(TrackingEmbedder::default());
        let rr = reranker(Some(model.clone()));
        let candidates: Vec<_> = (0..12).map(|i| item(&format!("doc {}", i), 0.5)).collect();

        rr.rerank("query", candidates, 6).await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 13);
        assert_eq!(model.max_in_flight.load(Ordering::SeqCst), BATCH_SIZE);
        assert_eq!(model.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scoring_failure_returns_candidates_unranked() {
        let rr = reranker(Some(Arc::new(FailingEmbedder)));
        let candidates = vec![item("low", 0.2), item("high", 0.8), item("mid", 0.5)];

        let outcome = rr.rerank_traced("q", candidates, 2).await;

        assert!(matches!(outcome.fallback, Some(FallbackReason::ScoringFailed(_))));
        let texts: Vec<_> = outcome.items.iter().map(|r| r.item.text.as_str()).collect();
        assert_eq!(texts, vec!["low", "high"]);
        assert_eq!(outcome.items[0].rerank_score, 0.2);
    }

    #[tokio::test]
    async fn unloadable_model_falls_back() {
        let rr = reranker(Some(Arc::new(UnloadableEmbedder)));
        let outcome = rr.rerank_traced("q", vec![item("a", 0.3)], 1).await;
        assert!(matches!(outcome.fallback, Some(FallbackReason::ModelUnavailable(_))));
        assert_eq!(outcome.items.len(), 1);

        let none = reranker(None);
        let outcome = none.rerank_traced("q", vec![item("a", 0.3)], 1).await;
        assert!(matches!(outcome.fallback, Some(FallbackReason::ModelUnavailable(_))));
    }

    #[tokio::test]
    async fn hanging_model_times_out() {
        let rr = Reranker::new(
            RerankCache::in_memory(Duration::from_secs(3600)),
            Some(Arc::new(HangingEmbedder)),
            Duration::from_millis(20),
        );

        let outcome = rr.rerank_traced("q", vec![item("a", 0.3)], 1).await;
        assert!(matches!(outcome.fallback, Some(FallbackReason::TimedOut(_))));
    }

    #[tokio::test]
    async fn cached_scores_skip_the_model() {
        let rr = reranker(Some(Arc::new(FailingEmbedder)));
        rr.with_cache(|c| c.put("q", "a", 0.95, "failing")).unwrap();

        let outcome = rr.rerank_traced("q", vec![item("a", 0.1)], 1).await;

        assert!(outcome.fallback.is_none());
        assert_eq!(outcome.items[0].rerank_score, 0.95);
    }

    #[tokio::test]
    async fn single_scores_are_normalized_and_cached() {
        let model = Arc::new(TrackingEmbedder::default());
        let rr = reranker(Some(model.clone()));

        let first = rr.score("query", "doc").await.unwrap();
        let second = rr.score("query", "doc").await.unwrap();

        assert!((0.0..=1.0).contains(&first));
        assert_eq!(first, second);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn availability_probe() {
        assert!(reranker(Some(Arc::new(LiteEmbedder::new()))).is_available().await);
        assert!(!reranker(Some(Arc::new(UnloadableEmbedder))).is_available().await);
        assert!(!reranker(None).is_available().await);
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        let rr = reranker(Some(Arc::new(LiteEmbedder::new())));
        assert!(rr.rerank("q", Vec::new(), 5).await.is_empty());
        assert!(rr.rerank("q", vec![item("a", 0.1)], 0).await.is_empty());
    }
}
