use crate::config::{find_grove_path, GroveConfig};
use crate::embeddings::{embedder_for, EmbedError, Embedder};
use crate::error::{Error, FallbackReason, Result};
use crate::index::{MemoryMetadata, MemoryStore};
use crate::patterns::{PatternDetector, PatternStore};
use crate::rerank::cache::RerankCache;
use crate::rerank::Reranker;
use crate::retrieval::CandidateRetriever;
use crate::text::paragraphs;
use crate::types::{Memory, MemoryStats, SearchHit, SearchOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

const DB_FILE: &str = "memory.db";
const RERANK_CACHE_FILE: &str = "rerank_cache.json";
const PATTERNS_FILE: &str = "patterns.json";

/// Kind recorded for memories added directly
pub const KIND_MEMORY: &str = "memory";
/// Kind recorded for paragraphs of ingested files
pub const KIND_DOCUMENT: &str = "document";

/// A search response with the degradations that shaped it
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub retrieval_fallback: Option<FallbackReason>,
    pub rerank_fallback: Option<FallbackReason>,
}

/// Counts from an ingest run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files: usize,
    pub chunks: usize,
    pub embedded: usize,
}

/// The main memory interface
pub struct Memories {
    grove_path: PathBuf,
    store: MemoryStore,
    provider: Option<Arc<dyn Embedder>>,
    reranker: Reranker,
}

impl Memories {
    /// Open the nearest memory store
    pub fn open() -> Result<Self> {
        let grove_path = find_grove_path().ok_or(Error::NotInitialized)?;
        Self::open_at(grove_path)
    }

    /// Open a memory store at a specific path
    pub fn open_at(grove_path: PathBuf) -> Result<Self> {
        if !grove_path.exists() {
            return Err(Error::MissingPath(grove_path));
        }

        let store = MemoryStore::open(&grove_path.join(DB_FILE))?;
        let config = GroveConfig::new(grove_path.clone());
        let socket = config.embedding_socket();
        let timeout = config.provider_timeout();

        let provider = embedder_for(&config.embedding_model(), &socket, timeout);
        let cache = RerankCache::open(&grove_path.join(RERANK_CACHE_FILE), config.rerank_cache_ttl());
        let rerank_model = embedder_for(&config.rerank_model(), &socket, timeout);
        let reranker = Reranker::new(cache, rerank_model, timeout);

        Ok(Self::from_parts(grove_path, store, provider, reranker))
    }

    pub fn from_parts(
        grove_path: PathBuf,
        store: MemoryStore,
        provider: Option<Arc<dyn Embedder>>,
        reranker: Reranker,
    ) -> Self {
        Self {
            grove_path,
            store,
            provider,
            reranker,
        }
    }

    /// Initialize a new memory store
    pub fn init(path: &Path) -> Result<Self> {
        let grove_path = path.join(".grove");
        fs::create_dir_all(&grove_path)?;
        Self::open_at(grove_path)
    }

    pub fn grove_path(&self) -> &Path {
        &self.grove_path
    }

    pub fn provider_model(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.model_id())
    }

    pub fn reranker(&self) -> &Reranker {
        &self.reranker
    }

    /// Probe the embedding provider
    pub async fn check_provider(&self) -> std::result::Result<(), EmbedError> {
        let provider = self.provider.as_deref().ok_or(EmbedError::NotConfigured)?;
        provider.probe().await
    }

    // =========================================================================
    // Core operations
    // =========================================================================

    /// Remember something new. Stored without a vector when the provider is
    /// unavailable; keyword search still finds it.
    pub async fn remember(&self, content: &str, source: &str) -> Result<i64> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::Invalid("Nothing to remember".to_string()));
        }

        let metadata = MemoryMetadata::now(source, content, KIND_MEMORY);
        let id = match self.embed_one(content).await {
            Some((vector, model)) => self.store.insert(Some((vector.as_slice(), model)), &metadata)?,
            None => self.store.insert(None, &metadata)?,
        };

        Ok(id)
    }

    async fn embed_one(&self, text: &str) -> Option<(Vec<f32>, &str)> {
        let provider = self.provider.as_deref()?;
        match provider.embed(text).await {
            Ok(vector) => Some((vector, provider.model_id())),
            Err(EmbedError::NotConfigured) => None,
            Err(e) => {
                warn!(error = %e, "storing without embedding");
                None
            }
        }
    }

    /// Index the paragraphs of every markdown file under `dir`.
    ///
    /// Re-ingesting a file replaces its earlier paragraphs.
    pub async fn ingest(&self, dir: &Path) -> Result<IngestReport> {
        if !dir.exists() {
            return Err(Error::MissingPath(dir.to_path_buf()));
        }

        let mut report = IngestReport::default();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "md") {
                continue;
            }

            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };

            let source = path.display().to_string();
            let chunks = paragraphs(&text);
            self.store.delete_source(&source)?;

            let vectors = self.embed_chunks(&chunks).await;
            for (i, chunk) in chunks.iter().enumerate() {
                let metadata = MemoryMetadata::now(&source, chunk, KIND_DOCUMENT);
                let vector = vectors
                    .as_ref()
                    .map(|(vs, model)| (vs[i].as_slice(), model.as_str()));
                self.store.insert(vector, &metadata)?;
            }

            report.files += 1;
            report.chunks += chunks.len();
            if vectors.is_some() {
                report.embedded += chunks.len();
            }
        }

        info!(files = report.files, chunks = report.chunks, "ingest finished");
        Ok(report)
    }

    async fn embed_chunks(&self, chunks: &[&str]) -> Option<(Vec<Vec<f32>>, String)> {
        let provider = self.provider.as_deref()?;
        if chunks.is_empty() {
            return None;
        }

        match provider.embed_batch(chunks).await {
            Ok(vectors) if vectors.len() == chunks.len() => {
                Some((vectors, provider.model_id().to_string()))
            }
            Ok(vectors) => {
                warn!(expected = chunks.len(), got = vectors.len(), "embedding count mismatch");
                None
            }
            Err(EmbedError::NotConfigured) => None,
            Err(e) => {
                warn!(error = %e, "storing chunks without embeddings");
                None
            }
        }
    }

    /// Search memories: candidate retrieval, then an optional rerank pass
    pub async fn search(&self, query: &str, max_results: usize, options: SearchOptions) -> Vec<SearchHit> {
        let retriever = CandidateRetriever::new(&self.store, self.provider.as_deref());
        let candidates = retriever.retrieve(query, max_results).await;

        if !options.rerank {
            return candidates
                .into_iter()
                .take(max_results)
                .map(SearchHit::Retrieved)
                .collect();
        }

        self.reranker
            .rerank(query, candidates, max_results)
            .await
            .into_iter()
            .map(SearchHit::Reranked)
            .collect()
    }

    /// Like `search`, but reports the fallbacks each stage took
    pub async fn search_traced(&self, query: &str, max_results: usize, options: SearchOptions) -> SearchOutcome {
        let retriever = CandidateRetriever::new(&self.store, self.provider.as_deref());
        let retrieval = retriever.retrieve_traced(query, max_results).await;

        if !options.rerank {
            return SearchOutcome {
                hits: retrieval
                    .items
                    .into_iter()
                    .take(max_results)
                    .map(SearchHit::Retrieved)
                    .collect(),
                retrieval_fallback: retrieval.fallback,
                rerank_fallback: None,
            };
        }

        let outcome = self
            .reranker
            .rerank_traced(query, retrieval.items, max_results)
            .await;

        SearchOutcome {
            hits: outcome.items.into_iter().map(SearchHit::Reranked).collect(),
            retrieval_fallback: retrieval.fallback,
            rerank_fallback: outcome.fallback,
        }
    }

    /// Get a specific memory
    pub fn get(&self, id: i64) -> Result<Option<Memory>> {
        Ok(self.store.get(id)?)
    }

    /// List recent memories
    pub fn list(&self, kind: Option<&str>, limit: usize) -> Result<Vec<Memory>> {
        Ok(self.store.list(kind, limit)?)
    }

    /// Forget a memory
    pub fn forget(&self, id: i64) -> Result<bool> {
        Ok(self.store.delete(id)?)
    }

    // =========================================================================
    // Stats and patterns
    // =========================================================================

    pub fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            total_memories: self.store.count()?,
            embedded_memories: self.store.embedded_count()?,
            by_kind: self.store.counts_by_kind()?.into_iter().collect(),
            cached_scores: self.reranker.with_cache(|c| c.len()),
        })
    }

    /// The pattern detector persisted next to this store
    pub fn pattern_detector(&self) -> PatternDetector {
        PatternDetector::new(PatternStore::open(&self.grove_path.join(PATTERNS_FILE)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::LiteEmbedder;
    use crate::types::RetrievalMethod;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(3600);
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn memories(dir: &Path, provider: Option<Arc<dyn Embedder>>) -> Memories {
        let store = MemoryStore::open(&dir.join(DB_FILE)).unwrap();
        let reranker = Reranker::new(
            RerankCache::open(&dir.join(RERANK_CACHE_FILE), TTL),
            Some(Arc::new(LiteEmbedder::new())),
            TIMEOUT,
        );
        Memories::from_parts(dir.to_path_buf(), store, provider, reranker)
    }

    const FIXTURES: [(&str, &str); 5] = [
        ("ops/release.md", "Use the deploy script to push builds."),
        ("ops/ci.md", "The pipeline caches dependencies between runs."),
        ("ops/runbook.md", "Deploy pipeline: every merge to main triggers the deploy pipeline."),
        ("notes/garden.md", "Water the tomatoes every other morning."),
        ("ops/rollback.md", "Rolling back a deploy takes two minutes."),
    ];

    #[tokio::test]
    async fn keyword_search_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let mem = memories(dir.path(), None);
        for (source, text) in FIXTURES {
            mem.remember(text, source).await.unwrap();
        }

        let outcome = mem
            .search_traced("deploy pipeline", 3, SearchOptions::default())
            .await;

        assert_eq!(outcome.retrieval_fallback, Some(FallbackReason::ProviderNotConfigured));
        assert_eq!(outcome.hits.len(), 3);
        let top = outcome.hits[0].item();
        assert_eq!(top.source, "ops/runbook.md");
        assert_eq!(top.score, 1.0);
        assert_eq!(top.method, RetrievalMethod::Keyword);
        assert!(outcome.hits[1..].iter().all(|h| h.score() == 0.5));
        assert!(outcome
            .hits
            .iter()
            .all(|h| h.item().source != "notes/garden.md"));
    }

    #[tokio::test]
    async fn vector_search_with_rerank() {
        let dir = tempfile::tempdir().unwrap();
        let mem = memories(dir.path(), Some(Arc::new(LiteEmbedder::new())));
        for (source, text) in FIXTURES {
            mem.remember(text, source).await.unwrap();
        }

        let outcome = mem
            .search_traced("deploy pipeline", 2, SearchOptions { rerank: true })
            .await;

        assert!(outcome.retrieval_fallback.is_none());
        assert!(outcome.rerank_fallback.is_none());
        assert_eq!(outcome.hits.len(), 2);
        for hit in &outcome.hits {
            assert!(matches!(hit, SearchHit::Reranked(r) if r.item.method == RetrievalMethod::Vector));
        }
        assert!(outcome.hits[0].score() >= outcome.hits[1].score());
        assert!(dir.path().join(RERANK_CACHE_FILE).exists());
    }

    #[tokio::test]
    async fn plain_search_matches_traced_hits() {
        let dir = tempfile::tempdir().unwrap();
        let mem = memories(dir.path(), Some(Arc::new(LiteEmbedder::new())));
        for (source, text) in FIXTURES {
            mem.remember(text, source).await.unwrap();
        }

        for rerank in [false, true] {
            let options = SearchOptions { rerank };
            let plain = mem.search("deploy pipeline", 3, options).await;
            let traced = mem.search_traced("deploy pipeline", 3, options).await;
            assert_eq!(plain.len(), 3);
            assert_eq!(plain, traced.hits);
        }
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mem = memories(dir.path(), None);
        mem.remember("Deploy notes", "a").await.unwrap();

        assert!(mem.search("  ", 5, SearchOptions { rerank: true }).await.is_empty());
    }

    #[tokio::test]
    async fn provider_check_reports_missing_provider() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            memories(dir.path(), None).check_provider().await,
            Err(EmbedError::NotConfigured)
        );
        let lite = memories(dir.path(), Some(Arc::new(LiteEmbedder::new())));
        assert!(lite.check_provider().await.is_ok());
    }

    #[tokio::test]
    async fn remember_rejects_empty_content() {
        let dir = tempfile::tempdir().unwrap();
        let mem = memories(dir.path(), None);
        assert!(matches!(mem.remember("   ", "a").await, Err(Error::Invalid(_))));
    }

    #[tokio::test]
    async fn ingest_replaces_paragraphs_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        fs::create_dir_all(docs.join("nested")).unwrap();
        fs::write(
            docs.join("deploy.md"),
            "Deploy runs from the pipeline.\n\nRollback uses the previous build.",
        )
        .unwrap();
        fs::write(docs.join("nested/notes.md"), "Remember to rotate the keys.").unwrap();
        fs::write(docs.join("ignored.txt"), "Not markdown, not indexed.").unwrap();

        let mem = memories(dir.path(), Some(Arc::new(LiteEmbedder::new())));
        let report = mem.ingest(&docs).await.unwrap();
        assert_eq!(report, IngestReport { files: 2, chunks: 3, embedded: 3 });

        let again = mem.ingest(&docs).await.unwrap();
        assert_eq!(again.chunks, 3);
        assert_eq!(mem.stats().unwrap().total_memories, 3);
        assert_eq!(mem.list(Some(KIND_DOCUMENT), 10).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stats_and_forget() {
        let dir = tempfile::tempdir().unwrap();
        let mem = memories(dir.path(), None);
        let id = mem.remember("Keep the changelog current", "cli").await.unwrap();

        let stats = mem.stats().unwrap();
        assert_eq!(stats.total_memories, 1);
        assert_eq!(stats.embedded_memories, 0);
        assert_eq!(stats.by_kind.get(KIND_MEMORY), Some(&1));

        assert!(mem.forget(id).unwrap());
        assert!(mem.get(id).unwrap().is_none());
    }

    #[test]
    fn pattern_detector_persists_beside_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let mem = memories(dir.path(), None);

        mem.pattern_detector().observe(&["read", "edit"], "");
        assert_eq!(mem.pattern_detector().store().len(), 1);
        assert!(dir.path().join(PATTERNS_FILE).exists());
    }
}
