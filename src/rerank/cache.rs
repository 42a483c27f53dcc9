use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::text::truncate_chars;

/// Snapshot format version
pub const CACHE_VERSION: u32 = 1;

/// Characters of query and document that feed the cache key
pub const KEY_PREFIX_CHARS: usize = 200;

/// A cached rerank score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankCacheEntry {
    pub query: String,
    pub document_text: String,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
    pub model: String,
}

#[derive(Deserialize)]
struct CacheFile {
    #[serde(default)]
    entries: HashMap<String, RerankCacheEntry>,
    version: u32,
}

#[derive(Serialize)]
struct CacheFileRef<'a> {
    entries: &'a HashMap<String, RerankCacheEntry>,
    version: u32,
}

/// Digest of the lengths and leading characters of a (query, document) pair.
///
/// Texts that only differ past the first `KEY_PREFIX_CHARS` characters and
/// have equal lengths share a key.
pub fn cache_key(query: &str, doc: &str) -> String {
    let material = format!(
        "{}:{}:{}:{}",
        query.chars().count(),
        truncate_chars(query, KEY_PREFIX_CHARS),
        doc.chars().count(),
        truncate_chars(doc, KEY_PREFIX_CHARS)
    );

    let mut hasher = Md5::new();
    hasher.update(material.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// TTL-bounded rerank scores, persisted as one JSON snapshot.
///
/// The snapshot is read once on open and rewritten in full on every `put`.
/// Nothing guards against another process writing the same file.
pub struct RerankCache {
    path: Option<PathBuf>,
    ttl: Duration,
    entries: HashMap<String, RerankCacheEntry>,
    /// Expired entries dropped in memory but still in the snapshot
    unsaved_evictions: usize,
}

impl RerankCache {
    /// Load the snapshot at `path`, starting empty if it is missing or unreadable
    pub fn open(path: &Path, ttl: std::time::Duration) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1));
        let mut entries = load_entries(path);

        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.timestamp <= ttl);
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(dropped, "dropped expired rerank cache entries");
        }

        Self {
            path: Some(path.to_path_buf()),
            ttl,
            entries,
            unsaved_evictions: dropped,
        }
    }

    /// A cache that is never written to disk
    #[cfg(test)]
    pub fn in_memory(ttl: std::time::Duration) -> Self {
        Self {
            path: None,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1)),
            entries: HashMap::new(),
            unsaved_evictions: 0,
        }
    }

    pub fn get(&mut self, query: &str, doc: &str) -> Option<f64> {
        self.get_at(query, doc, Utc::now())
    }

    /// Look up a score as of `now`. Expired entries count as a miss and are evicted.
    pub fn get_at(&mut self, query: &str, doc: &str, now: DateTime<Utc>) -> Option<f64> {
        let key = cache_key(query, doc);
        let entry = self.entries.get(&key)?;

        if now - entry.timestamp > self.ttl {
            self.entries.remove(&key);
            self.unsaved_evictions += 1;
            return None;
        }

        Some(entry.score)
    }

    pub fn put(&mut self, query: &str, doc: &str, score: f64, model: &str) -> Result<()> {
        self.put_at(query, doc, score, model, Utc::now())
    }

    /// Insert or refresh a score and rewrite the snapshot
    pub fn put_at(
        &mut self,
        query: &str,
        doc: &str,
        score: f64,
        model: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.entries.insert(
            cache_key(query, doc),
            RerankCacheEntry {
                query: truncate_chars(query, KEY_PREFIX_CHARS).to_string(),
                document_text: truncate_chars(doc, KEY_PREFIX_CHARS).to_string(),
                score,
                timestamp: now,
                model: model.to_string(),
            },
        );
        self.save()
    }

    /// Number of entries held, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry older than the TTL and rewrite the snapshot.
    ///
    /// Returns how many expired entries left the snapshot, counting the ones
    /// already dropped on open or on lookup.
    pub fn purge_expired(&mut self) -> Result<usize> {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.timestamp <= ttl);

        let removed = before - self.entries.len() + self.unsaved_evictions;
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.save()
    }

    fn save(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let snapshot = CacheFileRef {
            entries: &self.entries,
            version: CACHE_VERSION,
        };
        fs::write(path, serde_json::to_vec(&snapshot)?)?;
        self.unsaved_evictions = 0;
        Ok(())
    }
}

fn load_entries(path: &Path) -> HashMap<String, RerankCacheEntry> {
    let Ok(content) = fs::read_to_string(path) else {
        return HashMap::new();
    };

    match serde_json::from_str::<CacheFile>(&content) {
        Ok(file) if file.version == CACHE_VERSION => file.entries,
        Ok(file) => {
            warn!(version = file.version, "unknown rerank cache version, starting empty");
            HashMap::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt rerank cache, starting empty");
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: std::time::Duration = std::time::Duration::from_secs(3600);

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = RerankCache::in_memory(HOUR);
        let t = Utc::now();
        cache.put_at("query", "doc", 0.7, "lite", t).unwrap();

        assert_eq!(cache.get_at("query", "doc", t + Duration::minutes(59)), Some(0.7));
        assert_eq!(cache.get_at("query", "doc", t + Duration::minutes(61)), None);
        // The expired entry was evicted
        assert!(cache.is_empty());
    }

    #[test]
    fn put_refreshes_existing_entry() {
        let mut cache = RerankCache::in_memory(HOUR);
        let t = Utc::now();
        cache.put_at("q", "d", 0.1, "lite", t).unwrap();
        cache.put_at("q", "d", 0.9, "lite", t + Duration::minutes(50)).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("q", "d", t + Duration::minutes(100)), Some(0.9));
    }

    #[test]
    fn key_ignores_text_past_prefix() {
        let base = "x".repeat(KEY_PREFIX_CHARS);
        let a = format!("{}aaa", base);
        let b = format!("{}bbb", base);
        assert_eq!(cache_key("q", &a), cache_key("q", &b));

        // Length still participates
        assert_ne!(cache_key("q", &a), cache_key("q", &format!("{}b", base)));
        assert_ne!(cache_key("q1", "doc"), cache_key("q2", "doc"));
    }

    #[test]
    fn snapshot_round_trips_and_drops_expired_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rerank_cache.json");

        let mut cache = RerankCache::open(&path, HOUR);
        cache.put("fresh", "doc", 0.4, "lite").unwrap();
        cache
            .put_at("stale", "doc", 0.6, "lite", Utc::now() - Duration::hours(2))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        let entry = &raw["entries"][cache_key("fresh", "doc")];
        assert_eq!(entry["documentText"], "doc");
        assert_eq!(entry["model"], "lite");

        let mut reloaded = RerankCache::open(&path, HOUR);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("fresh", "doc"), Some(0.4));
    }

    #[test]
    fn purge_rewrites_entries_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rerank_cache.json");

        let mut cache = RerankCache::open(&path, HOUR);
        cache.put("fresh", "doc", 0.4, "lite").unwrap();
        cache
            .put_at("stale", "doc", 0.6, "lite", Utc::now() - Duration::hours(2))
            .unwrap();

        let mut reopened = RerankCache::open(&path, HOUR);
        assert_eq!(reopened.purge_expired().unwrap(), 1);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let on_disk = raw["entries"].as_object().unwrap();
        assert_eq!(on_disk.len(), 1);
        assert!(on_disk.contains_key(&cache_key("fresh", "doc")));

        // Nothing left to purge once the snapshot is rewritten
        assert_eq!(reopened.purge_expired().unwrap(), 0);
    }

    #[test]
    fn purge_counts_entries_evicted_by_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rerank_cache.json");
        let t = Utc::now();

        let mut cache = RerankCache::open(&path, HOUR);
        cache.put_at("q", "d", 0.3, "lite", t).unwrap();
        cache.put_at("q", "e", 0.5, "lite", t).unwrap();

        let later = t + Duration::minutes(90);
        assert_eq!(cache.get_at("q", "d", later), None);
        assert_eq!(cache.purge_expired_at(later).unwrap(), 2);
        assert!(RerankCache::open(&path, HOUR).is_empty());
    }

    #[test]
    fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rerank_cache.json");
        fs::write(&path, "{not json").unwrap();

        let mut cache = RerankCache::open(&path, HOUR);
        assert!(cache.is_empty());

        cache.put("q", "d", 0.5, "lite").unwrap();
        assert_eq!(RerankCache::open(&path, HOUR).len(), 1);
    }

    #[test]
    fn clear_empties_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rerank_cache.json");

        let mut cache = RerankCache::open(&path, HOUR);
        cache.put("q", "d", 0.5, "lite").unwrap();
        cache.clear().unwrap();

        assert!(RerankCache::open(&path, HOUR).is_empty());
    }
}
