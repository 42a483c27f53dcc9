use crate::embeddings::cosine_similarity;
use crate::types::Memory;
use rusqlite::{params, Connection, Result, Row};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    content TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'memory',
    embedding BLOB,
    model TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_source ON memories(source);
"#;

const MEMORY_COLUMNS: &str = "id, source, content, kind, created_at";

/// Metadata carried by every index entry
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMetadata {
    pub source: String,
    pub text: String,
    pub kind: String,
    pub timestamp: String,
}

impl MemoryMetadata {
    pub fn now(source: &str, text: &str, kind: &str) -> Self {
        Self {
            source: source.to_string(),
            text: text.to_string(),
            kind: kind.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A nearest-neighbour match
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub score: f64,
    pub metadata: MemoryMetadata,
}

/// Memory store and vector index backed by SQLite
pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    /// Open or create the memory database
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn memory_from_row(row: &Row<'_>) -> Result<Memory> {
        Ok(Memory {
            id: row.get(0)?,
            source: row.get(1)?,
            content: row.get(2)?,
            kind: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    /// Insert an entry, with its vector when one was computed. Returns the ID.
    pub fn insert(&self, vector: Option<(&[f32], &str)>, metadata: &MemoryMetadata) -> Result<i64> {
        let (embedding, model) = match vector {
            Some((v, model)) => (Some(Self::serialize_embedding(v)), Some(model)),
            None => (None, None),
        };

        self.conn.execute(
            "INSERT INTO memories (source, content, kind, embedding, model, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                metadata.source,
                metadata.text,
                metadata.kind,
                embedding,
                model,
                metadata.timestamp
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Top `k` entries by cosine similarity to `vector`.
    ///
    /// Only entries embedded by `model` with a matching dimension are compared.
    pub fn query(&self, vector: &[f32], model: &str, k: usize) -> Result<Vec<IndexHit>> {
        let mut stmt = self.conn.prepare(
            "SELECT source, content, kind, created_at, embedding FROM memories
             WHERE embedding IS NOT NULL AND model = ?1",
        )?;

        let mut hits = Vec::new();
        let mut rows = stmt.query(params![model])?;

        while let Some(row) = rows.next()? {
            let bytes: Vec<u8> = row.get(4)?;
            let embedding = Self::deserialize_embedding(&bytes);
            if embedding.len() != vector.len() {
                continue;
            }

            hits.push(IndexHit {
                score: cosine_similarity(vector, &embedding),
                metadata: MemoryMetadata {
                    source: row.get(0)?,
                    text: row.get(1)?,
                    kind: row.get(2)?,
                    timestamp: row.get(3)?,
                },
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    /// Every stored (source, content) pair, oldest first
    pub fn documents(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source, content FROM memories ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }

    /// Get a memory by ID
    pub fn get(&self, id: i64) -> Result<Option<Memory>> {
        let sql = format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(Self::memory_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// List recent memories, optionally of one kind
    pub fn list(&self, kind: Option<&str>, limit: usize) -> Result<Vec<Memory>> {
        let sql = format!(
            "SELECT {} FROM memories WHERE (?1 IS NULL OR kind = ?1) ORDER BY id DESC LIMIT ?2",
            MEMORY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![kind, limit as i64], Self::memory_from_row)?;
        rows.collect()
    }

    /// Delete a memory
    pub fn delete(&self, id: i64) -> Result<bool> {
        let count = self.conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    /// Delete every entry from a source, returns how many were removed
    pub fn delete_source(&self, source: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM memories WHERE source = ?1", params![source])
    }

    /// Get count of memories
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Count of memories that carry a vector
    pub fn embedded_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Memory counts per kind, largest first
    pub fn counts_by_kind(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, COUNT(*) as count FROM memories GROUP BY kind ORDER BY count DESC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as usize)))?;
        rows.collect()
    }
}
