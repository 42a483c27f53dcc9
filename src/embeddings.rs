use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::config::{resolve_model, MODEL_TYPE_LITE, MODEL_TYPE_NONE};

/// Embedding dimension for lite embedder
const LITE_DIM: usize = 384;

/// Largest response accepted from the embedding server
const MAX_RESPONSE_BYTES: u64 = 8 * 1024 * 1024;

/// Why an embedding could not be produced
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbedError {
    /// No provider is set up. Callers treat this as an expected condition.
    #[error("no embedding provider configured")]
    NotConfigured,

    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

/// Trait for embedding implementations
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier stored alongside cached scores
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Check that the model can be loaded and used
    async fn probe(&self) -> Result<(), EmbedError> {
        Ok(())
    }
}

// =============================================================================
// LiteEmbedder - N-gram hashing
// =============================================================================

/// Lightweight embedder using character n-gram hashing
pub struct LiteEmbedder {
    dim: usize,
}

impl Default for LiteEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiteEmbedder {
    pub fn new() -> Self {
        Self { dim: LITE_DIM }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        let text = text.trim();
        let mut vector = vec![0.0f32; self.dim];

        // Character trigrams
        let chars: Vec<char> = text.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            vector[self.bucket(&trigram)] += 1.0;
        }

        // Word unigrams weigh more than trigrams
        for word in text.split_whitespace() {
            vector[self.bucket(word)] += 2.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }

    fn bucket(&self, token: &str) -> usize {
        (md5_hash(token) % self.dim as u128) as usize
    }
}

#[async_trait]
impl Embedder for LiteEmbedder {
    fn model_id(&self) -> &str {
        "lite"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_sync(text))
    }
}

/// Compute MD5 hash and return as u128
fn md5_hash(text: &str) -> u128 {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    u128::from_be_bytes(result.into())
}

// =============================================================================
// ServerEmbedder - Unix socket client for the embedding daemon
// =============================================================================

#[derive(Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum ServerRequest<'a> {
    Ping,
    Embed { text: &'a str },
    EmbedBatch { texts: &'a [&'a str] },
}

#[derive(Deserialize)]
struct ServerResponse {
    ok: bool,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    error: Option<String>,
}

impl ServerResponse {
    fn into_result(self) -> Result<Self, EmbedError> {
        if self.ok {
            Ok(self)
        } else {
            Err(EmbedError::Failed(
                self.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}

/// Embedder that talks to the embedding server daemon
pub struct ServerEmbedder {
    socket: PathBuf,
    model: String,
    timeout: Duration,
}

impl ServerEmbedder {
    pub fn new(socket: PathBuf, model: String, timeout: Duration) -> Self {
        Self {
            socket,
            model,
            timeout,
        }
    }

    /// Ping the server and get the model it serves
    pub async fn ping(&self) -> Result<String, EmbedError> {
        let response = self.send(&ServerRequest::Ping).await?;
        Ok(response.model.unwrap_or_default())
    }

    async fn send(&self, request: &ServerRequest<'_>) -> Result<ServerResponse, EmbedError> {
        if !self.socket.exists() {
            return Err(EmbedError::NotConfigured);
        }

        match tokio::time::timeout(self.timeout, send_request(&self.socket, request)).await {
            Ok(result) => result?.into_result(),
            Err(_) => Err(EmbedError::Unavailable(format!(
                "no response within {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl Embedder for ServerEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.send(&ServerRequest::Embed { text })
            .await?
            .embedding
            .ok_or_else(|| EmbedError::Failed("No embedding in response".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.send(&ServerRequest::EmbedBatch { texts })
            .await?
            .embeddings
            .ok_or_else(|| EmbedError::Failed("No embeddings in response".to_string()))
    }

    async fn probe(&self) -> Result<(), EmbedError> {
        let served = self.ping().await?;
        if served != self.model {
            return Err(EmbedError::Unavailable(format!(
                "server runs {}, wanted {}",
                served, self.model
            )));
        }
        Ok(())
    }
}

/// Send a request to the embedding server and parse the response
async fn send_request(socket: &Path, request: &ServerRequest<'_>) -> Result<ServerResponse, EmbedError> {
    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|e| EmbedError::Unavailable(format!("Failed to connect to server: {}", e)))?;

    let json = serde_json::to_vec(request)
        .map_err(|e| EmbedError::Failed(format!("Failed to serialize: {}", e)))?;
    stream
        .write_all(&json)
        .await
        .map_err(|e| EmbedError::Unavailable(format!("Failed to send: {}", e)))?;

    // Closing the write half marks the end of the request
    stream
        .shutdown()
        .await
        .map_err(|e| EmbedError::Unavailable(format!("Failed to shutdown write: {}", e)))?;

    let mut buffer = Vec::new();
    stream
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut buffer)
        .await
        .map_err(|e| EmbedError::Unavailable(format!("Failed to read response: {}", e)))?;

    serde_json::from_slice(&buffer)
        .map_err(|e| EmbedError::Failed(format!("Failed to parse response: {}", e)))
}

// =============================================================================
// Cosine similarity
// =============================================================================

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(vec_a: &[f32], vec_b: &[f32]) -> f64 {
    if vec_a.len() != vec_b.len() {
        return 0.0;
    }

    let dot: f32 = vec_a.iter().zip(vec_b.iter()).map(|(a, b)| a * b).sum();
    let norm_a: f32 = vec_a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = vec_b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

// =============================================================================
// Embedder factory
// =============================================================================

/// Build the embedder for a model alias. `None` means no provider is configured.
pub fn embedder_for(model: &str, socket: &Path, timeout: Duration) -> Option<Arc<dyn Embedder>> {
    let (model_name, model_type) = resolve_model(model);

    match model_type.as_str() {
        MODEL_TYPE_NONE => None,
        MODEL_TYPE_LITE => Some(Arc::new(LiteEmbedder::new())),
        _ => Some(Arc::new(ServerEmbedder::new(
            socket.to_path_buf(),
            model_name,
            timeout,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lite_embeddings_are_unit_vectors() {
        let embedder = LiteEmbedder::new();
        let embedding = embedder.embed("hello world").await.unwrap();

        assert_eq!(embedding.len(), LITE_DIM);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn cosine_of_identical_and_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn similar_texts_score_higher() {
        let embedder = LiteEmbedder::new();

        let a = embedder.embed("the quick brown fox").await.unwrap();
        let b = embedder.embed("the quick brown dog").await.unwrap();
        let c = embedder.embed("completely different text").await.unwrap();

        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn missing_socket_means_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = ServerEmbedder::new(
            dir.path().join("absent.sock"),
            "BAAI/bge-base-en-v1.5".into(),
            Duration::from_secs(1),
        );

        assert_eq!(embedder.embed("x").await, Err(EmbedError::NotConfigured));
        assert_eq!(embedder.probe().await, Err(EmbedError::NotConfigured));
    }

    #[test]
    fn factory_maps_aliases() {
        let socket = Path::new("/tmp/unused.sock");
        let timeout = Duration::from_secs(1);

        assert!(embedder_for("none", socket, timeout).is_none());
        assert_eq!(embedder_for("lite", socket, timeout).unwrap().model_id(), "lite");
        assert_eq!(
            embedder_for("bge-small", socket, timeout).unwrap().model_id(),
            "BAAI/bge-small-en-v1.5"
        );
    }
}
