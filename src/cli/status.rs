use crate::embeddings::EmbedError;
use crate::error::Result;
use crate::memory::Memories;

/// Run the status command
pub async fn run_status() -> Result<()> {
    let mem = Memories::open()?;

    println!("Store: {}", mem.grove_path().display());

    let provider = mem.provider_model().unwrap_or("none").to_string();
    match mem.check_provider().await {
        Ok(()) => println!("Embedding provider: {} (ok)", provider),
        Err(EmbedError::NotConfigured) => {
            println!("Embedding provider: {} (not configured, keyword search only)", provider)
        }
        Err(e) => println!("Embedding provider: {} ({})", provider, e),
    }

    let reranker = mem.reranker();
    let model = reranker.model_id().unwrap_or("none");
    if reranker.is_available().await {
        println!("Rerank model: {} (ok)", model);
    } else {
        println!("Rerank model: {} (unavailable, retrieval order kept)", model);
    }

    Ok(())
}

/// Run the cache stats command
pub fn run_cache_stats() -> Result<()> {
    let mem = Memories::open()?;
    let (cached, empty) = mem.reranker().with_cache(|c| (c.len(), c.is_empty()));

    if empty {
        println!("Rerank cache is empty.");
    } else {
        println!("Cached rerank scores: {}", cached);
    }
    Ok(())
}

/// Run the cache purge command
pub fn run_cache_purge() -> Result<()> {
    let mem = Memories::open()?;
    let purged = mem.reranker().with_cache(|c| c.purge_expired())?;

    println!("Purged {} expired scores", purged);
    Ok(())
}

/// Run the cache clear command
pub fn run_cache_clear() -> Result<()> {
    let mem = Memories::open()?;
    mem.reranker().with_cache(|c| c.clear())?;

    println!("Cleared rerank cache");
    Ok(())
}
