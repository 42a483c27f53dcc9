use crate::error::{Error, Result};
use crate::memory::Memories;
use crate::text::truncate_chars;
use crate::types::{Memory, SearchHit, SearchOptions};
use std::io::{self, Write};
use std::path::Path;

const PREVIEW_CHARS: usize = 200;

/// Run the init command
pub fn run_init(path: &str) -> Result<()> {
    let path = Path::new(path);
    let grove_path = path.join(".grove");

    if grove_path.exists() {
        return Err(Error::Invalid(format!(
            ".grove already exists at {}",
            grove_path.display()
        )));
    }

    let mem = Memories::init(path)?;
    println!("Initialized .grove at {}", mem.grove_path().display());

    Ok(())
}

/// Run the remember command
pub async fn run_remember(content: &str, source: &str) -> Result<()> {
    let mem = Memories::open()?;
    let id = mem.remember(content, source).await?;

    println!("Remembered [{}]", id);
    Ok(())
}

/// Run the ingest command
pub async fn run_ingest(dir: &str) -> Result<()> {
    let mem = Memories::open()?;
    let report = mem.ingest(Path::new(dir)).await?;

    println!(
        "Ingested {} paragraphs from {} files ({} embedded)",
        report.chunks, report.files, report.embedded
    );
    Ok(())
}

/// Run the search command
pub async fn run_search(query: &str, limit: usize, rerank: bool, json: bool, explain: bool) -> Result<()> {
    let mem = Memories::open()?;
    let options = SearchOptions { rerank };

    if !explain {
        let hits = mem.search(query, limit, options).await;
        if json {
            println!("{}", serde_json::to_string_pretty(&hits)?);
        } else {
            print_hits(&hits);
        }
        return Ok(());
    }

    let outcome = mem.search_traced(query, limit, options).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.hits)?);
        return Ok(());
    }

    match &outcome.retrieval_fallback {
        Some(reason) => println!("retrieval: keyword ({})", reason),
        None => println!("retrieval: vector"),
    }
    if rerank {
        match &outcome.rerank_fallback {
            Some(reason) => println!("rerank: skipped ({})", reason),
            None => println!("rerank: {}", mem.reranker().model_id().unwrap_or("-")),
        }
    }
    println!();

    print_hits(&outcome.hits);
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No matching memories.");
        return;
    }

    for hit in hits {
        print_hit(hit);
    }
}

/// Run the score command
pub async fn run_score(query: &str, document: &str) -> Result<()> {
    let mem = Memories::open()?;
    let reranker = mem.reranker();

    match reranker.score(query, document).await {
        Ok(score) => {
            println!("{:.3}", score);
            Ok(())
        }
        Err(reason) => Err(Error::Invalid(format!(
            "Cannot score with {}: {}",
            reranker.model_id().unwrap_or("no model"),
            reason
        ))),
    }
}

/// Run the list command
pub fn run_list(kind: Option<&str>, limit: usize) -> Result<()> {
    let mem = Memories::open()?;
    let memories = mem.list(kind, limit)?;

    if memories.is_empty() {
        println!("No memories yet. Add one with: grove remember \"...\"");
        return Ok(());
    }

    for m in &memories {
        print_memory(m);
    }

    Ok(())
}

/// Run the forget command
pub fn run_forget(id: i64, force: bool) -> Result<()> {
    let mem = Memories::open()?;

    let memory = mem
        .get(id)?
        .ok_or_else(|| Error::Invalid(format!("Memory not found: {}", id)))?;

    if !force {
        println!("Forget [{}]:", id);
        println!("  {}", truncate_chars(&memory.content, 100));

        print!("Confirm? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    mem.forget(id)?;
    println!("Forgotten [{}]", id);

    Ok(())
}

/// Run the stats command
pub fn run_stats() -> Result<()> {
    let mem = Memories::open()?;
    let stats = mem.stats()?;

    println!("Memory Statistics");
    println!("=================\n");

    println!("Total memories: {}", stats.total_memories);
    println!("Embedded:       {}", stats.embedded_memories);
    println!("Cached scores:  {}", stats.cached_scores);

    if !stats.by_kind.is_empty() {
        println!("\nBy kind:");
        let mut kinds: Vec<_> = stats.by_kind.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (kind, count) in kinds {
            println!("  {:20} {}", kind, count);
        }
    }

    Ok(())
}

fn preview(text: &str) -> String {
    let cut = truncate_chars(text, PREVIEW_CHARS);
    let preview = if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        cut.to_string()
    };
    preview.replace('\n', " ")
}

fn print_memory(m: &Memory) {
    println!("[{}] {} ({}, {})", m.id, m.source, m.kind, m.created_at);
    println!("    {}\n", preview(&m.content));
}

fn print_hit(hit: &SearchHit) {
    let item = hit.item();
    match hit {
        SearchHit::Retrieved(_) => {
            println!("{:.3} {} [{}]", item.score, item.source, item.method);
        }
        SearchHit::Reranked(r) => {
            println!(
                "{:.3} {} [{}] retrieval: {:.3}, rerank: {:.3}",
                r.combined_score, item.source, item.method, item.score, r.rerank_score
            );
        }
    }
    println!("    {}\n", preview(&item.text));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_and_flattens() {
        assert_eq!(preview("one\ntwo"), "one two");

        let long = "x".repeat(PREVIEW_CHARS + 5);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }
}
