use crate::config::GroveConfig;
use crate::error::{Error, Result};
use crate::memory::Memories;
use crate::patterns::trace::SessionTrace;
use crate::patterns::{Observation, ToolSequence};
use std::fs;
use std::io::{self, Read};

/// Run the observe command
pub fn run_observe(tools: &[String], prompt: &str, transcript: Option<&str>) -> Result<()> {
    let mem = Memories::open()?;
    let threshold = GroveConfig::new(mem.grove_path().to_path_buf()).crystallize_min_count();
    let mut detector = mem.pattern_detector();

    let observation = match transcript {
        Some(path) => {
            let text = if path == "-" {
                let mut buf = String::new();
                io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                fs::read_to_string(path)?
            };

            let trace = SessionTrace::from_jsonl(&text);
            if trace.skipped > 0 {
                eprintln!("Skipped {} unreadable lines", trace.skipped);
            }
            detector.observe_session(&trace)
        }
        None if tools.is_empty() => {
            return Err(Error::Invalid("Give tool names or --transcript".to_string()));
        }
        None => detector.observe(tools, prompt),
    };

    match observation {
        Some(obs) => print_observation(&obs, threshold),
        None => println!("No pattern (needs at least two distinct tools)."),
    }

    Ok(())
}

/// Run the patterns command
pub fn run_patterns(min_count: Option<u32>, json: bool) -> Result<()> {
    let mem = Memories::open()?;
    let min_count = match min_count {
        Some(n) => n,
        None => GroveConfig::new(mem.grove_path().to_path_buf()).crystallize_min_count(),
    };

    let detector = mem.pattern_detector();
    let candidates = detector.crystallization_candidates(min_count);

    if json {
        let out: Vec<_> = candidates
            .iter()
            .map(|seq| serde_json::json!({ "signature": seq.signature, "sequence": seq }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let store = detector.store();
    if store.is_empty() {
        println!("No workflow patterns observed yet.");
        return Ok(());
    }

    if candidates.is_empty() {
        println!(
            "No patterns seen {} or more times ({} tracked over {} sessions).",
            min_count,
            store.len(),
            store.sessions_analyzed()
        );
        return Ok(());
    }

    println!("Patterns seen at least {} times:", min_count);
    if let Some(updated) = store.last_updated() {
        println!("(last session {})", updated.format("%Y-%m-%d %H:%M"));
    }
    println!();
    for seq in &candidates {
        print_sequence(seq);
    }

    Ok(())
}

fn print_observation(obs: &Observation, threshold: u32) {
    let seq = &obs.sequence;
    if obs.is_new {
        println!("New pattern: {}", seq.signature);
    } else {
        println!("Seen {} ({} times)", seq.signature, seq.count);
    }

    if seq.count == threshold {
        println!("  Ready to crystallize. See: grove patterns");
    }
}

fn print_sequence(seq: &ToolSequence) {
    println!("{:4}x {}", seq.count, seq.signature);
    println!("      last seen: {}", seq.last_seen.format("%Y-%m-%d %H:%M"));
    if !seq.example_prompt.is_empty() {
        println!("      e.g. {}", seq.example_prompt.replace('\n', " "));
    }
    println!();
}
