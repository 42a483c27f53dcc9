//! Workflow pattern detection.
//!
//! Every finished session contributes its tool-call sequence. Consecutive
//! repeats collapse into one step, the steps join into a signature, and
//! signatures seen often enough become crystallization candidates.

pub mod trace;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::text::truncate_chars;
use trace::SessionTrace;

/// Joins collapsed tool names into a signature
pub const SIGNATURE_SEPARATOR: &str = "→";

/// Longest example prompt kept with a sequence
pub const MAX_PROMPT_CHARS: usize = 200;

/// Statistics for one distinct tool sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSequence {
    /// Map key in the persisted file
    #[serde(skip)]
    pub signature: String,
    pub tools: Vec<String>,
    pub count: u32,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub example_prompt: String,
}

/// Result of observing a sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub sequence: ToolSequence,
    pub is_new: bool,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatternFile {
    #[serde(default)]
    sequences: BTreeMap<String, ToolSequence>,
    #[serde(default)]
    sessions_analyzed: u64,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PatternFileRef<'a> {
    sequences: &'a BTreeMap<String, ToolSequence>,
    sessions_analyzed: u64,
    last_updated: Option<DateTime<Utc>>,
}

/// Signature -> statistics, persisted as JSON after every change
#[derive(Debug)]
pub struct PatternStore {
    path: Option<PathBuf>,
    sequences: BTreeMap<String, ToolSequence>,
    sessions_analyzed: u64,
    last_updated: Option<DateTime<Utc>>,
}

impl PatternStore {
    /// Load the store at `path`, starting empty if it is missing or unreadable
    pub fn open(path: &Path) -> Self {
        let file = load_file(path);
        let mut sequences = file.sequences;
        for (signature, sequence) in sequences.iter_mut() {
            sequence.signature = signature.clone();
        }

        Self {
            path: Some(path.to_path_buf()),
            sequences,
            sessions_analyzed: file.sessions_analyzed,
            last_updated: file.last_updated,
        }
    }

    /// A store that is never written to disk
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            sequences: BTreeMap::new(),
            sessions_analyzed: 0,
            last_updated: None,
        }
    }

    #[cfg(test)]
    pub fn get(&self, signature: &str) -> Option<&ToolSequence> {
        self.sequences.get(signature)
    }

    pub fn sequences(&self) -> impl Iterator<Item = &ToolSequence> {
        self.sequences.values()
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn sessions_analyzed(&self) -> u64 {
        self.sessions_analyzed
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Insert or bump a signature. Returns the updated record and whether it was new.
    fn record(&mut self, tools: Vec<String>, signature: String, prompt: &str, now: DateTime<Utc>) -> Observation {
        let prompt = truncate_chars(prompt.trim(), MAX_PROMPT_CHARS).to_string();
        let is_new = !self.sequences.contains_key(&signature);

        let sequence = self
            .sequences
            .entry(signature.clone())
            .and_modify(|seq| {
                seq.count += 1;
                seq.last_seen = now;
                seq.example_prompt = prompt.clone();
            })
            .or_insert_with(|| ToolSequence {
                signature,
                tools,
                count: 1,
                last_seen: now,
                example_prompt: prompt.clone(),
            })
            .clone();

        self.sessions_analyzed += 1;
        self.last_updated = Some(now);

        Observation { sequence, is_new }
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let snapshot = PatternFileRef {
            sequences: &self.sequences,
            sessions_analyzed: self.sessions_analyzed,
            last_updated: self.last_updated,
        };
        fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(())
    }
}

fn load_file(path: &Path) -> PatternFile {
    let Ok(content) = fs::read_to_string(path) else {
        return PatternFile::default();
    };

    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "corrupt pattern store, starting empty");
        PatternFile::default()
    })
}

/// Drop consecutive repeats: `[read, read, edit]` becomes `[read, edit]`.
/// Blank names are ignored.
pub fn collapse<S: AsRef<str>>(tools: &[S]) -> Vec<String> {
    let mut collapsed: Vec<String> = Vec::new();
    for tool in tools {
        let tool = tool.as_ref().trim();
        if tool.is_empty() {
            continue;
        }
        if collapsed.last().map(String::as_str) != Some(tool) {
            collapsed.push(tool.to_string());
        }
    }
    collapsed
}

/// Canonical signature of a collapsed sequence, or `None` when fewer than
/// two distinct tools remain
pub fn signature(collapsed: &[String]) -> Option<String> {
    let first = collapsed.first()?;
    if collapsed.iter().all(|t| t == first) {
        return None;
    }
    Some(collapsed.join(SIGNATURE_SEPARATOR))
}

/// Counts tool sequences and reports the ones worth crystallizing
pub struct PatternDetector {
    store: PatternStore,
}

impl PatternDetector {
    pub fn new(store: PatternStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &PatternStore {
        &self.store
    }

    /// Record one session's tool sequence.
    ///
    /// Returns `None`, leaving the store untouched, when the sequence does not
    /// form a pattern.
    pub fn observe<S: AsRef<str>>(&mut self, tools: &[S], example_prompt: &str) -> Option<Observation> {
        self.observe_at(tools, example_prompt, Utc::now())
    }

    pub fn observe_at<S: AsRef<str>>(
        &mut self,
        tools: &[S],
        example_prompt: &str,
        now: DateTime<Utc>,
    ) -> Option<Observation> {
        let collapsed = collapse(tools);
        let Some(signature) = signature(&collapsed) else {
            debug!(steps = collapsed.len(), "sequence too short to be a pattern");
            return None;
        };

        let observation = self.store.record(collapsed, signature, example_prompt, now);
        if observation.is_new {
            info!(signature = %observation.sequence.signature, "new workflow pattern");
        } else {
            debug!(
                signature = %observation.sequence.signature,
                count = observation.sequence.count,
                "repeated workflow pattern"
            );
        }

        if let Err(e) = self.store.save() {
            warn!(error = %e, "failed to persist pattern store");
        }

        Some(observation)
    }

    /// Observe the tool calls of a parsed session, using its first user
    /// message as the example prompt
    pub fn observe_session(&mut self, trace: &SessionTrace) -> Option<Observation> {
        let tools = trace.tool_sequence();
        let prompt = trace.first_prompt().unwrap_or_default();
        self.observe(tools.as_slice(), &prompt)
    }

    /// Sequences seen at least `min_count` times, most frequent first
    pub fn crystallization_candidates(&self, min_count: u32) -> Vec<ToolSequence> {
        let mut candidates: Vec<ToolSequence> = self
            .store
            .sequences()
            .filter(|seq| seq.count >= min_count)
            .cloned()
            .collect();

        // Store iterates in signature order, so ties stay alphabetical
        candidates.sort_by(|a, b| b.count.cmp(&a.count));
        candidates
    }
}
