use regex::Regex;
use std::sync::OnceLock;

/// Minimum trimmed length for a paragraph to count as a chunk
pub const MIN_CHUNK_CHARS: usize = 10;

/// Return at most `max_chars` characters of `text`, on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Lowercased whitespace-separated terms longer than one character
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

fn paragraph_break() -> &'static Regex {
    static BREAK: OnceLock<Regex> = OnceLock::new();
    BREAK.get_or_init(|| Regex::new(r"\n\s*\n").expect("paragraph regex is valid"))
}

/// Split a document into blank-line separated paragraphs, dropping short ones
pub fn paragraphs(text: &str) -> Vec<&str> {
    paragraph_break()
        .split(text)
        .map(str::trim)
        .filter(|p| p.chars().count() >= MIN_CHUNK_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn terms_are_lowercase_and_skip_single_chars() {
        assert_eq!(query_terms("Deploy a  PIPELINE x"), vec!["deploy", "pipeline"]);
        assert!(query_terms("   ").is_empty());
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let doc = "First paragraph here.\n\n  \nshort\n\nSecond paragraph\nspans lines.";
        assert_eq!(
            paragraphs(doc),
            vec!["First paragraph here.", "Second paragraph\nspans lines."]
        );
    }
}
