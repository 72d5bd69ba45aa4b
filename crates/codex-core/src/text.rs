//! Searchable text extraction and word tokenization
//!
//! Cell values arrive with editor markup (HTML spans, footnote markers).
//! The index stores the raw value alongside a plain-text projection that
//! feeds FTS and the word table.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"))
}

/// Strip markup from a cell value, decode common entities, and collapse whitespace
pub fn searchable_text(value: &str) -> String {
    let without_tags = tag_pattern().replace_all(value, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cased word tokens in document order
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

/// Number of words in `text`
pub fn word_count(text: &str) -> i64 {
    text.unicode_words().count() as i64
}

/// One row of the word index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordToken {
    pub word: String,
    /// 0-based ordinal within the cell
    pub position: i64,
    /// Occurrences of `word` within the same cell
    pub frequency: i64,
}

/// Tokenize `text` into word-index rows
pub fn word_tokens(text: &str) -> Vec<WordToken> {
    let words = tokenize(text);

    let mut counts: HashMap<&str, i64> = HashMap::new();
    for w in &words {
        *counts.entry(w.as_str()).or_insert(0) += 1;
    }

    words
        .iter()
        .enumerate()
        .map(|(i, w)| WordToken {
            word: w.clone(),
            position: i as i64,
            frequency: counts.get(w.as_str()).copied().unwrap_or(1),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchable_text_strips_markup() {
        let raw = "<span class=\"verse\">In the <b>beginning</b></span>&nbsp;God";
        assert_eq!(searchable_text(raw), "In the beginning God");
    }

    #[test]
    fn test_searchable_text_decodes_entities() {
        assert_eq!(searchable_text("a &amp; b &lt;c&gt;"), "a & b <c>");
    }

    #[test]
    fn test_word_count_multiscript() {
        assert_eq!(word_count("בְּרֵאשִׁית בָּרָא"), 2);
        assert_eq!(word_count("φωνὴ βοῶντος"), 2);
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("In the beginning God created the heavens and the earth."), 10);
    }

    #[test]
    fn test_word_tokens_positions_and_frequency() {
        let tokens = word_tokens("The cat saw the dog");
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0].word, "the");
        assert_eq!(tokens[0].frequency, 2);
        assert_eq!(tokens[3].position, 3);
        assert_eq!(tokens[4].word, "dog");
        assert_eq!(tokens[4].frequency, 1);
    }
}
