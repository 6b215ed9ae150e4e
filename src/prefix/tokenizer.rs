//! Language-agnostic tokenization for the completion trigger.
//!
//! CJK text is segmented with jieba; Latin text falls out of the same
//! pass as whitespace- and punctuation-delimited words.

use jieba_rs::Jieba;
use once_cell::sync::Lazy;

static JIEBA: Lazy<Jieba> = Lazy::new(Jieba::new);

/// Segment a query into tokens, dropping whitespace-only pieces
pub fn segment(text: &str) -> Vec<String> {
    JIEBA
        .cut(text.trim(), false)
        .into_iter()
        .filter(|token| !token.trim().is_empty())
        .map(|token| token.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_cjk() {
        let tokens = segment("帮我查询一下今年北京的销");
        assert!(tokens.len() >= 5);
        assert_eq!(tokens.last().map(String::as_str), Some("销"));
    }

    #[test]
    fn test_segments_latin() {
        let tokens = segment("show me revenue for bei");
        assert_eq!(tokens, vec!["show", "me", "revenue", "for", "bei"]);
    }

    #[test]
    fn test_whitespace_tokens_dropped() {
        let tokens = segment("  销售额   趋势  ");
        assert!(tokens.iter().all(|t| !t.trim().is_empty()));
    }
}
