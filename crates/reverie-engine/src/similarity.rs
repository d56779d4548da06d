//! Lexical similarity between short texts

use std::collections::HashSet;

fn terms(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .filter(|w| w.len() > 3) // skip short words
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Jaccard overlap of significant terms, 0.0-1.0.
pub fn jaccard(text_a: &str, text_b: &str) -> f64 {
    let words_a = terms(text_a);
    let words_b = terms(text_b);

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_score_one() {
        assert_eq!(jaccard("Kindness compounds over time", "kindness compounds over time."), 1.0);
    }

    #[test]
    fn short_words_ignored() {
        assert_eq!(jaccard("a an the of", "a an the of"), 0.0);
    }

    #[test]
    fn partial_overlap() {
        let s = jaccard("truth requires doubt", "doubt requires courage");
        assert!((s - 0.5).abs() < 1e-9);
    }
}
