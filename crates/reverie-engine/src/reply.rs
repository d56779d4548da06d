//! `LABEL: value` lines in evaluator replies

use once_cell::sync::Lazy;
use regex::Regex;

static LABELED_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[\s*_#>-]*([A-Za-z]+)[\s*_]*:[\s*_]*(.+)$").expect("labeled-line regex")
});

// A number that ends the value or is followed by a non-numeric character.
// `1,5` and `0.9e1` do not match.
static UNIT_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(-?(?:\d+(?:\.\d*)?|\.\d+))(?:$|[^\d.,eE/]|[.,](?:\s|$))").expect("unit-number regex")
});

/// Trimmed value of the first line labeled `label` (case-insensitive).
pub fn labeled<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    LABELED_LINE
        .captures_iter(text)
        .find(|c| c.get(1).map_or(false, |m| m.as_str().eq_ignore_ascii_case(label)))
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim())
        .filter(|v| !v.is_empty())
}

/// The number a `label` line starts with, when it is a whole number token.
pub fn labeled_number(text: &str, label: &str) -> Option<f64> {
    let value = labeled(text, label)?.trim_start_matches(|c: char| c == '*' || c == '_');
    UNIT_NUMBER.captures(value)?.get(1)?.as_str().parse().ok()
}
