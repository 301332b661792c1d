//! Korean license plate grammars

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Built-in grammars, most specific first
const PLATE_PATTERNS: [&str; 3] = [
    // Current plates: 123가4567
    r"[0-9]{2,3}[가-힣][0-9]{4}",
    // Legacy plates: 12가3456
    r"[0-9]{2}[가-힣][0-9]{4}",
    // Region-qualified plates: 서울12가3456
    r"[가-힣]{2}[0-9]{2}[가-힣][0-9]{4}",
];

static BUILT_IN: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    PLATE_PATTERNS
        .iter()
        .map(|pattern| Regex::new(pattern).expect("built-in plate pattern must compile"))
        .collect()
});

/// Matches text against an ordered list of plate grammars
#[derive(Debug, Clone)]
pub struct PatternValidator {
    grammars: Vec<Regex>,
}

impl Default for PatternValidator {
    fn default() -> Self {
        Self {
            grammars: BUILT_IN.clone(),
        }
    }
}

impl PatternValidator {
    /// Validator with the built-in grammars only
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator with extra grammars tried after the built-in ones
    pub fn with_extra_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut validator = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let grammar = Regex::new(pattern)
                .with_context(|| format!("Invalid plate pattern: {}", pattern))?;
            validator.grammars.push(grammar);
        }
        Ok(validator)
    }

    /// Number of grammars tried
    pub fn grammar_count(&self) -> usize {
        self.grammars.len()
    }

    /// Leftmost match of the first grammar that matches anywhere in `text`
    pub fn validate(&self, text: &str) -> Option<String> {
        self.grammars
            .iter()
            .find_map(|grammar| grammar.find(text))
            .map(|m| m.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_plate() {
        let validator = PatternValidator::new();
        assert_eq!(validator.validate("123가4567"), Some("123가4567".to_string()));
    }

    #[test]
    fn test_legacy_plate() {
        let validator = PatternValidator::new();
        assert_eq!(validator.validate("12가3456"), Some("12가3456".to_string()));
    }

    #[test]
    fn test_returns_matched_substring() {
        let validator = PatternValidator::new();
        assert_eq!(validator.validate("XX12가3456YY"), Some("12가3456".to_string()));
        assert_eq!(validator.validate("1234가5678"), Some("234가5678".to_string()));
    }

    #[test]
    fn test_first_grammar_wins() {
        // Grammar 1 matches inside a region-qualified plate before grammar 3 is tried
        let validator = PatternValidator::new();
        assert_eq!(validator.validate("서울12가3456"), Some("12가3456".to_string()));
    }

    #[test]
    fn test_no_match() {
        let validator = PatternValidator::new();
        assert_eq!(validator.validate("XY"), None);
        assert_eq!(validator.validate("1234"), None);
        assert_eq!(validator.validate("12A3456"), None);
        assert_eq!(validator.validate(""), None);
    }

    #[test]
    fn test_non_ascii_digits_are_rejected() {
        let validator = PatternValidator::new();
        assert_eq!(validator.validate("١٢가٣٤٥٦"), None);
    }

    #[test]
    fn test_extra_patterns_are_tried_last() {
        let validator = PatternValidator::with_extra_patterns(&[r"[0-9]{2,4}[0-9]{2,4}"]).unwrap();
        assert_eq!(validator.grammar_count(), 4);
        assert_eq!(validator.validate("12345678"), Some("12345678".to_string()));
        assert_eq!(validator.validate("12가3456"), Some("12가3456".to_string()));
    }

    #[test]
    fn test_invalid_extra_pattern() {
        assert!(PatternValidator::with_extra_patterns(&["[0-9"]).is_err());
    }
}
