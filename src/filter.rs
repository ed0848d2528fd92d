// src/filter.rs
//
// Keyword filtering over decoded lines.
// Everything here is stateless and safe to call from any execution context.

use serde::{Deserialize, Serialize};

/// Separator between keywords in an include/exclude list, e.g. "error;warning".
pub const KEYWORD_SEPARATOR: char = ';';

/// Case-sensitive substring match. An empty keyword matches every line.
pub fn matches(line: &str, keyword: &str) -> bool {
    keyword.is_empty() || line.contains(keyword)
}

/// Live include/exclude filter applied to every received line.
///
/// A line is rejected if it contains any exclude keyword. Otherwise it is
/// accepted when the include list is empty or any include keyword matches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl KeywordFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Build a filter from two `;`-separated keyword lists.
    pub fn parse(include_text: &str, exclude_text: &str) -> Self {
        Self {
            include: split_keywords(include_text),
            exclude: split_keywords(exclude_text),
        }
    }

    pub fn accepts(&self, line: &str) -> bool {
        if self.exclude.iter().any(|k| matches(line, k)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|k| matches(line, k))
    }

    pub fn is_pass_all(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Status line shown to the operator after the filter changes.
    pub fn describe(&self) -> String {
        if self.is_pass_all() {
            return "Live filter cleared".to_string();
        }
        let include = if self.include.is_empty() {
            "[all]".to_string()
        } else {
            self.include.join(", ")
        };
        let exclude = if self.exclude.is_empty() {
            "[none]".to_string()
        } else {
            self.exclude.join(", ")
        };
        format!("Live filter updated | show: {} | hide: {}", include, exclude)
    }
}

fn split_keywords(text: &str) -> Vec<String> {
    text.split(KEYWORD_SEPARATOR)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_keyword_matches_everything() {
        assert!(matches("", ""));
        assert!(matches("anything at all", ""));
        assert!(matches("\u{FFFD}\u{FFFD}", ""));
    }

    #[test]
    fn test_match_is_case_sensitive() {
        assert!(matches("abcXYZ", "XYZ"));
        assert!(!matches("abcxyz", "XYZ"));
        assert!(!matches("XY", "XYZ"));
    }

    #[test]
    fn test_parse_drops_blank_entries() {
        let filter = KeywordFilter::parse(" error ; ;warning;", "");
        assert_eq!(filter.include, vec!["error", "warning"]);
        assert!(filter.exclude.is_empty());
    }

    #[test]
    fn test_default_filter_accepts_all() {
        let filter = KeywordFilter::default();
        assert!(filter.is_pass_all());
        assert!(filter.accepts(""));
        assert!(filter.accepts("boot ok"));
    }

    #[test]
    fn test_include_any() {
        let filter = KeywordFilter::parse("error;warn", "");
        assert!(filter.accepts("E: error 42"));
        assert!(filter.accepts("warn: low battery"));
        assert!(!filter.accepts("info: tick"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = KeywordFilter::parse("error", "debug");
        assert!(filter.accepts("error: overheat"));
        assert!(!filter.accepts("debug error trace"));
        assert!(!filter.accepts("debug: tick"));
    }

    #[test]
    fn test_describe() {
        assert_eq!(KeywordFilter::default().describe(), "Live filter cleared");
        assert_eq!(
            KeywordFilter::parse("a;b", "").describe(),
            "Live filter updated | show: a, b | hide: [none]"
        );
        assert_eq!(
            KeywordFilter::parse("", "c").describe(),
            "Live filter updated | show: [all] | hide: c"
        );
    }
}
