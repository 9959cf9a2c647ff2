//! Wildcard pattern matching for policy entries.
//!
//! `*` matches zero or more characters (including dots and slashes). Everything else is
//! literal. Matching is case-insensitive and anchored to the whole input.

use regex::RegexBuilder;
use tracing::warn;

/// Whether `input` matches `pattern` in full.
pub fn wildcard_matches(pattern: &str, input: &str) -> bool {
    let translated = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    match RegexBuilder::new(&format!("^{translated}$"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
    {
        Ok(re) => re.is_match(input),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Unusable policy pattern");
            false
        }
    }
}

/// First pattern in `patterns` that matches `input`, if any.
pub fn first_match<'a, I>(patterns: I, input: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    patterns
        .into_iter()
        .find(|p| wildcard_matches(p, input))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_case_insensitive() {
        assert!(wildcard_matches("GitHub.com", "github.COM"));
        assert!(!wildcard_matches("github.com", "api.github.com"));
    }

    #[test]
    fn prefix_wildcard_is_anchored() {
        assert!(wildcard_matches("172.16.*", "172.16.0.5"));
        assert!(!wildcard_matches("172.16.*", "172.160.0.5"));
        assert!(!wildcard_matches("172.16.*", "10.172.16.1"));
    }

    #[test]
    fn leading_wildcard_spans_multiple_labels() {
        assert!(wildcard_matches("*.example.com", "cdn.example.com"));
        assert!(wildcard_matches("*.example.com", "a.b.example.com"));
        assert!(!wildcard_matches("*.example.com", "example.com"));
        assert!(!wildcard_matches("*.example.com", "example.com.evil.net"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert!(wildcard_matches("a+b(c)", "a+b(c)"));
        assert!(!wildcard_matches("a+b", "aab"));
        assert!(!wildcard_matches("127.0.0.1", "127x0y0z1"));
        assert!(wildcard_matches("[::1]", "[::1]"));
    }

    #[test]
    fn bare_star_matches_everything() {
        assert!(wildcard_matches("*", ""));
        assert!(wildcard_matches("*", "anything.at.all"));
    }

    #[test]
    fn first_match_reports_pattern() {
        let patterns = vec!["10.*".to_string(), "localhost".to_string()];
        assert_eq!(first_match(&patterns, "LOCALHOST"), Some("localhost"));
        assert_eq!(first_match(&patterns, "example.com"), None);
    }
}
