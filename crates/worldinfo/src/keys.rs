//! Keyword matching.
//!
//! A key is either a delimited regex (`/pattern/flags`) or a literal. Literal
//! keys match by substring containment; case sensitivity and whole-word
//! matching are configured per fragment with collection-wide fallbacks.
//! Whole-word matching only applies to single-word keys; a key containing
//! whitespace falls back to plain containment.

use promptweave_config::WorldInfoConfig;
use promptweave_core::{Fragment, PatternError};
use promptweave_regex::Pattern;
use regex_lite::Regex;
use tracing::warn;

/// Resolved matching options for one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    pub case_sensitive: bool,
    pub whole_words: bool,
}

impl MatchOptions {
    pub fn for_fragment(fragment: &Fragment, config: &WorldInfoConfig) -> Self {
        Self {
            case_sensitive: fragment.case_sensitive.unwrap_or(config.case_sensitive),
            whole_words: fragment.match_whole_words.unwrap_or(config.match_whole_words),
        }
    }
}

/// Parse a `/pattern/flags` key into a regex.
///
/// Returns `None` when `input` is not delimited like a regex at all, and
/// `Some(Err(..))` when it is but fails to compile.
pub fn parse_regex(input: &str) -> Option<Result<Regex, PatternError>> {
    Pattern::delimited(input).map(|parsed| parsed.map(|p| p.regex().clone()))
}

/// Does `key` match anywhere in `haystack`?
///
/// A malformed regex key is logged and treated as a non-match.
pub fn key_matches(key: &str, haystack: &str, options: MatchOptions) -> bool {
    let key = key.trim();
    if key.is_empty() {
        return false;
    }

    if let Some(parsed) = parse_regex(key) {
        return match parsed {
            Ok(re) => re.is_match(haystack),
            Err(e) => {
                warn!(key, error = %e, "Skipping malformed key pattern");
                false
            }
        };
    }

    if options.whole_words && !key.contains(char::is_whitespace) {
        let flags = if options.case_sensitive { "" } else { "(?i)" };
        let source = format!(r"{flags}(?:^|\W)({})(?:$|\W)", regex_lite::escape(key));
        return match Regex::new(&source) {
            Ok(re) => re.is_match(haystack),
            Err(e) => {
                warn!(key, error = %e, "Skipping key that failed to compile as a word pattern");
                false
            }
        };
    }

    if options.case_sensitive {
        haystack.contains(key)
    } else {
        haystack.to_lowercase().contains(&key.to_lowercase())
    }
}

/// Number of keys in `keys` that match `haystack`.
pub fn count_matches(keys: &[String], haystack: &str, options: MatchOptions) -> usize {
    keys.iter()
        .filter(|k| key_matches(k, haystack, options))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOSE: MatchOptions = MatchOptions {
        case_sensitive: false,
        whole_words: false,
    };

    #[test]
    fn literal_match_ignores_case_by_default() {
        assert!(key_matches("Dragon", "a red dragon appears", LOOSE));
        assert!(!key_matches("wyvern", "a red dragon appears", LOOSE));
    }

    #[test]
    fn case_sensitive_literal() {
        let opts = MatchOptions {
            case_sensitive: true,
            whole_words: false,
        };
        assert!(!key_matches("Dragon", "a red dragon", opts));
        assert!(key_matches("dragon", "a red dragon", opts));
    }

    #[test]
    fn whole_word_single_key_uses_boundaries() {
        let opts = MatchOptions {
            case_sensitive: false,
            whole_words: true,
        };
        assert!(key_matches("cat", "the cat sat", opts));
        assert!(key_matches("cat", "cat", opts));
        assert!(!key_matches("cat", "concatenate", opts));
    }

    #[test]
    fn whole_word_multi_word_key_degrades_to_contains() {
        let opts = MatchOptions {
            case_sensitive: false,
            whole_words: true,
        };
        assert!(key_matches("red dragon", "the reddish red dragonfly", opts));
    }

    #[test]
    fn regex_key_with_flags() {
        assert!(key_matches("/dra+gon/i", "DRAAAGON!", LOOSE));
        assert!(!key_matches("/dra+gon/", "DRAAAGON!", LOOSE));
    }

    #[test]
    fn malformed_regex_key_is_skipped() {
        assert!(!key_matches("/(unclosed/", "(unclosed", LOOSE));
    }

    #[test]
    fn slash_text_is_not_a_regex() {
        assert!(parse_regex("/path/to/file").is_none());
        assert!(parse_regex("plain").is_none());
        assert!(key_matches("and/or", "this and/or that", LOOSE));
    }

    #[test]
    fn counts_matching_keys() {
        let keys = vec!["sun".to_string(), "moon".to_string(), "star".to_string()];
        assert_eq!(count_matches(&keys, "sun and moon", LOOSE), 2);
    }
}
