//! Search patterns.
//!
//! Patterns are written either as a delimited regex, `/pattern/flags`, or
//! as bare text. Of the JS-style flags, `i`, `m` and `s` become inline
//! flags, `g` makes replacement global, and `d`, `u`, `y` are accepted and
//! ignored.

use promptweave_core::PatternError;
use regex_lite::Regex;

const KNOWN_FLAGS: &str = "dgimsuy";

/// A compiled search pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
    global: bool,
}

impl Pattern {
    /// Parse `/pattern/flags`. Returns `None` when `input` is not delimited.
    pub fn delimited(input: &str) -> Option<Result<Self, PatternError>> {
        let body = input.strip_prefix('/')?;
        let close = body.rfind('/')?;
        let (pattern, flags) = (&body[..close], &body[close + 1..]);
        if pattern.is_empty() || !flags.chars().all(|c| KNOWN_FLAGS.contains(c)) {
            return None;
        }

        let inline: String = flags.chars().filter(|c| "ims".contains(*c)).collect();
        let expr = if inline.is_empty() {
            pattern.to_string()
        } else {
            format!("(?{inline}){pattern}")
        };
        Some(Self::compile(input, &expr, flags.contains('g')))
    }

    /// A delimited regex, or else `input` taken as a bare regex.
    pub fn parse(input: &str) -> Result<Self, PatternError> {
        if input.is_empty() {
            return Err(PatternError::Empty);
        }
        match Self::delimited(input) {
            Some(parsed) => parsed,
            None => Self::compile(input, input, false),
        }
    }

    /// A delimited regex, or else `input` matched literally.
    pub fn regex_or_literal(input: &str) -> Result<Self, PatternError> {
        if input.is_empty() {
            return Err(PatternError::Empty);
        }
        match Self::delimited(input) {
            Some(parsed) => parsed,
            None => Self::compile(input, &regex_lite::escape(input), false),
        }
    }

    fn compile(source: &str, expr: &str, global: bool) -> Result<Self, PatternError> {
        let regex = Regex::new(expr).map_err(|e| PatternError::Invalid {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
            global,
        })
    }

    /// The pattern as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Replace every match rather than the first.
    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimited_flags() {
        let p = Pattern::delimited("/ab+c/gi").unwrap().unwrap();
        assert!(p.is_global());
        assert!(p.is_match("xABBC"));
    }

    #[test]
    fn non_delimited_input() {
        assert!(Pattern::delimited("plain").is_none());
        assert!(Pattern::delimited("/a/b/c").is_none());
        assert!(Pattern::delimited("//g").is_none());
    }

    #[test]
    fn literal_fallback_escapes() {
        let p = Pattern::regex_or_literal("a.b").unwrap();
        assert!(p.is_match("a.b"));
        assert!(!p.is_match("axb"));
    }

    #[test]
    fn bare_regex_fallback() {
        let p = Pattern::parse("a.b").unwrap();
        assert!(p.is_match("axb"));
    }

    #[test]
    fn invalid_and_empty_patterns() {
        assert!(matches!(
            Pattern::parse("/(oops/"),
            Err(PatternError::Invalid { .. })
        ));
        assert_eq!(Pattern::parse("").unwrap_err(), PatternError::Empty);
    }
}
