//! Injection annotation grammar.
//!
//! Injection fragments carry their addressing either in a title starting
//! with `@INJECT` or in an `@@inject` decorator:
//!
//! ```text
//! pos=<int>
//! target=<role> [index=<int>] [at=before|after]
//! regex=<pattern> [at=before|after]
//! role=user|assistant|system
//! ```
//!
//! Exactly one addressing mode is allowed. Values may be quoted with `'` or
//! `"`; a backslash escapes the next character inside quotes.

use crate::AnnotationError;
use promptweave_core::{Fragment, Role};
use serde::{Deserialize, Serialize};

/// Title prefix that marks a fragment as an injection.
pub const TITLE_PREFIX: &str = "@INJECT";

/// Whether content goes before or after its anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    #[default]
    Before,
    After,
}

/// Addressing mode of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum Anchor {
    /// 1-based absolute position; negative counts from the end; 0 prepends.
    Pos { pos: i64 },
    /// The `index`-th message of `role` (1-based, negative from the end).
    Target {
        role: Role,
        index: i64,
        at: Placement,
    },
    /// The first message whose content matches `pattern`.
    Regex { pattern: String, at: Placement },
}

impl Anchor {
    pub fn mode(&self) -> &'static str {
        match self {
            Anchor::Pos { .. } => "pos",
            Anchor::Target { .. } => "target",
            Anchor::Regex { .. } => "regex",
        }
    }
}

/// A parsed annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub anchor: Anchor,
    /// Output role, if the annotation names one.
    pub role: Option<Role>,
}

/// One planned insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionInstruction {
    pub anchor: Anchor,
    pub role: Role,
    pub content: String,
    /// Secondary sort key; lower goes first.
    #[serde(default)]
    pub order: i64,
    /// Where the instruction came from, for logs.
    #[serde(default)]
    pub source: String,
}

impl InjectionInstruction {
    pub fn new(anchor: Anchor, role: Role, content: impl Into<String>) -> Self {
        Self {
            anchor,
            role,
            content: content.into(),
            order: 0,
            source: String::new(),
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// The annotation text of an injection fragment, if it is one.
///
/// A `@INJECT` title takes precedence over an `@@inject` decorator.
pub fn annotation_text(fragment: &Fragment) -> Option<&str> {
    let title = fragment.comment.trim_start();
    if let Some(rest) = title.strip_prefix(TITLE_PREFIX)
        && rest.chars().next().is_none_or(char::is_whitespace)
    {
        return Some(rest.trim());
    }
    fragment.inject_annotation()
}

/// Build an instruction from an injection fragment.
///
/// Returns `None` for ordinary fragments.
pub fn instruction_from_fragment(
    fragment: &Fragment,
    default_role: Role,
) -> Option<Result<InjectionInstruction, AnnotationError>> {
    let text = annotation_text(fragment)?;
    Some(parse_annotation(text).map(|annotation| InjectionInstruction {
        anchor: annotation.anchor,
        role: annotation.role.unwrap_or(default_role),
        content: fragment.content.clone(),
        order: fragment.order,
        source: fragment.id().to_string(),
    }))
}

/// Parse an annotation string.
pub fn parse_annotation(input: &str) -> Result<Annotation, AnnotationError> {
    let mut pos = None;
    let mut target = None;
    let mut regex = None;
    let mut index = None;
    let mut at = None;
    let mut role = None;

    for (key, value) in tokenize(input)? {
        match key.to_ascii_lowercase().as_str() {
            "pos" => pos = Some(parse_int(&key, &value)?),
            "target" => target = Some(parse_role(&key, &value)?),
            "regex" => {
                if value.is_empty() {
                    return Err(AnnotationError::InvalidValue { key, value });
                }
                regex = Some(value);
            }
            "index" => index = Some(parse_int(&key, &value)?),
            "at" => {
                at = Some(match value.to_ascii_lowercase().as_str() {
                    "before" => Placement::Before,
                    "after" => Placement::After,
                    _ => return Err(AnnotationError::InvalidValue { key, value }),
                })
            }
            "role" => role = Some(parse_role(&key, &value)?),
            _ => return Err(AnnotationError::UnknownKey(key)),
        }
    }

    let modes: Vec<&str> = [
        pos.is_some().then_some("pos"),
        target.is_some().then_some("target"),
        regex.is_some().then_some("regex"),
    ]
    .into_iter()
    .flatten()
    .collect();
    if modes.len() > 1 {
        return Err(AnnotationError::ConflictingModes(modes.join(", ")));
    }

    let anchor = match (pos, target, regex) {
        (Some(pos), None, None) => {
            if index.is_some() {
                return Err(AnnotationError::Misplaced("index".into()));
            }
            if at.is_some() {
                return Err(AnnotationError::Misplaced("at".into()));
            }
            Anchor::Pos { pos }
        }
        (None, Some(role), None) => Anchor::Target {
            role,
            index: index.unwrap_or(1),
            at: at.unwrap_or_default(),
        },
        (None, None, Some(pattern)) => {
            if index.is_some() {
                return Err(AnnotationError::Misplaced("index".into()));
            }
            Anchor::Regex {
                pattern,
                at: at.unwrap_or_default(),
            }
        }
        _ => return Err(AnnotationError::MissingMode),
    };

    Ok(Annotation { anchor, role })
}

fn parse_int(key: &str, value: &str) -> Result<i64, AnnotationError> {
    value.parse().map_err(|_| AnnotationError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_role(key: &str, value: &str) -> Result<Role, AnnotationError> {
    value.parse().map_err(|_| AnnotationError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// ─── Tokenizer ───────────────────────────────────────────────────────

fn tokenize(input: &str) -> Result<Vec<(String, String)>, AnnotationError> {
    let mut pairs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next() != Some('=') || key.is_empty() {
            return Err(AnnotationError::Syntax(format!(
                "expected key=value, found '{key}'"
            )));
        }

        let mut value = String::new();
        match chars.peek() {
            Some(&quote) if quote == '"' || quote == '\'' => {
                chars.next();
                loop {
                    match chars.next() {
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                if escaped != quote && escaped != '\\' {
                                    value.push('\\');
                                }
                                value.push(escaped);
                            }
                        }
                        Some(ch) if ch == quote => break,
                        Some(ch) => value.push(ch),
                        None => {
                            return Err(AnnotationError::Syntax(format!(
                                "unterminated value for '{key}'"
                            )));
                        }
                    }
                }
            }
            _ => {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }
        pairs.push((key, value));
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pos_with_role() {
        let a = parse_annotation("pos=-1 role=user").unwrap();
        assert_eq!(a.anchor, Anchor::Pos { pos: -1 });
        assert_eq!(a.role, Some(Role::User));
    }

    #[test]
    fn target_defaults_to_first_before() {
        let a = parse_annotation("target=assistant").unwrap();
        assert_eq!(
            a.anchor,
            Anchor::Target {
                role: Role::Assistant,
                index: 1,
                at: Placement::Before
            }
        );
        assert_eq!(a.role, None);
    }

    #[test]
    fn target_with_index_and_placement() {
        let a = parse_annotation("target=user index=-1 at=after").unwrap();
        assert_eq!(
            a.anchor,
            Anchor::Target {
                role: Role::User,
                index: -1,
                at: Placement::After
            }
        );
    }

    #[test]
    fn quoted_regex_keeps_spaces_and_escapes() {
        let a = parse_annotation(r#"regex="/hello world\d/i" at=after"#).unwrap();
        assert_eq!(
            a.anchor,
            Anchor::Regex {
                pattern: r"/hello world\d/i".into(),
                at: Placement::After
            }
        );
        let b = parse_annotation(r"regex='it\'s'").unwrap();
        assert_eq!(
            b.anchor,
            Anchor::Regex {
                pattern: "it's".into(),
                at: Placement::Before
            }
        );
    }

    #[test]
    fn exactly_one_mode_is_required() {
        assert_eq!(
            parse_annotation("role=user").unwrap_err(),
            AnnotationError::MissingMode
        );
        assert!(matches!(
            parse_annotation("pos=1 target=user"),
            Err(AnnotationError::ConflictingModes(_))
        ));
    }

    #[test]
    fn rejects_bad_values_and_keys() {
        assert!(matches!(
            parse_annotation("pos=first"),
            Err(AnnotationError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_annotation("target=narrator"),
            Err(AnnotationError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_annotation("pos=1 depth=2"),
            Err(AnnotationError::UnknownKey(_))
        ));
        assert!(matches!(
            parse_annotation("pos=1 at=after"),
            Err(AnnotationError::Misplaced(_))
        ));
        assert!(matches!(
            parse_annotation("regex=\"open"),
            Err(AnnotationError::Syntax(_))
        ));
        assert!(matches!(
            parse_annotation("pos"),
            Err(AnnotationError::Syntax(_))
        ));
    }

    #[test]
    fn title_and_decorator_sources() {
        let titled = Fragment::new(1, "Remember the oath.")
            .with_comment("@INJECT target=user index=-1 at=after")
            .with_order(3);
        let instruction = instruction_from_fragment(&titled, Role::System)
            .unwrap()
            .unwrap();
        assert_eq!(instruction.role, Role::System);
        assert_eq!(instruction.order, 3);
        assert_eq!(instruction.content, "Remember the oath.");

        let decorated = Fragment::new(2, "@@inject pos=0 role=assistant\nHi");
        let instruction = instruction_from_fragment(&decorated, Role::System)
            .unwrap()
            .unwrap();
        assert_eq!(instruction.anchor, Anchor::Pos { pos: 0 });
        assert_eq!(instruction.role, Role::Assistant);
        assert_eq!(instruction.content, "Hi");

        let plain = Fragment::new(3, "x").with_comment("@INJECTION notes");
        assert!(instruction_from_fragment(&plain, Role::System).is_none());
    }
}
