//! Positional prompt injection.
//!
//! Injection fragments carry an annotation describing *where* their content
//! goes relative to the already-ordered message sequence:
//!
//! ```text
//! @INJECT pos=0 role=system            -> very first message
//! @INJECT target=user index=-1 at=after -> right after the last user message
//! @@inject regex="/^OOC:/" at=before   -> before the first OOC message
//! ```
//!
//! Annotations are parsed fresh on every pass and never persisted.

mod annotation;
mod planner;
mod registry;

pub use annotation::{
    Anchor, Annotation, InjectionInstruction, Placement, TITLE_PREFIX, annotation_text,
    instruction_from_fragment, parse_annotation,
};
pub use planner::plan;
pub use registry::{InjectedPrompt, PromptRegistry};

/// Errors from parsing an injection annotation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnnotationError {
    #[error("annotation has no addressing mode (pos, target or regex)")]
    MissingMode,

    #[error("annotation mixes addressing modes: {0}")]
    ConflictingModes(String),

    #[error("'{0}' does not apply to this addressing mode")]
    Misplaced(String),

    #[error("invalid value for '{key}': '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("unknown annotation key '{0}'")]
    UnknownKey(String),

    #[error("malformed annotation: {0}")]
    Syntax(String),
}
