//! Error types for the promptweave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Lookup misses (unknown fragment, message, key or injection target) are
//! deliberately *not* represented here: they are logged and produce an empty
//! result. Only failures that would otherwise lose data surface as errors.

use thiserror::Error;

/// The top-level error type for all promptweave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Variable store errors ---
    #[error("Variable error: {0}")]
    Variable(#[from] VariableError),

    // --- Pattern errors ---
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    // --- Rendering errors ---
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VariableError {
    #[error("value under '{key}' is not valid structured data: {reason}")]
    MalformedValue { key: String, reason: String },

    #[error("scope '{0}' is read-only")]
    ReadOnlyScope(String),

    #[error("invalid variable path: {0}")]
    InvalidPath(String),

    #[error("value under '{key}' is not numeric: {value}")]
    NotNumeric { key: String, value: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PatternError {
    #[error("invalid pattern '{pattern}': {reason}")]
    Invalid { pattern: String, reason: String },

    #[error("empty search pattern")]
    Empty,
}

#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("rendering '{source_id}' failed: {reason} (text: {preview})")]
    Failed {
        /// Identity of the fragment or message being rendered.
        source_id: String,
        /// The first characters of the originating text.
        preview: String,
        reason: String,
    },

    #[error("rendering '{source_id}' was refused by the isolated executor: {reason}")]
    Isolation { source_id: String, reason: String },
}

impl RenderError {
    /// Build a failure carrying enough context to diagnose the source.
    pub fn failed(source_id: impl Into<String>, text: &str, reason: impl Into<String>) -> Self {
        Self::Failed {
            source_id: source_id.into(),
            preview: preview(text, 80),
            reason: reason.into(),
        }
    }
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
