//! Regex substitution rules.
//!
//! Rules are registered by id into a [`RegexPipeline`] and applied in
//! ascending `order` at one of two phases. Each rule performs a single
//! replace (first match, or every match with the `g` flag). Rules carrying a
//! `sticky` counter expire after that many activations.

mod host;
mod pattern;
mod pipeline;
mod rule;

pub use host::{HostRegexRegistry, HostRule, HostRules};
pub use pattern::Pattern;
pub use pipeline::{ApplySelector, RegexPipeline};
pub use rule::{
    Applicability, Phase, RegexRule, ReplaceContext, ReplaceFn, Replacement, Source,
};
