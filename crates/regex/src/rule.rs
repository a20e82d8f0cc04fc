//! Regex rules and their applicability.

use crate::pattern::Pattern;
use promptweave_core::{PatternError, Role};
use regex_lite::Captures;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Pipeline phase a rule runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Applied to stored/displayed message text.
    Message,
    /// Applied to the prompt being generated.
    Generate,
}

/// Kind of text a rule is being applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    User,
    Assistant,
    System,
    Reasoning,
    WorldInfo,
}

impl From<Role> for Source {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Source::User,
            Role::Assistant => Source::Assistant,
            Role::System => Source::System,
        }
    }
}

/// Which sources a rule applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Applicability {
    pub user: bool,
    pub assistant: bool,
    pub system: bool,
    pub reasoning: bool,
    pub worldinfo: bool,
}

impl Applicability {
    pub fn all() -> Self {
        Self {
            user: true,
            assistant: true,
            system: true,
            reasoning: true,
            worldinfo: true,
        }
    }

    pub fn allows(&self, source: Source) -> bool {
        match source {
            Source::User => self.user,
            Source::Assistant => self.assistant,
            Source::System => self.system,
            Source::Reasoning => self.reasoning,
            Source::WorldInfo => self.worldinfo,
        }
    }
}

/// Call-site context handed to function replacements.
#[derive(Debug, Clone, Copy)]
pub struct ReplaceContext<'a> {
    pub rule_id: &'a str,
    pub phase: Phase,
    pub source: Source,
    pub depth: Option<i64>,
    /// Arbitrary caller data (e.g. the variable cache).
    pub data: Option<&'a Value>,
}

pub type ReplaceFn = Arc<dyn Fn(&ReplaceContext<'_>, &Captures<'_>) -> String + Send + Sync>;

#[derive(Clone)]
pub enum Replacement {
    /// Replacement text; `$1` and `${name}` expand capture groups.
    Literal(String),
    /// Computed from the call-site context and the match.
    Function(ReplaceFn),
}

impl std::fmt::Debug for Replacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Replacement::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            Replacement::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// A substitution rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RuleRecord")]
pub struct RegexRule {
    /// Stable id; re-registering the same id replaces in place.
    pub id: String,
    pub pattern: Pattern,
    pub replace: Replacement,
    pub applies: Applicability,
    pub min_depth: Option<i64>,
    pub max_depth: Option<i64>,
    pub order: i64,
    /// Remaining activations; `None` lives until explicitly deactivated.
    pub sticky: Option<i32>,
    pub run_on_message: bool,
    pub run_on_generate: bool,
    /// Mirror into the host's own substitution pass.
    pub host: bool,
}

impl RegexRule {
    /// A rule matching `search` (delimited regex, else literal text).
    ///
    /// Defaults: applies to every source, runs in both phases, order 0.
    pub fn new(
        id: impl Into<String>,
        search: &str,
        replace: impl Into<String>,
    ) -> Result<Self, PatternError> {
        Ok(Self {
            id: id.into(),
            pattern: Pattern::regex_or_literal(search)?,
            replace: Replacement::Literal(replace.into()),
            applies: Applicability::all(),
            min_depth: None,
            max_depth: None,
            order: 0,
            sticky: None,
            run_on_message: true,
            run_on_generate: true,
            host: false,
        })
    }

    pub fn with_function<F>(mut self, replace: F) -> Self
    where
        F: Fn(&ReplaceContext<'_>, &Captures<'_>) -> String + Send + Sync + 'static,
    {
        self.replace = Replacement::Function(Arc::new(replace));
        self
    }

    pub fn with_applies(mut self, applies: Applicability) -> Self {
        self.applies = applies;
        self
    }

    pub fn with_depth_window(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min_depth = min;
        self.max_depth = max;
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_sticky(mut self, sticky: i32) -> Self {
        self.sticky = Some(sticky);
        self
    }

    pub fn with_phases(mut self, message: bool, generate: bool) -> Self {
        self.run_on_message = message;
        self.run_on_generate = generate;
        self
    }

    pub fn with_host(mut self, host: bool) -> Self {
        self.host = host;
        self
    }

    /// Whether `depth` falls inside the rule's window. Unknown depths pass.
    pub fn in_window(&self, depth: Option<i64>) -> bool {
        let Some(depth) = depth else {
            return true;
        };
        self.min_depth.is_none_or(|min| depth >= min) && self.max_depth.is_none_or(|max| depth <= max)
    }

    /// Perform this rule's single replace over `content`.
    pub fn apply(&self, content: &str, ctx: &ReplaceContext<'_>) -> String {
        let regex = self.pattern.regex();
        let limit = if self.pattern.is_global() { 0 } else { 1 };
        match &self.replace {
            Replacement::Literal(text) => regex.replacen(content, limit, text.as_str()).into_owned(),
            Replacement::Function(f) => regex
                .replacen(content, limit, |caps: &Captures<'_>| f(ctx, caps))
                .into_owned(),
        }
    }
}

/// Wire shape of a rule; function replacements cannot be deserialized.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleRecord {
    id: String,
    search: String,
    #[serde(default)]
    replace: String,
    #[serde(default = "Applicability::all")]
    applies: Applicability,
    #[serde(default)]
    min_depth: Option<i64>,
    #[serde(default)]
    max_depth: Option<i64>,
    #[serde(default)]
    order: i64,
    #[serde(default)]
    sticky: Option<i32>,
    #[serde(default = "yes")]
    run_on_message: bool,
    #[serde(default = "yes")]
    run_on_generate: bool,
    #[serde(default)]
    host: bool,
}

fn yes() -> bool {
    true
}

impl TryFrom<RuleRecord> for RegexRule {
    type Error = PatternError;

    fn try_from(record: RuleRecord) -> Result<Self, Self::Error> {
        let mut rule = RegexRule::new(record.id, &record.search, record.replace)?
            .with_applies(record.applies)
            .with_depth_window(record.min_depth, record.max_depth)
            .with_order(record.order)
            .with_phases(record.run_on_message, record.run_on_generate)
            .with_host(record.host);
        rule.sticky = record.sticky;
        Ok(rule)
    }
}
