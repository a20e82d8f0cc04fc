//! Mirroring rules into the host application's own substitution pass.
//!
//! The host cannot run our closures, so it receives a plain descriptor.

use crate::rule::{Applicability, RegexRule, Replacement};
use serde::{Deserialize, Serialize};

/// What the host is told about a mirrored rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRule {
    pub id: String,
    pub search: String,
    /// `None` when the replacement is computed and cannot be mirrored.
    pub replace: Option<String>,
    pub applies: Applicability,
    pub min_depth: Option<i64>,
    pub max_depth: Option<i64>,
    pub order: i64,
}

impl From<&RegexRule> for HostRule {
    fn from(rule: &RegexRule) -> Self {
        Self {
            id: rule.id.clone(),
            search: rule.pattern.source().to_string(),
            replace: match &rule.replace {
                Replacement::Literal(text) => Some(text.clone()),
                Replacement::Function(_) => None,
            },
            applies: rule.applies,
            min_depth: rule.min_depth,
            max_depth: rule.max_depth,
            order: rule.order,
        }
    }
}

/// The host-owned built-in rule collection.
pub trait HostRegexRegistry: Send + Sync {
    /// Add or replace (by id) a mirrored rule.
    fn register(&mut self, rule: HostRule);

    /// Remove a mirrored rule. Unknown ids are ignored.
    fn unregister(&mut self, id: &str);

    fn contains(&self, id: &str) -> bool;
}

/// In-memory host collection.
#[derive(Debug, Clone, Default)]
pub struct HostRules {
    rules: Vec<HostRule>,
}

impl HostRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[HostRule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&HostRule> {
        self.rules.iter().find(|r| r.id == id)
    }
}

impl HostRegexRegistry for HostRules {
    fn register(&mut self, rule: HostRule) {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    fn unregister(&mut self, id: &str) {
        self.rules.retain(|r| r.id != id);
    }

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}
