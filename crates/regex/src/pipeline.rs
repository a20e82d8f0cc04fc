//! The rule pipeline.
//!
//! Two independent collections, one per [`Phase`]. A rule flagged for both
//! phases lives in both. Rules flagged `host` are also mirrored into a
//! [`HostRegexRegistry`] when one is attached.

use crate::host::{HostRegexRegistry, HostRule};
use crate::rule::{Phase, RegexRule, ReplaceContext, Source};
use serde_json::Value;
use tracing::debug;

/// Selects which rules an [`RegexPipeline::apply`] call runs.
#[derive(Debug, Clone, Copy)]
pub struct ApplySelector<'a> {
    pub phase: Phase,
    pub source: Source,
    /// Depth of the text being processed, for message-phase windows.
    pub depth: Option<i64>,
    /// Apply exactly this rule, bypassing all filtering.
    pub id: Option<&'a str>,
    /// Handed to function replacements.
    pub data: Option<&'a Value>,
}

impl<'a> ApplySelector<'a> {
    pub fn new(phase: Phase, source: Source) -> Self {
        Self {
            phase,
            source,
            depth: None,
            id: None,
            data: None,
        }
    }

    pub fn at_depth(mut self, depth: i64) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn only(mut self, id: &'a str) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_data(mut self, data: &'a Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Default)]
pub struct RegexPipeline {
    message: Vec<RegexRule>,
    generate: Vec<RegexRule>,
    host: Option<Box<dyn HostRegexRegistry>>,
}

impl RegexPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the host collection that `host` rules are mirrored into.
    pub fn with_host(mut self, host: Box<dyn HostRegexRegistry>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn host(&self) -> Option<&dyn HostRegexRegistry> {
        self.host.as_deref()
    }

    /// Register a rule. Replaces any existing rule with the same id.
    pub fn activate(&mut self, rule: RegexRule) {
        self.remove_everywhere(&rule.id);

        if rule.host
            && let Some(host) = self.host.as_mut()
        {
            host.register(HostRule::from(&rule));
        }
        debug!(rule = %rule.id, order = rule.order, sticky = ?rule.sticky, "Activated regex rule");

        if rule.run_on_message && rule.run_on_generate {
            self.message.push(rule.clone());
            self.generate.push(rule);
        } else if rule.run_on_message {
            self.message.push(rule);
        } else if rule.run_on_generate {
            self.generate.push(rule);
        }
    }

    /// Decrement a rule's sticky counter by `amount`, removing it once the
    /// counter reaches zero. A rule without a counter is removed outright.
    ///
    /// Returns `true` if the rule was removed.
    pub fn deactivate(&mut self, id: &str, amount: i32) -> bool {
        let Some(sticky) = self.get(id).map(|r| r.sticky) else {
            debug!(rule = %id, "Deactivating unknown regex rule");
            return false;
        };

        let remaining = sticky.unwrap_or(0).saturating_sub(amount);
        if remaining > 0 {
            for rule in self.rules_mut().filter(|r| r.id == id) {
                rule.sticky = Some(remaining);
            }
            return false;
        }

        self.remove_everywhere(id);
        debug!(rule = %id, "Removed regex rule");
        true
    }

    /// Spend one activation from every rule with a sticky counter.
    pub fn tick(&mut self) {
        let counted: Vec<String> = self
            .message
            .iter()
            .chain(&self.generate)
            .filter(|r| r.sticky.is_some())
            .map(|r| r.id.clone())
            .collect();
        let mut done: Vec<&str> = Vec::new();
        for id in &counted {
            if !done.contains(&id.as_str()) {
                self.deactivate(id, 1);
                done.push(id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&RegexRule> {
        self.message
            .iter()
            .chain(&self.generate)
            .find(|r| r.id == id)
    }

    /// Rules of a phase in application order.
    pub fn rules(&self, phase: Phase) -> Vec<&RegexRule> {
        let mut rules: Vec<&RegexRule> = match phase {
            Phase::Message => self.message.iter().collect(),
            Phase::Generate => self.generate.iter().collect(),
        };
        rules.sort_by_key(|r| r.order);
        rules
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_empty() && self.generate.is_empty()
    }

    /// Run the selected rules over `content` in ascending order.
    pub fn apply(&self, content: &str, selector: &ApplySelector<'_>) -> String {
        if let Some(id) = selector.id {
            return match self.get(id) {
                Some(rule) => rule.apply(content, &context(rule, selector)),
                None => {
                    debug!(rule = %id, "No regex rule with this id");
                    content.to_string()
                }
            };
        }

        let mut out = content.to_string();
        for rule in self.rules(selector.phase) {
            if !rule.applies.allows(selector.source) {
                continue;
            }
            if selector.phase == Phase::Message && !rule.in_window(selector.depth) {
                continue;
            }
            out = rule.apply(&out, &context(rule, selector));
        }
        out
    }

    fn rules_mut(&mut self) -> impl Iterator<Item = &mut RegexRule> {
        self.message.iter_mut().chain(self.generate.iter_mut())
    }

    fn remove_everywhere(&mut self, id: &str) {
        let mirrored = self.get(id).is_some_and(|r| r.host);
        self.message.retain(|r| r.id != id);
        self.generate.retain(|r| r.id != id);
        if mirrored && let Some(host) = self.host.as_mut() {
            host.unregister(id);
        }
    }
}

fn context<'a>(rule: &'a RegexRule, selector: &ApplySelector<'a>) -> ReplaceContext<'a> {
    ReplaceContext {
        rule_id: &rule.id,
        phase: selector.phase,
        source: selector.source,
        depth: selector.depth,
        data: selector.data,
    }
}

impl std::fmt::Debug for RegexPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegexPipeline")
            .field("message", &self.message)
            .field("generate", &self.generate)
            .field("host", &self.host.is_some())
            .finish()
    }
}
