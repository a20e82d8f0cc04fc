//! Keyed injected prompts.
//!
//! Prompts are grouped under a key. Within a key, prompts are kept in
//! ascending `order`; a prompt with a `uid` replaces any earlier prompt with
//! the same uid. Prompts that carry an [`Anchor`] also take part in
//! injection planning.

use crate::annotation::{Anchor, InjectionInstruction};
use promptweave_core::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedPrompt {
    pub content: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub anchor: Option<Anchor>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub uid: Option<String>,
    /// Remaining passes; `None` lives until removed.
    #[serde(default)]
    pub sticky: Option<u32>,
}

fn default_role() -> Role {
    Role::System
}

impl InjectedPrompt {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: default_role(),
            anchor: None,
            order: 0,
            uid: None,
            sticky: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_sticky(mut self, sticky: u32) -> Self {
        self.sticky = Some(sticky);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, Vec<InjectedPrompt>>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prompt under `key`.
    pub fn inject(&mut self, key: impl Into<String>, prompt: InjectedPrompt) {
        let key = key.into();
        let slot = self.prompts.entry(key.clone()).or_default();
        if let Some(uid) = &prompt.uid
            && let Some(existing) = slot.iter_mut().find(|p| p.uid.as_ref() == Some(uid))
        {
            debug!(key = %key, uid = %uid, "Replacing injected prompt");
            *existing = prompt;
        } else {
            slot.push(prompt);
        }
        slot.sort_by_key(|p| p.order);
    }

    /// Contents under `key` joined in order, or `None` if there are none.
    pub fn get(&self, key: &str) -> Option<String> {
        let prompts = self.prompts.get(key).filter(|p| !p.is_empty())?;
        Some(
            prompts
                .iter()
                .map(|p| p.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    pub fn prompts(&self, key: &str) -> &[InjectedPrompt] {
        self.prompts.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has(&self, key: &str) -> bool {
        self.prompts.get(key).is_some_and(|p| !p.is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(String::as_str)
    }

    /// Remove a whole key, or only the prompt with `uid` under it.
    pub fn remove(&mut self, key: &str, uid: Option<&str>) -> bool {
        let removed = match uid {
            None => self.prompts.remove(key).is_some(),
            Some(uid) => match self.prompts.get_mut(key) {
                Some(slot) => {
                    let before = slot.len();
                    slot.retain(|p| p.uid.as_deref() != Some(uid));
                    slot.len() != before
                }
                None => false,
            },
        };
        self.prompts.retain(|_, slot| !slot.is_empty());
        removed
    }

    pub fn clear(&mut self) {
        self.prompts.clear();
    }

    /// Planner instructions for every anchored prompt.
    pub fn instructions(&self) -> Vec<InjectionInstruction> {
        self.prompts
            .iter()
            .flat_map(|(key, slot)| {
                slot.iter().filter_map(move |p| {
                    let anchor = p.anchor.clone()?;
                    Some(
                        InjectionInstruction::new(anchor, p.role, p.content.clone())
                            .with_order(p.order)
                            .with_source(key.clone()),
                    )
                })
            })
            .collect()
    }

    /// Spend one pass from every prompt with a sticky counter.
    pub fn tick(&mut self) {
        for slot in self.prompts.values_mut() {
            slot.retain_mut(|p| match p.sticky {
                Some(n) if n <= 1 => false,
                Some(n) => {
                    p.sticky = Some(n - 1);
                    true
                }
                None => true,
            });
        }
        self.prompts.retain(|_, slot| !slot.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_joins_in_order() {
        let mut registry = PromptRegistry::new();
        registry.inject("lore", InjectedPrompt::new("second").with_order(2));
        registry.inject("lore", InjectedPrompt::new("first").with_order(1));
        assert_eq!(registry.get("lore").as_deref(), Some("first\nsecond"));
        assert!(registry.has("lore"));
        assert!(!registry.has("other"));
        assert_eq!(registry.get("other"), None);
    }

    #[test]
    fn uid_replaces_in_place() {
        let mut registry = PromptRegistry::new();
        registry.inject("k", InjectedPrompt::new("old").with_uid("a"));
        registry.inject("k", InjectedPrompt::new("other"));
        registry.inject("k", InjectedPrompt::new("new").with_uid("a"));
        assert_eq!(registry.prompts("k").len(), 2);
        assert_eq!(registry.get("k").as_deref(), Some("new\nother"));
    }

    #[test]
    fn remove_by_key_or_uid() {
        let mut registry = PromptRegistry::new();
        registry.inject("k", InjectedPrompt::new("a").with_uid("1"));
        registry.inject("k", InjectedPrompt::new("b").with_uid("2"));
        assert!(registry.remove("k", Some("1")));
        assert_eq!(registry.get("k").as_deref(), Some("b"));
        assert!(registry.remove("k", None));
        assert!(!registry.has("k"));
        assert!(!registry.remove("k", None));
    }

    #[test]
    fn sticky_prompts_expire() {
        let mut registry = PromptRegistry::new();
        registry.inject("k", InjectedPrompt::new("twice").with_sticky(2));
        registry.inject("k", InjectedPrompt::new("always"));
        registry.tick();
        assert_eq!(registry.get("k").as_deref(), Some("twice\nalways"));
        registry.tick();
        assert_eq!(registry.get("k").as_deref(), Some("always"));
    }

    #[test]
    fn only_anchored_prompts_become_instructions() {
        let mut registry = PromptRegistry::new();
        registry.inject("plain", InjectedPrompt::new("no anchor"));
        registry.inject(
            "placed",
            InjectedPrompt::new("anchored")
                .with_anchor(Anchor::Pos { pos: 0 })
                .with_role(Role::User)
                .with_order(4),
        );
        let instructions = registry.instructions();
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].role, Role::User);
        assert_eq!(instructions[0].order, 4);
        assert_eq!(instructions[0].source, "placed");
    }
}
