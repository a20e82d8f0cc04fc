//! Entry selection: decides which fragments activate for a trigger text.
//!
//! Rules are evaluated per fragment, in order; the first rule that decides
//! short-circuits:
//!
//! 1. Reject when the caller's [`ActivationCondition`] does not match.
//! 2. Reject when the probability roll fails.
//! 3. Accept constant fragments and `@@activate` fragments.
//! 4. Reject `@@dont_activate` and `@@only_preload` fragments.
//! 5. Require a primary key match.
//! 6. Apply the selective logic to secondary keys.
//!
//! Grouping is resolved separately by [`crate::GroupResolver`].

use crate::keys::{MatchOptions, key_matches};
use promptweave_config::WorldInfoConfig;
use promptweave_core::{Decorator, Fragment, FragmentId, SelectiveLogic};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Optional constraints a caller places on candidate fragments.
///
/// Each `Some` field must equal the fragment's flag for it to stay a
/// candidate; `None` fields are not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationCondition {
    #[serde(default)]
    pub constant: Option<bool>,
    #[serde(default)]
    pub disabled: Option<bool>,
    #[serde(default)]
    pub vectorized: Option<bool>,
}

impl ActivationCondition {
    fn admits(&self, fragment: &Fragment) -> bool {
        self.constant.is_none_or(|c| c == fragment.constant)
            && self.disabled.is_none_or(|d| d == fragment.disable)
            && self.vectorized.is_none_or(|v| v == fragment.vectorized)
    }
}

/// Why a fragment did or did not activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Constant,
    Forced,
    KeyMatch,
    ConditionMismatch,
    ProbabilityFailed,
    Suppressed,
    NoPrimaryMatch,
    SecondaryLogicFailed,
}

impl Decision {
    pub fn is_activated(self) -> bool {
        matches!(self, Decision::Constant | Decision::Forced | Decision::KeyMatch)
    }
}

/// Applies the activation rules to candidate fragments.
pub struct EntrySelector<'a> {
    config: &'a WorldInfoConfig,
}

impl<'a> EntrySelector<'a> {
    pub fn new(config: &'a WorldInfoConfig) -> Self {
        Self { config }
    }

    /// Select the fragments that activate for `keywords`.
    ///
    /// The result preserves input order and contains each fragment identity
    /// at most once.
    pub fn select<R: Rng + ?Sized>(
        &self,
        entries: &[Fragment],
        keywords: &str,
        condition: &ActivationCondition,
        rng: &mut R,
    ) -> Vec<Fragment> {
        let mut seen: HashSet<FragmentId> = HashSet::new();
        let mut activated = Vec::new();

        for entry in entries {
            let decision = self.evaluate(entry, keywords, condition, rng);
            debug!(fragment = %entry.id(), ?decision, "Evaluated fragment");
            if decision.is_activated() && seen.insert(entry.id()) {
                activated.push(entry.clone());
            }
        }

        activated
    }

    /// Run the activation rules for a single fragment.
    pub fn evaluate<R: Rng + ?Sized>(
        &self,
        entry: &Fragment,
        keywords: &str,
        condition: &ActivationCondition,
        rng: &mut R,
    ) -> Decision {
        if !condition.admits(entry) {
            return Decision::ConditionMismatch;
        }

        if entry.use_probability {
            let roll: u32 = rng.random_range(1..=100);
            if roll > entry.probability {
                return Decision::ProbabilityFailed;
            }
        }

        if entry.constant {
            return Decision::Constant;
        }
        if entry.has_decorator(&Decorator::Activate) {
            return Decision::Forced;
        }

        if entry.has_decorator(&Decorator::DontActivate)
            || entry.has_decorator(&Decorator::OnlyPreload)
        {
            return Decision::Suppressed;
        }

        let options = MatchOptions::for_fragment(entry, self.config);
        if !entry.key.iter().any(|k| key_matches(k, keywords, options)) {
            return Decision::NoPrimaryMatch;
        }

        if has_secondary_logic(entry) && !secondary_satisfied(entry, keywords, options) {
            return Decision::SecondaryLogicFailed;
        }

        Decision::KeyMatch
    }
}

/// Whether the fragment's secondary keys take part in activation.
pub fn has_secondary_logic(entry: &Fragment) -> bool {
    entry.selective && entry.keysecondary.iter().any(|k| !k.trim().is_empty())
}

/// Evaluate the selective logic over the secondary keys.
///
/// `AndAny` and `NotAll` exit at the first deciding key; `AndAll` and
/// `NotAny` scan every key before deciding.
pub fn secondary_satisfied(entry: &Fragment, keywords: &str, options: MatchOptions) -> bool {
    let secondary = entry.keysecondary.iter().filter(|k| !k.trim().is_empty());

    match entry.selective_logic {
        SelectiveLogic::AndAny => {
            for key in secondary {
                if key_matches(key, keywords, options) {
                    return true;
                }
            }
            false
        }
        SelectiveLogic::NotAll => {
            for key in secondary {
                if !key_matches(key, keywords, options) {
                    return true;
                }
            }
            false
        }
        SelectiveLogic::NotAny => {
            let mut any = false;
            for key in secondary {
                if key_matches(key, keywords, options) {
                    any = true;
                }
            }
            !any
        }
        SelectiveLogic::AndAll => {
            let mut all = true;
            for key in secondary {
                if !key_matches(key, keywords, options) {
                    all = false;
                }
            }
            all
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn select(entries: &[Fragment], keywords: &str) -> Vec<Fragment> {
        let config = WorldInfoConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        EntrySelector::new(&config).select(
            entries,
            keywords,
            &ActivationCondition::default(),
            &mut rng,
        )
    }

    fn contents(entries: &[Fragment]) -> Vec<&str> {
        entries.iter().map(|e| e.content.as_str()).collect()
    }

    #[test]
    fn constant_entry_always_activates() {
        let entries = vec![Fragment::new(1, "A").with_constant(true)];
        assert_eq!(contents(&select(&entries, "zzz")), vec!["A"]);
    }

    #[test]
    fn suppressed_entry_never_activates() {
        let entries = vec![
            Fragment::new(1, "@@dont_activate\nA").with_keys(["zzz"]),
            Fragment::new(2, "@@only_preload\nB").with_keys(["zzz"]),
        ];
        assert!(select(&entries, "zzz").is_empty());
    }

    #[test]
    fn forced_decorator_activates_without_keys() {
        let entries = vec![Fragment::new(1, "@@activate\nA")];
        assert_eq!(contents(&select(&entries, "")), vec!["A"]);
    }

    #[test]
    fn primary_key_required() {
        let entries = vec![
            Fragment::new(1, "A").with_keys(["castle"]),
            Fragment::new(2, "B").with_keys(["forest"]),
        ];
        assert_eq!(contents(&select(&entries, "We reach the castle")), vec!["A"]);
    }

    #[test]
    fn selective_logic_variants() {
        let make = |logic| {
            Fragment::new(1, "X")
                .with_keys(["knight"])
                .with_secondary_keys(["sword", "shield"], logic)
        };
        let text_one = "the knight draws a sword";
        let text_both = "the knight with sword and shield";
        let text_none = "the knight waits";

        assert_eq!(select(&[make(SelectiveLogic::AndAny)], text_one).len(), 1);
        assert_eq!(select(&[make(SelectiveLogic::AndAny)], text_none).len(), 0);

        assert_eq!(select(&[make(SelectiveLogic::AndAll)], text_one).len(), 0);
        assert_eq!(select(&[make(SelectiveLogic::AndAll)], text_both).len(), 1);

        assert_eq!(select(&[make(SelectiveLogic::NotAny)], text_none).len(), 1);
        assert_eq!(select(&[make(SelectiveLogic::NotAny)], text_one).len(), 0);

        assert_eq!(select(&[make(SelectiveLogic::NotAll)], text_one).len(), 1);
        assert_eq!(select(&[make(SelectiveLogic::NotAll)], text_both).len(), 0);
    }

    #[test]
    fn non_selective_ignores_secondary_keys() {
        let mut entry = Fragment::new(1, "X")
            .with_keys(["knight"])
            .with_secondary_keys(["dragon"], SelectiveLogic::AndAll);
        entry.selective = false;
        assert_eq!(select(&[entry], "a knight").len(), 1);
    }

    #[test]
    fn condition_filters_candidates() {
        let config = WorldInfoConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let entries = vec![
            Fragment::new(1, "A").with_constant(true),
            Fragment::new(2, "B").with_keys(["go"]),
        ];
        let condition = ActivationCondition {
            constant: Some(false),
            ..Default::default()
        };
        let activated = EntrySelector::new(&config).select(&entries, "go", &condition, &mut rng);
        assert_eq!(contents(&activated), vec!["B"]);
    }

    #[test]
    fn zero_probability_never_activates() {
        let entries = vec![Fragment::new(1, "A").with_constant(true).with_probability(0)];
        for seed in 0..20 {
            let config = WorldInfoConfig::default();
            let mut rng = StdRng::seed_from_u64(seed);
            let activated = EntrySelector::new(&config).select(
                &entries,
                "",
                &ActivationCondition::default(),
                &mut rng,
            );
            assert!(activated.is_empty());
        }
    }

    #[test]
    fn duplicates_are_collapsed() {
        let entry = Fragment::new(1, "A").with_constant(true).with_world("lore");
        let activated = select(&[entry.clone(), entry], "");
        assert_eq!(activated.len(), 1);
    }
}
