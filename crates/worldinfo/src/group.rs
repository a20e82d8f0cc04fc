//! Group resolution: at most one member of each named group survives.
//!
//! Within a group of more than one activated member the winner is chosen by
//! the first applicable rule:
//!
//! 1. **Override**: the `group_override` member with the smallest `order`.
//! 2. **Scoring**: the member matching the most keys.
//! 3. **Weighted random**: a roll over the members' weights.
//!
//! A fragment may belong to several comma-separated groups; losing any one
//! of them removes it.

use crate::keys::{MatchOptions, count_matches};
use crate::selector::{has_secondary_logic, secondary_satisfied};
use promptweave_config::WorldInfoConfig;
use promptweave_core::Fragment;
use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

/// Picks one winner per non-empty group.
pub struct GroupResolver<'a> {
    config: &'a WorldInfoConfig,
}

impl<'a> GroupResolver<'a> {
    pub fn new(config: &'a WorldInfoConfig) -> Self {
        Self { config }
    }

    /// Resolve groups over the activated set.
    ///
    /// Ungrouped fragments pass through unchanged; the output keeps the input
    /// order.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        activated: Vec<Fragment>,
        keywords: &str,
        rng: &mut R,
    ) -> Vec<Fragment> {
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (idx, entry) in activated.iter().enumerate() {
            for name in entry.groups() {
                match groups.iter_mut().find(|(g, _)| g == name) {
                    Some((_, members)) => members.push(idx),
                    None => groups.push((name.to_string(), vec![idx])),
                }
            }
        }

        let mut removed: HashSet<usize> = HashSet::new();
        for (name, members) in &groups {
            let candidates: Vec<usize> = members
                .iter()
                .copied()
                .filter(|idx| !removed.contains(idx))
                .collect();
            if candidates.len() < 2 {
                continue;
            }

            let winner = self.pick_winner(&activated, &candidates, keywords, rng);
            debug!(
                group = %name,
                winner = %activated[winner].id(),
                members = candidates.len(),
                "Resolved group"
            );
            removed.extend(candidates.into_iter().filter(|idx| *idx != winner));
        }

        activated
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !removed.contains(idx))
            .map(|(_, entry)| entry)
            .collect()
    }

    fn pick_winner<R: Rng + ?Sized>(
        &self,
        entries: &[Fragment],
        candidates: &[usize],
        keywords: &str,
        rng: &mut R,
    ) -> usize {
        if let Some(winner) = override_winner(entries, candidates) {
            return winner;
        }

        let scoring = candidates.iter().any(|idx| {
            entries[*idx]
                .use_group_scoring
                .unwrap_or(self.config.use_group_scoring)
        });
        if scoring {
            return self.score_winner(entries, candidates, keywords);
        }

        weighted_winner(entries, candidates, self.config.default_group_weight, rng)
    }

    fn score_winner(&self, entries: &[Fragment], candidates: &[usize], keywords: &str) -> usize {
        let mut best = candidates[0];
        let mut best_score = None;
        for idx in candidates {
            let score = self.score(&entries[*idx], keywords);
            if best_score.is_none_or(|b| score > b) {
                best = *idx;
                best_score = Some(score);
            }
        }
        best
    }

    /// Primary matches, plus secondary matches when the selective logic holds.
    pub fn score(&self, entry: &Fragment, keywords: &str) -> usize {
        let options = MatchOptions::for_fragment(entry, self.config);
        let mut score = count_matches(&entry.key, keywords, options);
        if has_secondary_logic(entry) && secondary_satisfied(entry, keywords, options) {
            score += count_matches(&entry.keysecondary, keywords, options);
        }
        score
    }
}

/// The override member with the smallest order; ties keep selection order.
fn override_winner(entries: &[Fragment], candidates: &[usize]) -> Option<usize> {
    candidates
        .iter()
        .copied()
        .filter(|idx| entries[*idx].group_override)
        .fold(None, |best: Option<usize>, idx| match best {
            Some(b) if entries[b].order <= entries[idx].order => Some(b),
            _ => Some(idx),
        })
}

/// Draw in `[1, total]` and walk members subtracting weights until the
/// running value turns non-positive.
fn weighted_winner<R: Rng + ?Sized>(
    entries: &[Fragment],
    candidates: &[usize],
    default_weight: u32,
    rng: &mut R,
) -> usize {
    let total: u64 = candidates
        .iter()
        .map(|idx| u64::from(entries[*idx].effective_weight(default_weight)))
        .sum();
    let mut roll = rng.random_range(1..=total) as i64;
    for idx in candidates {
        roll -= i64::from(entries[*idx].effective_weight(default_weight));
        if roll <= 0 {
            return *idx;
        }
    }
    candidates[candidates.len() - 1]
}
