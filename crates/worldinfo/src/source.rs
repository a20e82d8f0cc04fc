//! Fragment sources, the named collections of world-info entries.

use promptweave_core::{Fragment, FragmentId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// A named collection the assembly pass draws candidates from.
pub trait FragmentSource: Send + Sync {
    /// Collection name; stamped onto every entry as its `world`.
    fn name(&self) -> &str;

    /// Whether the collection currently participates.
    fn is_enabled(&self) -> bool;

    /// The collection's entries, with `world` set to [`FragmentSource::name`].
    fn entries(&self) -> Vec<Fragment>;
}

/// An in-memory world book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldBook {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub entries: Vec<Fragment>,
}

fn default_enabled() -> bool {
    true
}

impl WorldBook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            entries: Vec::new(),
        }
    }

    /// Add an entry. Replaces any existing entry with the same uid.
    pub fn insert(&mut self, entry: Fragment) {
        match self.entries.iter_mut().find(|e| e.uid == entry.uid) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn with_entry(mut self, entry: Fragment) -> Self {
        self.insert(entry);
        self
    }

    pub fn remove(&mut self, uid: u64) -> Option<Fragment> {
        let idx = self.entries.iter().position(|e| e.uid == uid)?;
        Some(self.entries.remove(idx))
    }

    pub fn get(&self, uid: u64) -> Option<&Fragment> {
        self.entries.iter().find(|e| e.uid == uid)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl FragmentSource for WorldBook {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn entries(&self) -> Vec<Fragment> {
        self.entries
            .iter()
            .map(|e| e.clone().with_world(self.name.clone()))
            .collect()
    }
}

/// Aggregate the applicable entries across sources.
///
/// Disabled sources and disabled entries are skipped; the first occurrence
/// of each `(world, uid)` wins.
pub fn enabled_entries(sources: &[Box<dyn FragmentSource>]) -> Vec<Fragment> {
    let mut seen: HashSet<FragmentId> = HashSet::new();
    let mut out = Vec::new();
    for source in sources {
        if !source.is_enabled() {
            debug!(world = %source.name(), "Skipping disabled source");
            continue;
        }
        for entry in source.entries() {
            if entry.disable {
                continue;
            }
            if seen.insert(entry.id()) {
                out.push(entry);
            }
        }
    }
    out
}
