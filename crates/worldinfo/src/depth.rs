//! Depth sorting: decides where activated fragments land relative to the
//! chat history.
//!
//! Every fragment gets an effective depth (distance from the end of the
//! conversation). The sort is a strict total order:
//! depth descending, `order` ascending, `uid` descending, then world name.

use promptweave_config::{AuthorNoteConfig, NotePlacement, WorldInfoConfig};
use promptweave_core::{Fragment, Position};
use std::cmp::Ordering;

/// Added on top of the deepest history anchor when the author's note sits
/// after the main prompt.
pub const HISTORY_ANCHOR_OFFSET: i64 = 1;

/// Offsets of the character/example anchors above the deepest
/// depth-addressed fragment.
fn near_character_offset(position: Position) -> Option<i64> {
    match position {
        Position::Before => Some(6),
        Position::After => Some(5),
        Position::EmTop => Some(4),
        Position::EmBottom => Some(3),
        _ => None,
    }
}

fn author_note_offset(position: Position) -> Option<i64> {
    match position {
        Position::AnTop => Some(1),
        Position::AnBottom => Some(0),
        _ => None,
    }
}

/// A fragment paired with its resolved depth.
#[derive(Debug, Clone)]
pub struct PlacedFragment {
    pub depth: i64,
    pub fragment: Fragment,
}

pub struct DepthSorter<'a> {
    world_info: &'a WorldInfoConfig,
    author_note: &'a AuthorNoteConfig,
}

impl<'a> DepthSorter<'a> {
    pub fn new(world_info: &'a WorldInfoConfig, author_note: &'a AuthorNoteConfig) -> Self {
        Self {
            world_info,
            author_note,
        }
    }

    /// Sort fragments into their final order.
    pub fn sort(&self, entries: Vec<Fragment>) -> Vec<Fragment> {
        self.place(entries)
            .into_iter()
            .map(|placed| placed.fragment)
            .collect()
    }

    /// Sort fragments and keep the depth each one resolved to.
    pub fn place(&self, entries: Vec<Fragment>) -> Vec<PlacedFragment> {
        let history_top = self.history_top(&entries);
        let mut placed: Vec<PlacedFragment> = entries
            .into_iter()
            .map(|fragment| PlacedFragment {
                depth: self.effective_depth(&fragment, history_top),
                fragment,
            })
            .collect();
        placed.sort_by(compare);
        placed
    }

    /// Deepest depth among `AtDepth` fragments, or 0 when there are none.
    pub fn history_top(&self, entries: &[Fragment]) -> i64 {
        entries
            .iter()
            .filter(|e| e.position == Position::AtDepth)
            .map(|e| self.own_depth(e))
            .max()
            .unwrap_or(0)
    }

    /// Resolve one fragment's depth given the deepest history anchor.
    pub fn effective_depth(&self, entry: &Fragment, history_top: i64) -> i64 {
        if let Some(offset) = near_character_offset(entry.position) {
            return offset + history_top;
        }

        if let Some(offset) = author_note_offset(entry.position) {
            return match self.author_note.placement {
                NotePlacement::InPrompt => offset + history_top + HISTORY_ANCHOR_OFFSET,
                NotePlacement::InChat => self.author_note.depth + self.own_depth(entry),
                // Without a note to anchor to, fall back to the entry's own depth.
                NotePlacement::None | NotePlacement::BeforePrompt => self.own_depth(entry),
            };
        }

        self.own_depth(entry)
    }

    fn own_depth(&self, entry: &Fragment) -> i64 {
        entry.depth.unwrap_or(self.world_info.default_depth)
    }
}

fn compare(a: &PlacedFragment, b: &PlacedFragment) -> Ordering {
    b.depth
        .cmp(&a.depth)
        .then_with(|| a.fragment.order.cmp(&b.fragment.order))
        .then_with(|| b.fragment.uid.cmp(&a.fragment.uid))
        .then_with(|| a.fragment.world.cmp(&b.fragment.world))
}
