//! World-info activation: which fragments participate in a pass, and
//! where they land.
//!
//! # Pipeline
//!
//! ```text
//! FragmentSource ──▶ EntrySelector ──▶ GroupResolver ──▶ DepthSorter
//!  (WorldBook)       keys, probs       one per group     total order
//! ```
//!
//! Randomness (probability rolls, weighted group picks) is always drawn
//! from a caller-supplied [`rand::Rng`].

mod depth;
mod group;
mod keys;
mod selector;
mod source;

pub use depth::{DepthSorter, HISTORY_ANCHOR_OFFSET, PlacedFragment};
pub use group::GroupResolver;
pub use keys::{MatchOptions, count_matches, key_matches, parse_regex};
pub use selector::{
    ActivationCondition, Decision, EntrySelector, has_secondary_logic, secondary_satisfied,
};
pub use source::{FragmentSource, WorldBook, enabled_entries};
