//! Scoped variables for template rendering.
//!
//! | Scope     | Lives in                                 | Writable |
//! |-----------|------------------------------------------|----------|
//! | `global`  | the store                                | yes      |
//! | `local`   | [`promptweave_core::Chat::variables`]    | yes      |
//! | `message` | the addressed message, per swipe         | yes      |
//! | `cache`   | merged snapshot, rebuilt once per pass   | no       |
//!
//! Every call takes an explicit [`Addressing`] instead of relying on an
//! ambient "current message".

mod merge;
mod options;
mod path;
mod store;

pub use merge::{merge_maps, merge_values};
pub use options::{
    Addressing, GetOptions, MessageFilter, Numeric, Scope, SetFlag, SetOptions, SetResult,
    StepOptions,
};
pub use path::VarPath;
pub use store::{TRACE_KEY, VariableStore, resolve_message};
