//! # promptweave Core
//!
//! Domain types and error definitions shared by every promptweave crate:
//! chat messages with per-swipe variables, world-info fragments with their
//! parsed decorators, and the error taxonomy.
//!
//! ## Design Philosophy
//!
//! Each assembly stage lives in its own crate and depends inward on this
//! one. Stages exchange plain data (`Fragment`, `Message`, `Chat`) so they
//! can be tested in isolation and recombined by the engine.

pub mod error;
pub mod fragment;
pub mod message;

// Re-export key types at crate root for ergonomics
pub use error::{Error, PatternError, RenderError, Result, VariableError};
pub use fragment::{
    Decorator, Fragment, FragmentId, Position, SelectiveLogic, DEFAULT_DEPTH,
    DEFAULT_GROUP_WEIGHT,
};
pub use message::{Chat, ChatId, Message, Role, VariableMap};
