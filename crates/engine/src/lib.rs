//! # promptweave Engine
//!
//! The [`AssemblySession`] owns every registry an assembly pass touches and
//! exposes the operations hosts call between passes:
//!
//! 1. **Fragments**: `select_activated_entries`, `get_enabled_entries`,
//!    `activate_entry`, `activate_by_keywords`
//! 2. **Variables**: `get_variable`, `set_variable`, `increase_variable`,
//!    `decrease_variable` and the per-scope aliases
//! 3. **Regex**: `activate_regex`, `deactivate_regex`, `apply_regex`
//! 4. **Injection**: `inject_prompt`, `get_injected_prompts`,
//!    `has_injected_prompts`, `plan_injections`
//!
//! [`AssemblySession::assemble`] runs the whole pipeline once, calling out
//! to a [`TemplateRenderer`] for every fragment.

mod assemble;
mod render;
mod session;

pub use assemble::{AssemblyOptions, AssemblyOutput, FRAGMENT_KEY, RenderFailure};
pub use render::{PassThroughRenderer, RenderContext, RenderOptions, TemplateRenderer};
pub use session::AssemblySession;
