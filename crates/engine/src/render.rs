//! The template-rendering collaborator.
//!
//! The engine never interprets template text itself. It hands each fragment
//! (and, optionally, each history message) to a [`TemplateRenderer`] along
//! with a [`RenderContext`] that binds the variable store to an explicit
//! message/swipe address.

use async_trait::async_trait;
use promptweave_core::{Chat, RenderError, VariableError};
use promptweave_variables::{
    Addressing, GetOptions, Numeric, SetOptions, StepOptions, VariableStore,
};
use serde_json::Value;

/// Everything a renderer may touch while evaluating one piece of text.
pub struct RenderContext<'a> {
    pub store: &'a mut VariableStore,
    pub chat: &'a mut Chat,
    /// Which message/swipe is being rendered and for which pass.
    pub addressing: Addressing,
    /// Identity of the text being rendered, for diagnostics.
    pub source_id: String,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        store: &'a mut VariableStore,
        chat: &'a mut Chat,
        addressing: Addressing,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            chat,
            addressing,
            source_id: source_id.into(),
        }
    }

    pub fn get_variable(
        &mut self,
        key: &str,
        opts: &GetOptions,
    ) -> Result<Option<Value>, VariableError> {
        self.store.get(self.chat, key, &self.addressing, opts)
    }

    pub fn set_variable(
        &mut self,
        key: &str,
        value: Value,
        opts: &SetOptions,
    ) -> Result<Option<Value>, VariableError> {
        self.store.set(self.chat, key, value, &self.addressing, opts)
    }

    pub fn increase_variable(
        &mut self,
        key: &str,
        delta: impl Into<Numeric>,
        opts: &StepOptions,
    ) -> Result<Option<Value>, VariableError> {
        self.store
            .increment(self.chat, key, delta, &self.addressing, opts)
    }

    pub fn decrease_variable(
        &mut self,
        key: &str,
        delta: impl Into<Numeric>,
        opts: &StepOptions,
    ) -> Result<Option<Value>, VariableError> {
        self.store
            .decrement(self.chat, key, delta, &self.addressing, opts)
    }
}

/// Per-call rendering options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Run inside the host's isolated executor, if it has one.
    pub isolated: bool,
}

/// Turns template text plus context into output text.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    /// Renderer name, for logs.
    fn name(&self) -> &str;

    /// Render `text`. May read and write variables through `ctx`.
    async fn render(
        &self,
        text: &str,
        ctx: &mut RenderContext<'_>,
        options: &RenderOptions,
    ) -> Result<String, RenderError>;
}

/// Returns the text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughRenderer;

#[async_trait]
impl TemplateRenderer for PassThroughRenderer {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn render(
        &self,
        text: &str,
        _ctx: &mut RenderContext<'_>,
        _options: &RenderOptions,
    ) -> Result<String, RenderError> {
        Ok(text.to_string())
    }
}
