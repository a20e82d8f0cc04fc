//! The end-to-end assembly pass.
//!
//! ```text
//! sources ─▶ select ─▶ + forced ─▶ groups ─┬─▶ depth sort ─▶ render ─▶ interleave ─┐
//!                                          └─▶ injection fragments ─▶ render ──────┴─▶ plan ─▶ out
//! ```
//!
//! Fragments are rendered independently: one failing fragment is reported
//! and skipped while the rest of the pass continues. A failure while
//! rendering a history message aborts the pass.

use crate::render::{RenderContext, RenderOptions, TemplateRenderer};
use crate::session::AssemblySession;
use promptweave_core::{Chat, Fragment, Message, RenderError, Result, Role};
use promptweave_injection::{InjectionInstruction, annotation_text, instruction_from_fragment, plan};
use promptweave_regex::{ApplySelector, Phase, Source};
use promptweave_variables::Addressing;
use promptweave_worldinfo::{
    ActivationCondition, DepthSorter, EntrySelector, GroupResolver, PlacedFragment,
};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Metadata key naming the fragment a message was built from.
pub const FRAGMENT_KEY: &str = "fragment";

#[derive(Debug, Clone, Default)]
pub struct AssemblyOptions {
    /// Constraints on which fragments may activate.
    pub condition: ActivationCondition,
    /// Run history messages through the renderer too.
    pub render_history: bool,
}

/// A fragment that could not be rendered.
#[derive(Debug, Clone)]
pub struct RenderFailure {
    pub source_id: String,
    pub error: RenderError,
}

#[derive(Debug, Clone)]
pub struct AssemblyOutput {
    /// The final message sequence.
    pub messages: Vec<Message>,
    /// Fragments that survived selection and group resolution.
    pub activated: Vec<Fragment>,
    /// Fragments skipped because rendering failed.
    pub failures: Vec<RenderFailure>,
}

impl AssemblySession {
    /// Run one assembly pass over `chat` for the `trigger` text.
    ///
    /// The pass always finishes, so sticky lifetimes are spent and the
    /// forced queue is cleared even when history rendering fails.
    pub async fn assemble(
        &mut self,
        chat: &mut Chat,
        trigger: &str,
        renderer: &dyn TemplateRenderer,
        options: &AssemblyOptions,
    ) -> Result<AssemblyOutput> {
        let addr = self.begin_pass();
        let output = self.run_pass(chat, trigger, renderer, options, addr).await;
        self.finish_pass();
        output
    }

    async fn run_pass(
        &mut self,
        chat: &mut Chat,
        trigger: &str,
        renderer: &dyn TemplateRenderer,
        options: &AssemblyOptions,
        addr: Addressing,
    ) -> Result<AssemblyOutput> {
        let activated = self.activate(trigger, &options.condition);
        info!(
            pass_id = ?addr.pass_id,
            activated = activated.len(),
            renderer = renderer.name(),
            "Assembling context"
        );

        let (injections, ordinary): (Vec<Fragment>, Vec<Fragment>) = activated
            .iter()
            .cloned()
            .partition(|f| annotation_text(f).is_some());
        let placed =
            DepthSorter::new(&self.config.world_info, &self.config.author_note).place(ordinary);

        let history = self
            .prepare_history(chat, renderer, options.render_history, addr)
            .await?;

        let mut failures = Vec::new();
        let mut rendered = Vec::with_capacity(placed.len());
        for PlacedFragment { depth, fragment } in placed {
            let Some(content) = self
                .render_fragment(chat, renderer, &fragment, addr, Some(depth), &mut failures)
                .await
            else {
                continue;
            };
            let mut message = Message::new(fragment.role.unwrap_or(Role::System), content);
            message
                .metadata
                .insert(FRAGMENT_KEY.into(), Value::String(fragment.id().to_string()));
            rendered.push((depth, message));
        }
        let messages = interleave(history, rendered);

        let mut instructions: Vec<InjectionInstruction> = Vec::new();
        for fragment in &injections {
            let instruction =
                match instruction_from_fragment(fragment, self.config.injection.default_role) {
                    Some(Ok(instruction)) => instruction,
                    Some(Err(e)) => {
                        warn!(fragment = %fragment.id(), error = %e, "Skipping malformed injection annotation");
                        continue;
                    }
                    None => continue,
                };
            if let Some(content) = self
                .render_fragment(chat, renderer, fragment, addr, None, &mut failures)
                .await
            {
                instructions.push(InjectionInstruction {
                    content,
                    ..instruction
                });
            }
        }
        instructions.extend(self.prompts.instructions());
        let messages = plan(messages, &instructions);

        if !failures.is_empty() {
            warn!(failed = failures.len(), "Some fragments were skipped");
        }
        Ok(AssemblyOutput {
            messages,
            activated,
            failures,
        })
    }

    /// Selected entries plus forced ones, with groups resolved.
    fn activate(&mut self, trigger: &str, condition: &ActivationCondition) -> Vec<Fragment> {
        let entries = self.get_enabled_entries();
        let mut activated = EntrySelector::new(&self.config.world_info).select(
            &entries,
            trigger,
            condition,
            &mut self.rng,
        );
        for entry in std::mem::take(&mut self.forced) {
            if !activated.iter().any(|a| a.id() == entry.id()) {
                debug!(fragment = %entry.id(), "Adding forced activation");
                activated.push(entry);
            }
        }
        GroupResolver::new(&self.config.world_info).resolve(activated, trigger, &mut self.rng)
    }

    /// History messages with generate-phase regex applied per role.
    async fn prepare_history(
        &mut self,
        chat: &mut Chat,
        renderer: &dyn TemplateRenderer,
        render: bool,
        addr: Addressing,
    ) -> Result<Vec<Message>> {
        let len = chat.messages.len();
        let mut history = Vec::with_capacity(len);
        for idx in 0..len {
            let mut message = chat.messages[idx].clone();
            if render {
                let addressing = addr.at_message(idx, Some(message.swipe_id));
                let mut ctx =
                    RenderContext::new(&mut self.variables, chat, addressing, message.id.clone());
                message.content = renderer
                    .render(&message.content, &mut ctx, &RenderOptions::default())
                    .await?;
            }
            let depth = (len - 1 - idx) as i64;
            let selector = ApplySelector::new(Phase::Generate, Source::from(message.role)).at_depth(depth);
            message.content = self.regex.apply(&message.content, &selector);
            history.push(message);
        }
        Ok(history)
    }

    async fn render_fragment(
        &mut self,
        chat: &mut Chat,
        renderer: &dyn TemplateRenderer,
        fragment: &Fragment,
        addr: Addressing,
        depth: Option<i64>,
        failures: &mut Vec<RenderFailure>,
    ) -> Option<String> {
        let source_id = fragment.id().to_string();
        let mut ctx = RenderContext::new(&mut self.variables, chat, addr, source_id.clone());
        match renderer
            .render(&fragment.content, &mut ctx, &RenderOptions::default())
            .await
        {
            Ok(text) => {
                let mut selector = ApplySelector::new(Phase::Generate, Source::WorldInfo);
                if let Some(depth) = depth {
                    selector = selector.at_depth(depth);
                }
                Some(self.regex.apply(&text, &selector))
            }
            Err(error) => {
                warn!(fragment = %source_id, error = %error, "Fragment rendering failed, skipping");
                failures.push(RenderFailure { source_id, error });
                None
            }
        }
    }
}

/// Insert depth-placed messages into `history`.
///
/// Depth `d` lands before the `d`-th message from the end; depths beyond
/// the history go first, negative depths last. `placed` must already be in
/// sorted order.
fn interleave(history: Vec<Message>, placed: Vec<(i64, Message)>) -> Vec<Message> {
    let len = history.len();
    let mut slots: Vec<Vec<Message>> = (0..=len).map(|_| Vec::new()).collect();
    for (depth, message) in placed {
        let idx = usize::try_from(depth).map_or(len, |d| len.saturating_sub(d));
        slots[idx].push(message);
    }

    let mut out = Vec::with_capacity(len + slots.iter().map(Vec::len).sum::<usize>());
    let mut history = history.into_iter();
    for slot in slots {
        out.extend(slot);
        out.extend(history.next());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn interleave_by_depth() {
        let history = vec![Message::user("u1"), Message::assistant("a1"), Message::user("u2")];
        let placed = vec![
            (9, Message::system("deep")),
            (2, Message::system("d2")),
            (0, Message::system("d0")),
        ];
        let out = interleave(history, placed);
        assert_eq!(contents(&out), vec!["deep", "u1", "d2", "a1", "u2", "d0"]);
    }

    #[test]
    fn same_depth_keeps_sorted_order() {
        let history = vec![Message::user("u1")];
        let placed = vec![(1, Message::system("first")), (1, Message::system("second"))];
        let out = interleave(history, placed);
        assert_eq!(contents(&out), vec!["first", "second", "u1"]);
    }

    #[test]
    fn negative_depth_goes_last() {
        let out = interleave(vec![Message::user("u1")], vec![(-3, Message::system("tail"))]);
        assert_eq!(contents(&out), vec!["u1", "tail"]);
    }

    #[test]
    fn empty_history() {
        let out = interleave(vec![], vec![(4, Message::system("only"))]);
        assert_eq!(contents(&out), vec!["only"]);
    }
}
