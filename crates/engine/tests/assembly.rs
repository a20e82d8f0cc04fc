//! End-to-end tests for the assembly session.
//!
//! These exercise the public session surface the way a host would:
//! register world books, drive variables and injected prompts, then run
//! whole assembly passes with a scripted renderer.

use promptweave_config::AssemblyConfig;
use promptweave_core::{Chat, Fragment, Message, Position, RenderError, Role};
use promptweave_engine::{
    AssemblyOptions, AssemblySession, FRAGMENT_KEY, PassThroughRenderer, RenderContext,
    RenderOptions, TemplateRenderer,
};
use promptweave_injection::{Anchor, InjectedPrompt, Placement};
use promptweave_regex::{Applicability, RegexRule};
use promptweave_variables::{GetOptions, Scope, SetFlag, SetOptions, StepOptions};
use promptweave_worldinfo::{ActivationCondition, WorldBook};
use serde_json::json;

// ── Scripted renderers ───────────────────────────────────────────────────

/// Fails on any text containing "boom".
struct FailingRenderer;

#[async_trait::async_trait]
impl TemplateRenderer for FailingRenderer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn render(
        &self,
        text: &str,
        ctx: &mut RenderContext<'_>,
        _options: &RenderOptions,
    ) -> Result<String, RenderError> {
        if text.contains("boom") {
            return Err(RenderError::failed(ctx.source_id.clone(), text, "exploded"));
        }
        Ok(text.to_uppercase())
    }
}

/// Counts renders in a chat-local variable.
struct CountingRenderer;

#[async_trait::async_trait]
impl TemplateRenderer for CountingRenderer {
    fn name(&self) -> &str {
        "counting"
    }

    async fn render(
        &self,
        text: &str,
        ctx: &mut RenderContext<'_>,
        _options: &RenderOptions,
    ) -> Result<String, RenderError> {
        ctx.increase_variable("renders", 1, &StepOptions::scope(Scope::Local))
            .map_err(|e| RenderError::failed(ctx.source_id.clone(), text, e.to_string()))?;
        Ok(text.to_string())
    }
}

/// Replaces "MOOD" with the cached `mood` variable.
struct MoodRenderer;

#[async_trait::async_trait]
impl TemplateRenderer for MoodRenderer {
    fn name(&self) -> &str {
        "mood"
    }

    async fn render(
        &self,
        text: &str,
        ctx: &mut RenderContext<'_>,
        _options: &RenderOptions,
    ) -> Result<String, RenderError> {
        let mood = ctx
            .get_variable("mood", &GetOptions::default())
            .map_err(|e| RenderError::failed(ctx.source_id.clone(), text, e.to_string()))?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unset".into());
        Ok(text.replace("MOOD", &mood))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn session_with(entries: Vec<Fragment>) -> AssemblySession {
    session_with_config(AssemblyConfig::default(), entries)
}

fn session_with_config(config: AssemblyConfig, entries: Vec<Fragment>) -> AssemblySession {
    let mut book = WorldBook::new("lore");
    for entry in entries {
        book.insert(entry);
    }
    let mut session = AssemblySession::new(config).with_seed(42);
    session.add_source(Box::new(book));
    session
}

fn contents(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.content.as_str()).collect()
}

fn three_turn_chat() -> Chat {
    Chat::from_messages(vec![
        Message::user("u1"),
        Message::assistant("a1"),
        Message::user("u2"),
    ])
}

// ── Activation ───────────────────────────────────────────────────────────

#[test]
fn constant_entry_activates_for_any_keywords() {
    let mut session = session_with(vec![Fragment::new(1, "A").with_constant(true)]);
    let activated = session.select_activated_entries("zzz", &ActivationCondition::default());
    assert_eq!(activated.len(), 1);
    assert_eq!(activated[0].content, "A");
}

#[test]
fn suppressed_entry_never_activates() {
    let mut session = session_with(vec![
        Fragment::new(1, "@@dont_activate\nB").with_keys(["zzz"]),
        Fragment::new(2, "@@dont_activate\nC").with_constant(false).with_keys(["z"]),
    ]);
    for keywords in ["zzz", "z", "zzz z"] {
        let activated = session.select_activated_entries(keywords, &ActivationCondition::default());
        assert!(activated.is_empty(), "activated for {keywords}");
    }
}

#[test]
fn group_override_with_lowest_order_wins() {
    let mut session = session_with(vec![
        Fragment::new(1, "A")
            .with_constant(true)
            .with_group("g")
            .with_order(1)
            .with_group_override(true),
        Fragment::new(2, "B")
            .with_constant(true)
            .with_group("g")
            .with_order(5)
            .with_group_override(true),
        Fragment::new(3, "C")
            .with_constant(true)
            .with_group("g")
            .with_order(0)
            .with_group_weight(1000),
    ]);
    for _ in 0..20 {
        let activated = session.select_activated_entries("", &ActivationCondition::default());
        assert_eq!(contents_of(&activated), vec!["A"]);
    }
}

fn contents_of(fragments: &[Fragment]) -> Vec<&str> {
    fragments.iter().map(|f| f.content.as_str()).collect()
}

// ── Variables ────────────────────────────────────────────────────────────

#[test]
fn global_score_round_trip() {
    let mut session = session_with(vec![]);
    let mut chat = Chat::new();
    session
        .set_variable(&mut chat, "score", json!(5), &SetOptions::scope(Scope::Global))
        .unwrap();
    let score = session
        .get_variable(&chat, "score", &GetOptions::scope(Scope::Global))
        .unwrap();
    assert_eq!(score, Some(json!(5)));
}

#[test]
fn nx_and_xx_flags_gate_writes() {
    let mut session = session_with(vec![]);
    let mut chat = Chat::new();
    let global = SetOptions::scope(Scope::Global);

    session.set_variable(&mut chat, "k", json!(1), &global).unwrap();
    session
        .set_variable(&mut chat, "k", json!(2), &global.clone().with_flags(SetFlag::Nx))
        .unwrap();
    assert_eq!(session.get_global_variable(&chat, "k").unwrap(), Some(json!(1)));

    session
        .set_variable(&mut chat, "missing", json!(3), &global.with_flags(SetFlag::Xx))
        .unwrap();
    assert_eq!(session.get_global_variable(&chat, "missing").unwrap(), None);
}

#[test]
fn increment_then_decrement_restores_value() {
    let mut session = session_with(vec![]);
    let mut chat = Chat::new();
    let step = StepOptions::scope(Scope::Global);
    session.set_global_variable(&mut chat, "k", json!(10)).unwrap();

    for n in [7_i64, -3, 0, 1_000_000] {
        session.increase_variable(&mut chat, "k", n, &step).unwrap();
        session.decrease_variable(&mut chat, "k", n, &step).unwrap();
        assert_eq!(session.get_global_variable(&chat, "k").unwrap(), Some(json!(10)));
    }
}

// ── Injection ────────────────────────────────────────────────────────────

#[test]
fn pos_one_then_pos_zero() {
    let mut session = session_with(vec![]);
    session.inject_prompt(
        "one",
        InjectedPrompt::new("pos1-content").with_anchor(Anchor::Pos { pos: 1 }),
    );
    session.inject_prompt(
        "zero",
        InjectedPrompt::new("pos0-content").with_anchor(Anchor::Pos { pos: 0 }),
    );
    let out = session.plan_injections(vec![Message::user("msg0"), Message::assistant("msg1")]);
    assert_eq!(
        contents(&out),
        vec!["pos0-content", "pos1-content", "msg0", "msg1"]
    );
}

#[test]
fn target_last_user_after() {
    let mut session = session_with(vec![]);
    session.inject_prompt(
        "note",
        InjectedPrompt::new("x").with_anchor(Anchor::Target {
            role: Role::User,
            index: -1,
            at: Placement::After,
        }),
    );
    let out = session.plan_injections(vec![
        Message::user("u1"),
        Message::assistant("a1"),
        Message::user("u2"),
        Message::assistant("a2"),
        Message::user("u3"),
        Message::assistant("a3"),
    ]);
    assert_eq!(contents(&out), vec!["u1", "a1", "u2", "a2", "u3", "x", "a3"]);
}

// ── Full passes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn assemble_places_fragments_and_injections() {
    let mut session = session_with(vec![
        Fragment::new(1, "Lore")
            .with_constant(true)
            .with_position(Position::AtDepth)
            .with_depth(1),
        Fragment::new(2, "Top")
            .with_constant(true)
            .with_comment("@INJECT pos=0"),
        Fragment::new(3, "Broken")
            .with_constant(true)
            .with_comment("@INJECT pos=first"),
        Fragment::new(4, "Unrelated").with_keys(["dragon"]),
    ]);
    session.inject_prompt(
        "after-user",
        InjectedPrompt::new("After").with_anchor(Anchor::Target {
            role: Role::User,
            index: -1,
            at: Placement::After,
        }),
    );

    let mut chat = three_turn_chat();
    let out = session
        .assemble(&mut chat, "u2", &PassThroughRenderer, &AssemblyOptions::default())
        .await
        .unwrap();

    assert_eq!(
        contents(&out.messages),
        vec!["Top", "u1", "a1", "Lore", "u2", "After"]
    );
    assert_eq!(out.activated.len(), 3);
    assert!(out.failures.is_empty());
    assert_eq!(out.messages[3].role, Role::System);
    assert_eq!(out.messages[3].metadata[FRAGMENT_KEY], json!("lore/1"));
    assert_eq!(chat.len(), 3, "the source chat is not modified");
}

#[tokio::test]
async fn depth_sort_is_deterministic() {
    let entries: Vec<Fragment> = (1..=3)
        .map(|uid| {
            Fragment::new(uid, format!("f{uid}"))
                .with_constant(true)
                .with_position(Position::AtDepth)
                .with_depth(2)
                .with_order(10)
        })
        .chain(std::iter::once(
            Fragment::new(9, "early")
                .with_constant(true)
                .with_position(Position::AtDepth)
                .with_depth(2)
                .with_order(1),
        ))
        .collect();
    let mut session = session_with(entries);

    let mut first = None;
    for _ in 0..3 {
        let mut chat = three_turn_chat();
        let out = session
            .assemble(&mut chat, "", &PassThroughRenderer, &AssemblyOptions::default())
            .await
            .unwrap();
        let order: Vec<String> = out.messages.iter().map(|m| m.content.clone()).collect();
        assert_eq!(order, vec!["u1", "early", "f3", "f2", "f1", "a1", "u2"]);
        match &first {
            None => first = Some(order),
            Some(previous) => assert_eq!(previous, &order),
        }
    }
}

#[tokio::test]
async fn render_failures_are_reported_and_skipped() {
    let mut session = session_with(vec![
        Fragment::new(1, "fine").with_constant(true),
        Fragment::new(2, "boom goes the template").with_constant(true),
    ]);
    let mut chat = Chat::from_messages(vec![Message::user("hi")]);
    let out = session
        .assemble(&mut chat, "", &FailingRenderer, &AssemblyOptions::default())
        .await
        .unwrap();

    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].source_id, "lore/2");
    assert!(out.failures[0].error.to_string().contains("exploded"));
    assert!(out.messages.iter().any(|m| m.content == "FINE"));
    assert!(!out.messages.iter().any(|m| m.content.contains("BOOM")));
}

#[tokio::test]
async fn history_render_failure_aborts_the_pass() {
    let mut session = session_with(vec![]);
    let mut chat = Chat::from_messages(vec![Message::user("boom")]);
    let options = AssemblyOptions {
        render_history: true,
        ..AssemblyOptions::default()
    };
    let result = session
        .assemble(&mut chat, "", &FailingRenderer, &options)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn fragments_see_message_variables_after_history_rendering() {
    for render_history in [false, true] {
        let mut session = session_with(vec![Fragment::new(1, "frag MOOD").with_constant(true)]);
        let mut chat = Chat::from_messages(vec![Message::user("first MOOD"), Message::user("second MOOD")]);
        chat.messages[0].variables_for_mut(0).insert("mood".into(), json!("calm"));
        let options = AssemblyOptions {
            render_history,
            ..AssemblyOptions::default()
        };

        let out = session
            .assemble(&mut chat, "", &MoodRenderer, &options)
            .await
            .unwrap();
        assert!(
            out.messages.iter().any(|m| m.content == "frag calm"),
            "render_history={render_history}: {:?}",
            contents(&out.messages)
        );
        if render_history {
            let history: Vec<&str> = contents(&out.messages)
                .into_iter()
                .filter(|c| !c.starts_with("frag"))
                .collect();
            assert_eq!(history, vec!["first unset", "second calm"]);
        }
    }
}

#[tokio::test]
async fn renderer_writes_variables_through_the_context() {
    let mut session = session_with(vec![
        Fragment::new(1, "a").with_constant(true),
        Fragment::new(2, "b").with_constant(true),
    ]);
    let mut chat = Chat::from_messages(vec![Message::user("hi")]);
    session
        .assemble(&mut chat, "", &CountingRenderer, &AssemblyOptions::default())
        .await
        .unwrap();
    assert_eq!(chat.variables["renders"], json!(2));
}

#[tokio::test]
async fn preview_mode_does_not_commit_renderer_writes() {
    let mut config = AssemblyConfig::default();
    config.variables.preview_mode = true;
    let mut session = session_with_config(config, vec![Fragment::new(1, "a").with_constant(true)]);
    let mut chat = Chat::from_messages(vec![Message::user("hi")]);
    session
        .assemble(&mut chat, "", &CountingRenderer, &AssemblyOptions::default())
        .await
        .unwrap();
    assert!(chat.variables.get("renders").is_none());
}

#[tokio::test]
async fn generate_rules_apply_per_role() {
    let mut session = session_with(vec![]);
    let user_only = Applicability {
        user: true,
        ..Applicability::default()
    };
    session.activate_regex(
        RegexRule::new("hp", "/HP/g", "health")
            .unwrap()
            .with_applies(user_only),
    );
    let mut chat = Chat::from_messages(vec![
        Message::user("HP low, HP dropping"),
        Message::assistant("HP fine"),
    ]);
    let out = session
        .assemble(&mut chat, "", &PassThroughRenderer, &AssemblyOptions::default())
        .await
        .unwrap();
    assert_eq!(
        contents(&out.messages),
        vec!["health low, health dropping", "HP fine"]
    );
}

#[tokio::test]
async fn forced_activation_lasts_one_pass() {
    let mut session = session_with(vec![Fragment::new(1, "Dragons").with_keys(["dragon"])]);
    assert!(session.activate_entry("lore", 1).is_some());

    let mut chat = Chat::from_messages(vec![Message::user("hello")]);
    let first = session
        .assemble(&mut chat, "hello", &PassThroughRenderer, &AssemblyOptions::default())
        .await
        .unwrap();
    assert!(first.messages.iter().any(|m| m.content == "Dragons"));

    let second = session
        .assemble(&mut chat, "hello", &PassThroughRenderer, &AssemblyOptions::default())
        .await
        .unwrap();
    assert!(!second.messages.iter().any(|m| m.content == "Dragons"));
}

#[tokio::test]
async fn sticky_prompts_expire_across_passes() {
    let mut session = session_with(vec![]);
    session.inject_prompt(
        "once",
        InjectedPrompt::new("temporary")
            .with_anchor(Anchor::Pos { pos: -1 })
            .with_sticky(1),
    );
    let mut chat = Chat::from_messages(vec![Message::user("hi")]);

    let first = session
        .assemble(&mut chat, "", &PassThroughRenderer, &AssemblyOptions::default())
        .await
        .unwrap();
    assert_eq!(contents(&first.messages), vec!["hi", "temporary"]);
    assert!(!session.has_injected_prompts("once"));

    let second = session
        .assemble(&mut chat, "", &PassThroughRenderer, &AssemblyOptions::default())
        .await
        .unwrap();
    assert_eq!(contents(&second.messages), vec!["hi"]);
}
