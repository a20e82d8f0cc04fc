//! `promptweave assemble` — Run one assembly pass over a scenario file.
//!
//! A scenario bundles everything a pass needs:
//!
//! ```json
//! {
//!   "worlds":  [{ "name": "lore", "entries": [...] }],
//!   "chat":    { "messages": [{ "role": "user", "content": "..." }] },
//!   "trigger": "optional; defaults to the last non-system message",
//!   "prompts": { "key": [{ "content": "...", "anchor": { "mode": "pos", "pos": 0 } }] },
//!   "regex":   [{ "id": "r1", "search": "/x/g", "replace": "y" }],
//!   "globals": { "score": 5 },
//!   "activate": [{ "world": "lore", "uid": 3 }]
//! }
//! ```

use super::new_session;
use promptweave_config::AssemblyConfig;
use promptweave_core::{Chat, FragmentId, Role, VariableMap};
use promptweave_engine::{AssemblyOptions, AssemblyOutput, AssemblySession, PassThroughRenderer};
use promptweave_injection::InjectedPrompt;
use promptweave_regex::RegexRule;
use promptweave_worldinfo::WorldBook;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub worlds: Vec<WorldBook>,
    #[serde(default)]
    pub chat: Chat,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub prompts: BTreeMap<String, Vec<InjectedPrompt>>,
    #[serde(default)]
    pub regex: Vec<RegexRule>,
    #[serde(default)]
    pub globals: VariableMap,
    /// Entries to force into the pass.
    #[serde(default)]
    pub activate: Vec<FragmentId>,
}

impl Scenario {
    pub fn from_path(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        let scenario = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;
        Ok(scenario)
    }

    /// The trigger text: explicit, else the last non-system message.
    pub fn trigger_text(&self) -> String {
        self.trigger.clone().unwrap_or_else(|| {
            self.chat
                .messages
                .iter()
                .rev()
                .find(|m| m.role != Role::System)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        })
    }

    /// Build a session holding the scenario's registries.
    pub fn into_session(self, config: AssemblyConfig, seed: Option<u64>) -> (AssemblySession, Chat, String) {
        let trigger = self.trigger_text();
        let mut session = new_session(config, seed).with_globals(self.globals);
        for book in self.worlds {
            session.add_source(Box::new(book));
        }
        for (key, prompts) in self.prompts {
            for prompt in prompts {
                session.inject_prompt(key.clone(), prompt);
            }
        }
        for rule in self.regex {
            session.activate_regex(rule);
        }
        for id in &self.activate {
            session.activate_entry(&id.world, id.uid);
        }
        (session, self.chat, trigger)
    }
}

/// Run the scenario through a pass-through renderer.
pub async fn assemble_scenario(
    scenario: Scenario,
    config: AssemblyConfig,
    seed: Option<u64>,
    preview: bool,
) -> Result<(AssemblyOutput, Chat), Box<dyn std::error::Error>> {
    let (mut session, mut chat, trigger) = scenario.into_session(config, seed);
    session.variables_mut().set_preview(preview);
    let output = session
        .assemble(&mut chat, &trigger, &PassThroughRenderer, &AssemblyOptions::default())
        .await?;
    Ok((output, chat))
}

pub async fn run(
    config: AssemblyConfig,
    path: &Path,
    seed: Option<u64>,
    preview: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = Scenario::from_path(path)?;
    let (output, _) = assemble_scenario(scenario, config, seed, preview).await?;

    for failure in &output.failures {
        eprintln!("⚠️  {}: {}", failure.source_id, failure.error);
    }
    eprintln!(
        "{} fragment(s) activated, {} message(s) assembled",
        output.activated.len(),
        output.messages.len()
    );
    println!("{}", serde_json::to_string_pretty(&output.messages)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "worlds": [{
            "name": "lore",
            "entries": [
                {"uid": 1, "key": ["dragon"], "content": "Dragons breathe fire.", "position": "at_depth", "depth": 0},
                {"uid": 2, "comment": "@INJECT pos=0", "constant": true, "content": "Story start."},
                {"uid": 3, "key": ["elf"], "content": "Elves live long.", "position": "at_depth", "depth": 0, "order": 200}
            ]
        }],
        "chat": {"messages": [
            {"role": "system", "content": "You are a narrator."},
            {"role": "user", "content": "Tell me about the dragon"}
        ]},
        "prompts": {"style": [{"content": "Be terse.", "anchor": {"mode": "pos", "pos": -1}}]},
        "regex": [{"id": "caps", "search": "/dragon/gi", "replace": "DRAGON", "applies": {"user": true}}],
        "activate": [{"world": "lore", "uid": 3}]
    }"#;

    #[test]
    fn trigger_defaults_to_last_non_system_message() {
        let scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        assert_eq!(scenario.trigger_text(), "Tell me about the dragon");
    }

    #[tokio::test]
    async fn scenario_assembles() {
        let scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        let (output, _) = assemble_scenario(scenario, AssemblyConfig::default(), Some(1), false)
            .await
            .unwrap();

        let contents: Vec<&str> = output.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "Story start.",
                "You are a narrator.",
                "Tell me about the DRAGON",
                "Dragons breathe fire.",
                "Elves live long.",
                "Be terse.",
            ]
        );
        assert!(output.failures.is_empty());
    }
}
