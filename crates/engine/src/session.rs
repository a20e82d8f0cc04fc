//! The assembly session.
//!
//! Owns every piece of mutable state an assembly pass touches: fragment
//! sources, the variable store, regex rules, injected prompts, the forced
//! activation queue and the random source. Two sessions never share state,
//! so each test (or each chat) gets its own.

use promptweave_config::AssemblyConfig;
use promptweave_core::{Chat, Fragment, Message, VariableError, VariableMap};
use promptweave_injection::{InjectedPrompt, PromptRegistry, plan};
use promptweave_regex::{ApplySelector, HostRegexRegistry, RegexPipeline, RegexRule};
use promptweave_variables::{
    Addressing, GetOptions, Numeric, Scope, SetOptions, StepOptions, VariableStore,
};
use promptweave_worldinfo::{
    ActivationCondition, EntrySelector, FragmentSource, GroupResolver, enabled_entries,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use tracing::{debug, info, warn};

pub struct AssemblySession {
    pub(crate) config: AssemblyConfig,
    sources: Vec<Box<dyn FragmentSource>>,
    pub(crate) variables: VariableStore,
    pub(crate) regex: RegexPipeline,
    pub(crate) prompts: PromptRegistry,
    /// Fragments queued by `activate_entry` / `activate_by_keywords`.
    pub(crate) forced: Vec<Fragment>,
    last_pass: u64,
    current_pass: Option<u64>,
    pub(crate) rng: StdRng,
}

impl AssemblySession {
    pub fn new(config: AssemblyConfig) -> Self {
        let variables = VariableStore::new().with_preview(config.variables.preview_mode);
        Self {
            config,
            sources: Vec::new(),
            variables,
            regex: RegexPipeline::new(),
            prompts: PromptRegistry::new(),
            forced: Vec::new(),
            last_pass: 0,
            current_pass: None,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Use a deterministic random source.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Seed the global scope.
    pub fn with_globals(mut self, globals: VariableMap) -> Self {
        self.variables = self.variables.with_globals(globals);
        self
    }

    /// Attach the host collection that `host` regex rules are mirrored into.
    pub fn with_host_regex(mut self, host: Box<dyn HostRegexRegistry>) -> Self {
        self.regex = std::mem::take(&mut self.regex).with_host(host);
        self
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableStore {
        &mut self.variables
    }

    pub fn regex(&self) -> &RegexPipeline {
        &self.regex
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    // ─── Pass lifecycle ───────────────────────────────────────────────

    /// Start a pass and return its addressing context.
    ///
    /// The variable cache built during this pass is reused until
    /// [`AssemblySession::finish_pass`].
    pub fn begin_pass(&mut self) -> Addressing {
        self.last_pass += 1;
        self.current_pass = Some(self.last_pass);
        debug!(pass_id = self.last_pass, "Assembly pass started");
        Addressing::for_pass(self.last_pass)
    }

    /// End the current pass: spend one sticky activation from every regex
    /// rule and injected prompt, and clear the forced queue.
    pub fn finish_pass(&mut self) {
        self.regex.tick();
        self.prompts.tick();
        self.forced.clear();
        if let Some(pass_id) = self.current_pass.take() {
            debug!(pass_id, "Assembly pass finished");
        }
    }

    /// Addressing for calls made outside an explicit render.
    pub fn addressing(&self) -> Addressing {
        Addressing {
            pass_id: self.current_pass,
            ..Addressing::default()
        }
    }

    // ─── Fragment sources ─────────────────────────────────────────────

    /// Register a source. Replaces any existing source with the same name.
    pub fn add_source(&mut self, source: Box<dyn FragmentSource>) {
        let name = source.name().to_string();
        if let Some(existing) = self.sources.iter_mut().find(|s| s.name() == name) {
            info!(world = %name, "Replacing fragment source");
            *existing = source;
        } else {
            debug!(world = %name, "Added fragment source");
            self.sources.push(source);
        }
    }

    pub fn remove_source(&mut self, name: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.name() != name);
        self.sources.len() != before
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Applicable entries across every enabled source.
    pub fn get_enabled_entries(&self) -> Vec<Fragment> {
        enabled_entries(&self.sources)
    }

    /// Entries that activate for `keywords`, with groups resolved.
    pub fn select_activated_entries(
        &mut self,
        keywords: &str,
        condition: &ActivationCondition,
    ) -> Vec<Fragment> {
        let entries = self.get_enabled_entries();
        let selected =
            EntrySelector::new(&self.config.world_info).select(&entries, keywords, condition, &mut self.rng);
        GroupResolver::new(&self.config.world_info).resolve(selected, keywords, &mut self.rng)
    }

    /// Force one entry into the next pass.
    ///
    /// Returns the queued record, or `None` if no enabled source has it.
    pub fn activate_entry(&mut self, world: &str, uid: u64) -> Option<Fragment> {
        let Some(entry) = self
            .get_enabled_entries()
            .into_iter()
            .find(|e| e.world == world && e.uid == uid)
        else {
            warn!(world = %world, uid, "No enabled entry to activate");
            return None;
        };
        debug!(fragment = %entry.id(), "Queued forced activation");
        self.queue_forced(entry.clone());
        Some(entry)
    }

    /// Force every entry that activates for `keywords` into the next pass.
    pub fn activate_by_keywords(
        &mut self,
        keywords: &str,
        condition: &ActivationCondition,
    ) -> Vec<Fragment> {
        let entries = self.get_enabled_entries();
        let activated =
            EntrySelector::new(&self.config.world_info).select(&entries, keywords, condition, &mut self.rng);
        if activated.is_empty() {
            debug!(keywords = %keywords, "No entries matched forced keywords");
        }
        for entry in &activated {
            self.queue_forced(entry.clone());
        }
        activated
    }

    pub fn forced(&self) -> &[Fragment] {
        &self.forced
    }

    fn queue_forced(&mut self, entry: Fragment) {
        if !self.forced.iter().any(|f| f.id() == entry.id()) {
            self.forced.push(entry);
        }
    }

    // ─── Variables ────────────────────────────────────────────────────

    pub fn get_variable(
        &mut self,
        chat: &Chat,
        key: &str,
        opts: &GetOptions,
    ) -> Result<Option<Value>, VariableError> {
        let addr = self.addressing();
        self.variables.get(chat, key, &addr, opts)
    }

    pub fn set_variable(
        &mut self,
        chat: &mut Chat,
        key: &str,
        value: Value,
        opts: &SetOptions,
    ) -> Result<Option<Value>, VariableError> {
        let addr = self.addressing();
        self.variables.set(chat, key, value, &addr, opts)
    }

    pub fn increase_variable(
        &mut self,
        chat: &mut Chat,
        key: &str,
        delta: impl Into<Numeric>,
        opts: &StepOptions,
    ) -> Result<Option<Value>, VariableError> {
        let addr = self.addressing();
        self.variables.increment(chat, key, delta, &addr, opts)
    }

    pub fn decrease_variable(
        &mut self,
        chat: &mut Chat,
        key: &str,
        delta: impl Into<Numeric>,
        opts: &StepOptions,
    ) -> Result<Option<Value>, VariableError> {
        let addr = self.addressing();
        self.variables.decrement(chat, key, delta, &addr, opts)
    }

    pub fn get_global_variable(
        &mut self,
        chat: &Chat,
        key: &str,
    ) -> Result<Option<Value>, VariableError> {
        self.get_variable(chat, key, &GetOptions::scope(Scope::Global))
    }

    pub fn set_global_variable(
        &mut self,
        chat: &mut Chat,
        key: &str,
        value: Value,
    ) -> Result<Option<Value>, VariableError> {
        self.set_variable(chat, key, value, &SetOptions::scope(Scope::Global))
    }

    pub fn get_local_variable(
        &mut self,
        chat: &Chat,
        key: &str,
    ) -> Result<Option<Value>, VariableError> {
        self.get_variable(chat, key, &GetOptions::scope(Scope::Local))
    }

    pub fn set_local_variable(
        &mut self,
        chat: &mut Chat,
        key: &str,
        value: Value,
    ) -> Result<Option<Value>, VariableError> {
        self.set_variable(chat, key, value, &SetOptions::scope(Scope::Local))
    }

    pub fn get_message_variable(
        &mut self,
        chat: &Chat,
        key: &str,
    ) -> Result<Option<Value>, VariableError> {
        self.get_variable(chat, key, &GetOptions::scope(Scope::Message))
    }

    pub fn set_message_variable(
        &mut self,
        chat: &mut Chat,
        key: &str,
        value: Value,
    ) -> Result<Option<Value>, VariableError> {
        self.set_variable(chat, key, value, &SetOptions::scope(Scope::Message))
    }

    // ─── Regex ────────────────────────────────────────────────────────

    pub fn activate_regex(&mut self, rule: RegexRule) {
        self.regex.activate(rule);
    }

    /// Spend `amount` activations of a rule; returns `true` once removed.
    pub fn deactivate_regex(&mut self, id: &str, amount: i32) -> bool {
        self.regex.deactivate(id, amount)
    }

    pub fn apply_regex(&self, content: &str, selector: &ApplySelector<'_>) -> String {
        self.regex.apply(content, selector)
    }

    // ─── Injected prompts ─────────────────────────────────────────────

    pub fn inject_prompt(&mut self, key: impl Into<String>, prompt: InjectedPrompt) {
        self.prompts.inject(key, prompt);
    }

    pub fn get_injected_prompts(&self, key: &str) -> Option<String> {
        self.prompts.get(key)
    }

    pub fn has_injected_prompts(&self, key: &str) -> bool {
        self.prompts.has(key)
    }

    pub fn remove_injected_prompts(&mut self, key: &str, uid: Option<&str>) -> bool {
        self.prompts.remove(key, uid)
    }

    /// Splice every anchored injected prompt into `messages`.
    pub fn plan_injections(&self, messages: Vec<Message>) -> Vec<Message> {
        plan(messages, &self.prompts.instructions())
    }
}

impl std::fmt::Debug for AssemblySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblySession")
            .field("sources", &self.source_names())
            .field("forced", &self.forced.len())
            .field("last_pass", &self.last_pass)
            .field("current_pass", &self.current_pass)
            .finish_non_exhaustive()
    }
}
