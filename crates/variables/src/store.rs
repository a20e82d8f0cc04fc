//! The variable store.
//!
//! Concrete scopes live in three places: the `global` map is owned by the
//! store, the `local` map by the [`Chat`], and message variables by each
//! [`promptweave_core::Message`], keyed per swipe. The `cache` scope is a
//! merged, read-only snapshot of all three.
//!
//! The snapshot is keyed to the caller's pass id and to the message being
//! rendered: it is rebuilt once per pass and message, every time when no
//! pass id is given, and on demand with `no_cache`. Writes go to exactly
//! one concrete scope and are mirrored into the snapshot so later reads in
//! the same pass see them, unless they land on a message the snapshot
//! excludes.

use crate::merge::merge_maps;
use crate::options::{
    Addressing, GetOptions, MessageFilter, Numeric, Scope, SetFlag, SetOptions, SetResult,
    StepOptions,
};
use crate::path::VarPath;
use promptweave_core::{Chat, VariableError, VariableMap};
use serde_json::Value;
use tracing::{debug, warn};

/// Key under which every snapshot records its trace counter.
pub const TRACE_KEY: &str = "_trace_id";

#[derive(Debug, Clone)]
struct CacheSnapshot {
    pass_id: Option<u64>,
    /// Messages before this index are folded in.
    upto: usize,
    values: VariableMap,
}

/// Scoped key/value store with a per-pass merged cache.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    globals: VariableMap,
    preview: bool,
    cache: Option<CacheSnapshot>,
    trace: u64,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_globals(mut self, globals: VariableMap) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    pub fn globals(&self) -> &VariableMap {
        &self.globals
    }

    /// Direct access for hosts that load or persist the global scope.
    pub fn globals_mut(&mut self) -> &mut VariableMap {
        self.invalidate();
        &mut self.globals
    }

    pub fn is_preview(&self) -> bool {
        self.preview
    }

    /// Enter or leave "preview, do not commit" mode.
    pub fn set_preview(&mut self, preview: bool) {
        self.preview = preview;
    }

    /// Number of snapshots built so far.
    pub fn trace_id(&self) -> u64 {
        self.trace
    }

    /// Drop the snapshot; the next cache read rebuilds it.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// The merged cache view for `addr`, rebuilt if stale.
    pub fn snapshot(&mut self, chat: &Chat, addr: &Addressing) -> &VariableMap {
        self.ensure_cache(chat, addr, false)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Read `key` (plus `opts.index`) from the requested scope.
    ///
    /// Returns `opts.defaults` when the value is absent at any level.
    pub fn get(
        &mut self,
        chat: &Chat,
        key: &str,
        addr: &Addressing,
        opts: &GetOptions,
    ) -> Result<Option<Value>, VariableError> {
        let path = VarPath::with_index(key, opts.index.as_deref())?;

        let found = match opts.scope {
            Scope::Cache => {
                let cache = self.ensure_cache(chat, addr, opts.no_cache);
                path.get(cache)?
            }
            scope => {
                let target = if scope == Scope::Message {
                    match resolve_or_warn(chat, addr, opts.filter.as_ref(), &path) {
                        Some(target) => Some(target),
                        None => return Ok(opts.defaults.clone()),
                    }
                } else {
                    None
                };
                read_scope(&self.globals, chat, &path, scope, target)?
            }
        };

        if found.is_none() {
            debug!(variable = %path, scope = %opts.scope, "Variable not set");
        }
        Ok(found.or_else(|| opts.defaults.clone()))
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Write `value` under `key` (plus `opts.index`) in one concrete scope.
    ///
    /// What is returned depends on `opts.results`. A write skipped by its
    /// flags reports the unchanged value as both old and new.
    pub fn set(
        &mut self,
        chat: &mut Chat,
        key: &str,
        value: Value,
        addr: &Addressing,
        opts: &SetOptions,
    ) -> Result<Option<Value>, VariableError> {
        if opts.scope == Scope::Cache {
            return Err(VariableError::ReadOnlyScope(Scope::Cache.to_string()));
        }
        let path = VarPath::with_index(key, opts.index.as_deref())?;

        let target = if opts.scope == Scope::Message {
            match resolve_or_warn(chat, addr, opts.filter.as_ref(), &path) {
                Some(target) => Some(target),
                None => return Ok(None),
            }
        } else {
            None
        };

        let old = read_scope(&self.globals, chat, &path, opts.scope, target)?;

        let allowed = match opts.flags {
            SetFlag::N => true,
            SetFlag::Nx => old.is_none(),
            SetFlag::Xx => old.is_some(),
            SetFlag::Nxs | SetFlag::Xxs => {
                let probe = GetOptions {
                    index: opts.index.clone(),
                    scope: Scope::Cache,
                    defaults: None,
                    filter: opts.filter,
                    no_cache: opts.no_cache,
                };
                let exists = self.get(chat, key, addr, &probe)?.is_some();
                if opts.flags == SetFlag::Nxs { !exists } else { exists }
            }
        };
        if !allowed {
            debug!(variable = %path, flags = ?opts.flags, "Write skipped by flags");
            let unchanged = old.clone();
            return Ok(self.result(chat, addr, opts.results, old, unchanged));
        }

        let new = if self.preview && opts.dry_run {
            debug!(variable = %path, scope = %opts.scope, "Preview mode, write not committed");
            let mut scratch = VariableMap::new();
            if let Some(current) = scope_map(&self.globals, chat, opts.scope, target)
                .and_then(|map| map.get(path.root()))
            {
                scratch.insert(path.root().to_string(), current.clone());
            }
            path.set(&mut scratch, value.clone(), opts.merge)?
        } else {
            let Some(map) = scope_map_mut(&mut self.globals, chat, opts.scope, target) else {
                warn!(variable = %path, scope = %opts.scope, "Write target vanished");
                return Ok(None);
            };
            let stored = path.set(map, value.clone(), opts.merge)?;
            debug!(variable = %path, scope = %opts.scope, "Variable written");
            stored
        };

        let excluded = target.is_some_and(|(message, _)| message >= cache_limit(chat, addr));
        if excluded {
            debug!(variable = %path, "Write lands outside the cached messages, not mirrored");
        } else if opts.no_cache || self.cache.is_some() {
            let cache = self.ensure_cache(chat, addr, opts.no_cache);
            path.set(cache, value, opts.merge)?;
        }

        Ok(self.result(chat, addr, opts.results, old, Some(new)))
    }

    /// Add `delta` to a numeric variable. Absent values count as zero.
    pub fn increment(
        &mut self,
        chat: &mut Chat,
        key: &str,
        delta: impl Into<Numeric>,
        addr: &Addressing,
        opts: &StepOptions,
    ) -> Result<Option<Value>, VariableError> {
        self.step(chat, key, delta.into(), addr, opts)
    }

    /// Subtract `delta` from a numeric variable.
    pub fn decrement(
        &mut self,
        chat: &mut Chat,
        key: &str,
        delta: impl Into<Numeric>,
        addr: &Addressing,
        opts: &StepOptions,
    ) -> Result<Option<Value>, VariableError> {
        self.step(chat, key, delta.into().negate(), addr, opts)
    }

    fn step(
        &mut self,
        chat: &mut Chat,
        key: &str,
        delta: Numeric,
        addr: &Addressing,
        opts: &StepOptions,
    ) -> Result<Option<Value>, VariableError> {
        let read = GetOptions {
            index: opts.set.index.clone(),
            scope: opts.set.scope,
            defaults: None,
            filter: opts.set.filter,
            no_cache: opts.set.no_cache,
        };
        let current = self.get(chat, key, addr, &read)?;
        let base = match &current {
            None | Some(Value::Null) => Numeric::Int(0),
            Some(value) => Numeric::from_value(value).ok_or_else(|| VariableError::NotNumeric {
                key: key.to_string(),
                value: value.to_string(),
            })?,
        };

        let next = base.add(delta).clamp(opts.min, opts.max);
        let write = SetOptions {
            merge: false,
            ..opts.set.clone()
        };
        self.set(chat, key, next.into_value(), addr, &write)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn result(
        &mut self,
        chat: &Chat,
        addr: &Addressing,
        results: SetResult,
        old: Option<Value>,
        new: Option<Value>,
    ) -> Option<Value> {
        match results {
            SetResult::Old => old,
            SetResult::New => new,
            SetResult::FullCache => Some(Value::Object(self.ensure_cache(chat, addr, false).clone())),
        }
    }

    fn ensure_cache(&mut self, chat: &Chat, addr: &Addressing, force: bool) -> &mut VariableMap {
        let snapshot = match self.cache.take() {
            Some(cache)
                if !force
                    && addr.pass_id.is_some()
                    && cache.pass_id == addr.pass_id
                    && cache.upto == cache_limit(chat, addr) =>
            {
                cache
            }
            _ => self.build_cache(chat, addr),
        };
        &mut self.cache.insert(snapshot).values
    }

    /// Fold global, local, then each earlier message's selected-swipe
    /// variables, then the trace counter.
    fn build_cache(&mut self, chat: &Chat, addr: &Addressing) -> CacheSnapshot {
        self.trace += 1;

        let mut values = VariableMap::new();
        merge_maps(&mut values, self.globals.clone());
        merge_maps(&mut values, chat.variables.clone());

        let upto = cache_limit(chat, addr);
        for message in &chat.messages[..upto] {
            if let Some(vars) = message.current_variables() {
                merge_maps(&mut values, vars.clone());
            }
        }
        values.insert(TRACE_KEY.to_string(), Value::from(self.trace));

        debug!(pass_id = ?addr.pass_id, trace = self.trace, upto, "Rebuilt variable cache");
        CacheSnapshot {
            pass_id: addr.pass_id,
            upto,
            values,
        }
    }
}

/// Number of leading messages whose variables the cache includes.
fn cache_limit(chat: &Chat, addr: &Addressing) -> usize {
    addr.message_id
        .unwrap_or(chat.messages.len())
        .min(chat.messages.len())
}

/// Resolve the `(message, swipe)` pair message-scoped access targets.
///
/// An explicit filter wins; otherwise the ambient addressing; otherwise the
/// most recent non-system message and its selected swipe.
pub fn resolve_message(
    chat: &Chat,
    addr: &Addressing,
    filter: Option<&MessageFilter>,
) -> Option<(usize, usize)> {
    let filter = filter.copied().unwrap_or_default();
    let len = chat.messages.len();

    let message_id = match (filter.id, filter.role) {
        (Some(id), role) => {
            let idx = from_end(id, len)?;
            if role.is_some_and(|r| chat.messages[idx].role != r) {
                return None;
            }
            idx
        }
        (None, Some(role)) => chat.messages.iter().rposition(|m| m.role == role)?,
        (None, None) => match addr.message_id {
            Some(id) => id,
            None => chat.last_non_system_index()?,
        },
    };
    let message = chat.messages.get(message_id)?;

    let ambient = filter.id.is_none() && filter.role.is_none() && addr.message_id == Some(message_id);
    let swipe_id = match filter.swipe_id {
        Some(swipe) => from_end(swipe, message.swipe_count())?,
        None if ambient => addr.swipe_id.unwrap_or(message.swipe_id),
        None => message.swipe_id,
    };
    (swipe_id < message.swipe_count()).then_some((message_id, swipe_id))
}

fn resolve_or_warn(
    chat: &Chat,
    addr: &Addressing,
    filter: Option<&MessageFilter>,
    path: &VarPath,
) -> Option<(usize, usize)> {
    let target = resolve_message(chat, addr, filter);
    if target.is_none() {
        warn!(variable = %path, ?filter, messages = chat.messages.len(), "No message matches the variable filter");
    }
    target
}

/// Index counted from the start, or from the end when negative.
fn from_end(value: i64, len: usize) -> Option<usize> {
    if value < 0 {
        len.checked_sub(usize::try_from(value.unsigned_abs()).ok()?)
    } else {
        usize::try_from(value).ok().filter(|v| *v < len)
    }
}

fn scope_map<'a>(
    globals: &'a VariableMap,
    chat: &'a Chat,
    scope: Scope,
    target: Option<(usize, usize)>,
) -> Option<&'a VariableMap> {
    match (scope, target) {
        (Scope::Global, _) => Some(globals),
        (Scope::Local, _) => Some(&chat.variables),
        (Scope::Message, Some((message, swipe))) => {
            chat.messages.get(message)?.variables_for(swipe)
        }
        _ => None,
    }
}

fn scope_map_mut<'a>(
    globals: &'a mut VariableMap,
    chat: &'a mut Chat,
    scope: Scope,
    target: Option<(usize, usize)>,
) -> Option<&'a mut VariableMap> {
    match (scope, target) {
        (Scope::Global, _) => Some(globals),
        (Scope::Local, _) => Some(&mut chat.variables),
        (Scope::Message, Some((message, swipe))) => chat
            .messages
            .get_mut(message)
            .map(|m| m.variables_for_mut(swipe)),
        _ => None,
    }
}

fn read_scope(
    globals: &VariableMap,
    chat: &Chat,
    path: &VarPath,
    scope: Scope,
    target: Option<(usize, usize)>,
) -> Result<Option<Value>, VariableError> {
    match scope_map(globals, chat, scope, target) {
        Some(map) => path.get(map),
        None => Ok(None),
    }
}
