//! Injection planning. Turns instructions into splices against an
//! ordered message sequence.
//!
//! Positions are 1-based: inserting at position `p` makes the new message
//! the `p`-th element. `pos=0` is its own slot below position 1, so it
//! always ends up first.
//!
//! Splices are applied highest position first so earlier splices never
//! shift the slots of later ones. Equal positions go by ascending `order`,
//! then `target` instructions before `pos` instructions.

use crate::annotation::{Anchor, InjectionInstruction, Placement};
use promptweave_core::{Message, Role};
use promptweave_regex::Pattern;
use std::cmp::Reverse;
use tracing::{debug, warn};

/// A resolved splice.
#[derive(Debug)]
struct Splice<'a> {
    /// Sort key: 0 for `pos=0`, otherwise the 1-based position.
    position: usize,
    /// Tie-break after `order`: target-mode sorts before pos-mode.
    mode_rank: u8,
    instruction: &'a InjectionInstruction,
}

impl Splice<'_> {
    fn array_index(&self) -> usize {
        self.position.saturating_sub(1)
    }
}

/// Plan and apply `instructions` against `messages`.
///
/// Unresolvable instructions are logged and skipped.
pub fn plan(messages: Vec<Message>, instructions: &[InjectionInstruction]) -> Vec<Message> {
    if instructions.is_empty() {
        return messages;
    }

    let mut splices = Vec::new();
    let mut deferred = Vec::new();
    for instruction in instructions {
        match &instruction.anchor {
            Anchor::Pos { pos } => splices.push(Splice {
                position: resolve_pos(*pos, messages.len()),
                mode_rank: 1,
                instruction,
            }),
            Anchor::Target { role, index, at } => {
                match resolve_target(&messages, *role, *index, *at) {
                    Some(position) => splices.push(Splice {
                        position,
                        mode_rank: 0,
                        instruction,
                    }),
                    None => warn!(
                        source = %instruction.source,
                        role = %role,
                        index = *index,
                        "Injection target not found, skipping"
                    ),
                }
            }
            Anchor::Regex { .. } => deferred.push(instruction),
        }
    }

    let out = splice(messages, splices);

    // Regex anchors see content introduced by the first round.
    let mut regex_splices = Vec::new();
    for instruction in deferred {
        let Anchor::Regex { pattern, at } = &instruction.anchor else {
            continue;
        };
        let compiled = match Pattern::parse(pattern) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(source = %instruction.source, pattern = %pattern, error = %e, "Skipping injection with malformed pattern");
                continue;
            }
        };
        match out.iter().position(|m| compiled.is_match(&m.content)) {
            Some(idx) => regex_splices.push(Splice {
                position: match at {
                    Placement::Before => idx + 1,
                    Placement::After => idx + 2,
                },
                mode_rank: 0,
                instruction,
            }),
            None => warn!(source = %instruction.source, pattern = %pattern, "No message matches injection pattern, skipping"),
        }
    }
    splice(out, regex_splices)
}

/// Position of a `pos` instruction over `len` messages.
fn resolve_pos(pos: i64, len: usize) -> usize {
    let last = len as i64 + 1;
    match pos {
        0 => 0,
        p if p > 0 => p.min(last) as usize,
        // -1 appends after the last message.
        p => (last + 1 + p).clamp(1, last) as usize,
    }
}

/// Position for the `index`-th message of `role`.
fn resolve_target(messages: &[Message], role: Role, index: i64, at: Placement) -> Option<usize> {
    let occurrences: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == role)
        .map(|(i, _)| i + 1)
        .collect();

    let slot = match index {
        0 => return None,
        i if i > 0 => usize::try_from(i - 1).ok()?,
        i => occurrences
            .len()
            .checked_sub(usize::try_from(i.unsigned_abs()).ok()?)?,
    };
    let absolute = *occurrences.get(slot)?;
    Some(match at {
        Placement::Before => absolute,
        Placement::After => absolute + 1,
    })
}

fn splice(mut messages: Vec<Message>, mut splices: Vec<Splice<'_>>) -> Vec<Message> {
    splices.sort_by_key(|s| (Reverse(s.position), s.instruction.order, s.mode_rank));
    for s in splices {
        let idx = s.array_index().min(messages.len());
        debug!(
            source = %s.instruction.source,
            mode = s.instruction.anchor.mode(),
            index = idx,
            "Injecting message"
        );
        let mut message = Message::new(s.instruction.role, s.instruction.content.clone());
        message
            .metadata
            .insert("injected".into(), serde_json::Value::Bool(true));
        messages.insert(idx, message);
    }
    messages
}
