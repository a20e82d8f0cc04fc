//! Structural merge used by the cache snapshot and by `merge` writes.
//!
//! Objects deep-merge key by key. Arrays are replaced wholesale by the
//! incoming array. Any other combination is replaced by the incoming value.

use promptweave_core::VariableMap;
use serde_json::Value;

/// Merge `incoming` into `existing` in place.
pub fn merge_values(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(target), Value::Object(source)) => merge_maps(target, source),
        (slot, incoming) => *slot = incoming,
    }
}

/// Merge every key of `layer` into `target`.
pub fn merge_maps(target: &mut VariableMap, layer: VariableMap) {
    for (key, value) in layer {
        match target.get_mut(&key) {
            Some(existing) => merge_values(existing, value),
            None => {
                target.insert(key, value);
            }
        }
    }
}
