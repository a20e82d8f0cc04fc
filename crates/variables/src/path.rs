//! Variable paths.
//!
//! A path names a top-level variable plus optional nested segments:
//!
//! ```text
//! inventory
//! inventory.weapons[0].name
//! stats["max hp"]
//! ```
//!
//! Numeric segments index arrays; any other segment keys an object. A
//! string found where a container is expected is parsed as JSON first,
//! and a parse failure is reported instead of being swallowed.

use crate::merge::merge_values;
use promptweave_core::{VariableError, VariableMap};
use serde_json::Value;

/// A parsed variable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarPath {
    segments: Vec<String>,
}

impl VarPath {
    /// Parse a dotted/bracketed path.
    pub fn parse(input: &str) -> Result<Self, VariableError> {
        let segments = tokenize(input)?;
        if segments.is_empty() {
            return Err(VariableError::InvalidPath(input.to_string()));
        }
        Ok(Self { segments })
    }

    /// Parse `key`, then append the segments of `index` when given.
    pub fn with_index(key: &str, index: Option<&str>) -> Result<Self, VariableError> {
        let mut path = Self::parse(key)?;
        if let Some(index) = index.filter(|i| !i.trim().is_empty()) {
            path.segments.extend(tokenize(index)?);
        }
        Ok(path)
    }

    /// The top-level variable name.
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Segments below the top-level variable.
    pub fn nested(&self) -> &[String] {
        &self.segments[1..]
    }

    /// Read the value at this path.
    pub fn get(&self, map: &VariableMap) -> Result<Option<Value>, VariableError> {
        let Some(mut current) = map.get(self.root()).cloned() else {
            return Ok(None);
        };

        for segment in self.nested() {
            if let Value::String(raw) = &current {
                current = parse_structured(self.root(), raw)?;
            }
            let next = match &current {
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| items.get(idx))
                    .cloned(),
                Value::Object(fields) => fields.get(segment).cloned(),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Ok(None),
            }
        }

        Ok(Some(current))
    }

    /// Write `value` at this path, creating intermediate containers.
    ///
    /// With `merge`, the value is structurally merged into what is already
    /// there. Returns the value now stored at the path.
    pub fn set(
        &self,
        map: &mut VariableMap,
        value: Value,
        merge: bool,
    ) -> Result<Value, VariableError> {
        let root = self.root().to_string();
        let slot = map.entry(root.clone()).or_insert(Value::Null);
        let target = descend(slot, &root, self.nested())?;
        if merge {
            merge_values(target, value);
        } else {
            *target = value;
        }
        Ok(target.clone())
    }

    /// Whether a value exists at this path.
    pub fn exists(&self, map: &VariableMap) -> Result<bool, VariableError> {
        Ok(self.get(map)?.is_some())
    }
}

impl std::fmt::Display for VarPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.root())?;
        for segment in self.nested() {
            if segment.parse::<usize>().is_ok() {
                write!(f, "[{segment}]")?;
            } else {
                write!(f, ".{segment}")?;
            }
        }
        Ok(())
    }
}

fn parse_structured(key: &str, raw: &str) -> Result<Value, VariableError> {
    serde_json::from_str(raw).map_err(|e| VariableError::MalformedValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// How far past the end of an array a write may pad with nulls.
pub const MAX_ARRAY_GAP: usize = 1024;

/// Walk `segments` below `slot`, materialising containers on the way.
fn descend<'v>(
    slot: &'v mut Value,
    key: &str,
    segments: &[String],
) -> Result<&'v mut Value, VariableError> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(slot);
    };

    if let Value::String(raw) = &*slot {
        let parsed = parse_structured(key, raw)?;
        *slot = parsed;
    }

    let index = segment.parse::<usize>().ok();
    let fresh = match (&*slot, index) {
        (Value::Array(_), Some(_)) | (Value::Object(_), _) => None,
        (_, Some(_)) => Some(Value::Array(Vec::new())),
        (_, None) => Some(Value::Object(VariableMap::new())),
    };
    if let Some(fresh) = fresh {
        *slot = fresh;
    }

    let child = match (slot, index) {
        (Value::Array(items), Some(idx)) => {
            if idx - idx.min(items.len()) > MAX_ARRAY_GAP {
                return Err(VariableError::InvalidPath(format!("{key}[{segment}]")));
            }
            if items.len() <= idx {
                items.resize(idx + 1, Value::Null);
            }
            &mut items[idx]
        }
        (Value::Object(fields), _) => fields.entry(segment.clone()).or_insert(Value::Null),
        _ => return Err(VariableError::InvalidPath(segment.clone())),
    };
    descend(child, key, rest)
}

// ─── Tokenizer ───────────────────────────────────────────────────────

fn tokenize(input: &str) -> Result<Vec<String>, VariableError> {
    let invalid = || VariableError::InvalidPath(input.to_string());
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = input.trim().chars().peekable();
    // Set after `]`, where only a separator or another bracket may follow.
    let mut closed = false;

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if current.is_empty() && !closed {
                    return Err(invalid());
                }
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                closed = false;
                if chars.peek().is_none() {
                    return Err(invalid());
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                let mut inner = String::new();
                match chars.peek() {
                    Some(&quote) if quote == '"' || quote == '\'' => {
                        chars.next();
                        loop {
                            match chars.next() {
                                Some('\\') => {
                                    if let Some(escaped) = chars.next() {
                                        inner.push(escaped);
                                    }
                                }
                                Some(ch) if ch == quote => break,
                                Some(ch) => inner.push(ch),
                                None => return Err(invalid()),
                            }
                        }
                        if chars.next() != Some(']') {
                            return Err(invalid());
                        }
                    }
                    _ => loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(ch) => inner.push(ch),
                            None => return Err(invalid()),
                        }
                    },
                }
                let inner = inner.trim().to_string();
                if inner.is_empty() {
                    return Err(invalid());
                }
                segments.push(inner);
                closed = true;
            }
            ']' => return Err(invalid()),
            _ => {
                if closed {
                    return Err(invalid());
                }
                current.push(c);
            }
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> VariableMap {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn parses_dotted_and_bracketed_segments() {
        let path = VarPath::parse(r#"inv.weapons[0]["long name"].dmg"#).unwrap();
        assert_eq!(path.root(), "inv");
        assert_eq!(path.nested(), ["weapons", "0", "long name", "dmg"]);
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "a..b", "a.", ".a", "a[0", "a[]", "a]b", "a[0]b"] {
            assert!(VarPath::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn index_extends_path() {
        let path = VarPath::with_index("stats", Some("hp.max")).unwrap();
        assert_eq!(path.to_string(), "stats.hp.max");
    }

    #[test]
    fn reads_nested_values() {
        let vars = map(json!({"inv": {"items": ["sword", "shield"]}}));
        let path = VarPath::parse("inv.items[1]").unwrap();
        assert_eq!(path.get(&vars).unwrap(), Some(json!("shield")));
        let missing = VarPath::parse("inv.items[5]").unwrap();
        assert_eq!(missing.get(&vars).unwrap(), None);
    }

    #[test]
    fn serialized_values_are_parsed_on_indexed_access() {
        let vars = map(json!({"inv": "{\"gold\": 12}"}));
        let path = VarPath::parse("inv.gold").unwrap();
        assert_eq!(path.get(&vars).unwrap(), Some(json!(12)));
    }

    #[test]
    fn malformed_serialized_value_is_an_error() {
        let vars = map(json!({"inv": "{gold: 12"}));
        let path = VarPath::parse("inv.gold").unwrap();
        assert!(matches!(
            path.get(&vars),
            Err(VariableError::MalformedValue { key, .. }) if key == "inv"
        ));
    }

    #[test]
    fn set_creates_intermediate_containers() {
        let mut vars = VariableMap::new();
        VarPath::parse("party[1].name")
            .unwrap()
            .set(&mut vars, json!("Mira"), false)
            .unwrap();
        assert_eq!(Value::Object(vars), json!({"party": [null, {"name": "Mira"}]}));
    }

    #[test]
    fn set_rejects_indices_far_past_the_end() {
        for index in ["18446744073709551615", "99999999999", "1025"] {
            let mut vars = VariableMap::new();
            let err = VarPath::parse(&format!("inv[{index}]"))
                .unwrap()
                .set(&mut vars, json!(1), false)
                .unwrap_err();
            assert!(matches!(err, VariableError::InvalidPath(_)), "{index}");
        }

        let mut vars = VariableMap::new();
        VarPath::parse("inv[1024]")
            .unwrap()
            .set(&mut vars, json!(1), false)
            .unwrap();
        assert_eq!(vars["inv"].as_array().map(Vec::len), Some(1025));
    }

    #[test]
    fn set_with_merge_combines_objects() {
        let mut vars = map(json!({"stats": {"hp": 3, "mp": 1}}));
        let stored = VarPath::parse("stats")
            .unwrap()
            .set(&mut vars, json!({"hp": 9}), true)
            .unwrap();
        assert_eq!(stored, json!({"hp": 9, "mp": 1}));
    }
}
