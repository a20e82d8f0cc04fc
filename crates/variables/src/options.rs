//! Addressing and per-call options for the variable store.

use promptweave_core::Role;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a variable physically lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Process-wide; persisted by the host.
    Global,
    /// Bound to the current chat.
    Local,
    /// Bound to one message and its selected swipe.
    Message,
    /// Read-only merge of the other three, rebuilt per pass.
    #[default]
    Cache,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Local => "local",
            Scope::Message => "message",
            Scope::Cache => "cache",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Scope::Global),
            "local" | "chat" => Ok(Scope::Local),
            "message" => Ok(Scope::Message),
            "cache" => Ok(Scope::Cache),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// Explicit "what is being rendered right now" context.
///
/// Replaces any ambient notion of a current message: every store call is
/// told which message/swipe it runs for and which pass it belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addressing {
    /// Index of the message being rendered, if any.
    pub message_id: Option<usize>,
    /// Swipe of that message being rendered.
    pub swipe_id: Option<usize>,
    /// Identifier of the current assembly pass.
    pub pass_id: Option<u64>,
}

impl Addressing {
    pub fn for_pass(pass_id: u64) -> Self {
        Self {
            pass_id: Some(pass_id),
            ..Self::default()
        }
    }

    pub fn at_message(mut self, message_id: usize, swipe_id: Option<usize>) -> Self {
        self.message_id = Some(message_id);
        self.swipe_id = swipe_id;
        self
    }
}

/// Picks a concrete message/swipe for message-scoped access.
///
/// Negative `id` and `swipe_id` count from the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub swipe_id: Option<i64>,
}

impl MessageFilter {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.id.is_none() && self.swipe_id.is_none()
    }
}

/// Write gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetFlag {
    /// Always write.
    #[default]
    N,
    /// Only if absent from the target scope.
    Nx,
    /// Only if present in the target scope.
    Xx,
    /// Only if absent from the merged cache view.
    Nxs,
    /// Only if present in the merged cache view.
    Xxs,
}

impl std::str::FromStr for SetFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "n" => Ok(SetFlag::N),
            "nx" => Ok(SetFlag::Nx),
            "xx" => Ok(SetFlag::Xx),
            "nxs" => Ok(SetFlag::Nxs),
            "xxs" => Ok(SetFlag::Xxs),
            other => Err(format!("unknown set flag: {other}")),
        }
    }
}

/// What a write returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetResult {
    /// The value before the write.
    Old,
    /// The value after the write.
    #[default]
    New,
    /// The whole merged cache.
    FullCache,
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Extra path segments below the key.
    pub index: Option<String>,
    pub scope: Scope,
    /// Returned when the value is absent at any level.
    pub defaults: Option<Value>,
    pub filter: Option<MessageFilter>,
    /// Rebuild the cache before reading.
    pub no_cache: bool,
}

impl GetOptions {
    pub fn scope(scope: Scope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SetOptions {
    pub index: Option<String>,
    /// Must be a concrete scope.
    pub scope: Scope,
    pub flags: SetFlag,
    pub results: SetResult,
    pub filter: Option<MessageFilter>,
    /// Merge into the prior value instead of replacing it.
    pub merge: bool,
    /// Honour the store's preview mode. Set to `false` to commit anyway.
    pub dry_run: bool,
    /// Rebuild the cache before the write is mirrored into it.
    pub no_cache: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            index: None,
            scope: Scope::Message,
            flags: SetFlag::N,
            results: SetResult::New,
            filter: None,
            merge: false,
            dry_run: true,
            no_cache: false,
        }
    }
}

impl SetOptions {
    pub fn scope(scope: Scope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    pub fn with_flags(mut self, flags: SetFlag) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_results(mut self, results: SetResult) -> Self {
        self.results = results;
        self
    }
}

/// Options for increment/decrement.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    pub set: SetOptions,
    pub min: Option<Numeric>,
    pub max: Option<Numeric>,
}

impl StepOptions {
    pub fn scope(scope: Scope) -> Self {
        Self {
            set: SetOptions::scope(scope),
            ..Self::default()
        }
    }
}

/// A number that keeps integer precision when it can.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    pub fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(i) => i as f64,
            Numeric::Float(f) => f,
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Numeric::Int(i) => i
                .checked_neg()
                .map(Numeric::Int)
                .unwrap_or(Numeric::Float(-(i as f64))),
            Numeric::Float(f) => Numeric::Float(-f),
        }
    }

    /// Sum, staying integral while both sides are and the result fits.
    pub fn add(self, other: Numeric) -> Self {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => a
                .checked_add(b)
                .map(Numeric::Int)
                .unwrap_or(Numeric::Float(a as f64 + b as f64)),
            (a, b) => Numeric::Float(a.as_f64() + b.as_f64()),
        }
    }

    pub fn clamp(self, min: Option<Numeric>, max: Option<Numeric>) -> Self {
        if let Some(min) = min
            && self.as_f64() < min.as_f64()
        {
            return min;
        }
        if let Some(max) = max
            && self.as_f64() > max.as_f64()
        {
            return max;
        }
        self
    }

    /// Read a number from a stored value. Numeric strings are accepted.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Numeric::Int)
                .or_else(|| n.as_f64().map(Numeric::Float)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Numeric::Int)
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Numeric::Float))
            }
            Value::Bool(b) => Some(Numeric::Int(i64::from(*b))),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Numeric::Int(i) => Value::from(i),
            Numeric::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        Numeric::Int(value)
    }
}

impl From<i32> for Numeric {
    fn from(value: i32) -> Self {
        Numeric::Int(i64::from(value))
    }
}

impl From<f64> for Numeric {
    fn from(value: f64) -> Self {
        Numeric::Float(value)
    }
}
