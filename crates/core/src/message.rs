//! Message and Chat domain types.
//!
//! A chat is an ordered sequence of messages. Every message may carry
//! several alternate variants ("swipes") of which exactly one is selected,
//! and message-scoped variables are stored per swipe so that switching or
//! deleting a variant keeps its variables in lockstep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A flat key/value record of variables.
pub type VariableMap = Map<String, Value>;

/// Unique identifier for a chat (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions and injected context
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" | "char" | "model" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A single message in a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    #[serde(default = "new_message_id")]
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Display name of the sender, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The text of the currently selected swipe
    pub content: String,

    /// All alternate variants. Empty means `content` is the only one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub swipes: Vec<String>,

    /// Index of the selected variant
    #[serde(default)]
    pub swipe_id: usize,

    /// Message-scoped variables, keyed by swipe index
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<usize, VariableMap>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Optional metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: Map<String, Value>,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    /// Create a message with the given role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            name: None,
            content: content.into(),
            swipes: Vec::new(),
            swipe_id: 0,
            variables: BTreeMap::new(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Replace the variants of this message and select the first one.
    pub fn with_swipes(mut self, swipes: Vec<String>) -> Self {
        self.swipes = swipes;
        self.swipe_id = 0;
        if let Some(first) = self.swipes.first() {
            self.content = first.clone();
        }
        self
    }

    /// Number of variants (at least one).
    pub fn swipe_count(&self) -> usize {
        self.swipes.len().max(1)
    }

    /// Select a variant. Returns `false` if the index is out of range.
    pub fn select_swipe(&mut self, swipe_id: usize) -> bool {
        if swipe_id >= self.swipe_count() {
            return false;
        }
        self.swipe_id = swipe_id;
        if let Some(text) = self.swipes.get(swipe_id) {
            self.content = text.clone();
        }
        true
    }

    /// Delete a variant, dropping its variable record and shifting the
    /// records of later variants down by one.
    ///
    /// The last remaining variant cannot be deleted.
    pub fn delete_swipe(&mut self, swipe_id: usize) -> bool {
        if self.swipes.len() <= 1 || swipe_id >= self.swipes.len() {
            return false;
        }
        self.swipes.remove(swipe_id);

        let shifted: BTreeMap<usize, VariableMap> = std::mem::take(&mut self.variables)
            .into_iter()
            .filter(|(idx, _)| *idx != swipe_id)
            .map(|(idx, vars)| if idx > swipe_id { (idx - 1, vars) } else { (idx, vars) })
            .collect();
        self.variables = shifted;

        if self.swipe_id > swipe_id {
            self.swipe_id -= 1;
        }
        self.swipe_id = self.swipe_id.min(self.swipes.len() - 1);
        self.content = self.swipes[self.swipe_id].clone();
        true
    }

    /// Variables of the given variant, if any were written.
    pub fn variables_for(&self, swipe_id: usize) -> Option<&VariableMap> {
        self.variables.get(&swipe_id)
    }

    /// Mutable variables of the given variant, created on demand.
    pub fn variables_for_mut(&mut self, swipe_id: usize) -> &mut VariableMap {
        self.variables.entry(swipe_id).or_default()
    }

    /// Variables of the selected variant.
    pub fn current_variables(&self) -> Option<&VariableMap> {
        self.variables_for(self.swipe_id)
    }
}

/// A chat is an ordered sequence of messages plus chat-local variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Unique chat ID
    #[serde(default)]
    pub id: ChatId,

    /// Ordered messages
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Variables bound to this chat (the `local` scope)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub variables: VariableMap,

    /// When this chat was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    /// Create a new empty chat.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ChatId::new(),
            messages: Vec::new(),
            variables: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a chat from existing messages.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::new()
        }
    }

    /// Add a message to the chat.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Index of the most recent message that is not a system message.
    pub fn last_non_system_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role != Role::System)
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}
