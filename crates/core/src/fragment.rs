//! Fragment (world-info entry) domain types.
//!
//! A fragment is a unit of conditionally-activated content with keyword
//! triggers and placement metadata. Leading `@@decorator` lines of the
//! content are parsed exactly once, when the record is built, and cached on
//! the record as [`Decorator`] values.

use crate::message::Role;
use serde::{Deserialize, Serialize, Serializer};

/// Depth used when a depth-addressed fragment does not declare one.
pub const DEFAULT_DEPTH: i64 = 4;

/// Group weight used when a grouped fragment does not declare one.
pub const DEFAULT_GROUP_WEIGHT: u32 = 100;

/// Identity of a fragment: its owning collection plus its uid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentId {
    pub world: String,
    pub uid: u64,
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.world, self.uid)
    }
}

/// Where an activated fragment lands in the assembled prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// Before the character definition
    #[default]
    Before,
    /// After the character definition
    After,
    /// Above the author's note
    AnTop,
    /// Below the author's note
    AnBottom,
    /// Inside the chat history at an explicit depth
    AtDepth,
    /// Above the example messages
    EmTop,
    /// Below the example messages
    EmBottom,
}

/// How secondary keys gate activation alongside a primary key match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectiveLogic {
    /// Any secondary key must match.
    #[default]
    AndAny,
    /// Every secondary key must match.
    AndAll,
    /// No secondary key may match.
    NotAny,
    /// At least one secondary key must fail to match.
    NotAll,
}

/// A machine-readable directive stripped from the head of a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "snake_case")]
pub enum Decorator {
    /// `@@activate`: always activate, regardless of keys.
    Activate,
    /// `@@dont_activate`: never activate.
    DontActivate,
    /// `@@only_preload`: only evaluated while preloading, never activated.
    OnlyPreload,
    /// `@@dont_preload`: skipped while preloading.
    DontPreload,
    /// `@@inject <annotation>`: positional injection directive.
    Inject(String),
    /// Any other decorator, kept verbatim.
    Custom { name: String, args: String },
}

impl Decorator {
    fn parse(line: &str) -> Self {
        let body = line.trim_start_matches("@@").trim();
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        match name {
            "activate" => Decorator::Activate,
            "dont_activate" => Decorator::DontActivate,
            "only_preload" => Decorator::OnlyPreload,
            "dont_preload" => Decorator::DontPreload,
            "inject" => Decorator::Inject(args.to_string()),
            other => Decorator::Custom {
                name: other.to_string(),
                args: args.to_string(),
            },
        }
    }
}

/// Split leading decorator lines off `content`.
///
/// Parsing stops at the first line that is not a decorator. A line starting
/// with `@@@` is an escaped literal: one `@` is dropped and parsing stops.
pub fn parse_decorators(content: &str) -> (Vec<Decorator>, String) {
    let mut decorators = Vec::new();
    let mut rest = content;

    loop {
        let (line, remainder) = match rest.split_once('\n') {
            Some((line, remainder)) => (line, Some(remainder)),
            None => (rest, None),
        };
        let trimmed = line.trim_end_matches('\r');

        if let Some(escaped) = trimmed.strip_prefix("@@@") {
            let mut body = format!("@@{escaped}");
            if let Some(remainder) = remainder {
                body.push('\n');
                body.push_str(remainder);
            }
            return (decorators, body);
        }
        if !trimmed.starts_with("@@") {
            return (decorators, rest.to_string());
        }

        decorators.push(Decorator::parse(trimmed));
        match remainder {
            Some(remainder) => rest = remainder,
            None => return (decorators, String::new()),
        }
    }
}

/// Re-escape a leading `@@` so reparsing yields the same content.
fn serialize_content<S: Serializer>(content: &str, serializer: S) -> Result<S::Ok, S::Error> {
    if content.starts_with("@@") {
        serializer.serialize_str(&format!("@{content}"))
    } else {
        serializer.serialize_str(content)
    }
}

/// A world-info entry: conditionally activated content.
///
/// Immutable for the duration of an assembly pass. Build one with
/// [`Fragment::new`] or by deserializing; both paths strip decorators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "FragmentRecord", rename_all = "camelCase")]
pub struct Fragment {
    /// Unique within the owning collection.
    pub uid: u64,
    /// Name of the owning collection.
    pub world: String,
    /// Title / memo. Injection fragments carry their annotation here.
    pub comment: String,
    /// Primary keys.
    pub key: Vec<String>,
    /// Secondary keys.
    pub keysecondary: Vec<String>,
    /// Content with decorator lines removed.
    #[serde(serialize_with = "serialize_content")]
    pub content: String,
    /// Decorators parsed from the head of the original content.
    pub decorators: Vec<Decorator>,
    pub constant: bool,
    pub selective: bool,
    pub selective_logic: SelectiveLogic,
    /// Activation chance in percent.
    pub probability: u32,
    pub use_probability: bool,
    /// Comma-separated group names.
    pub group: String,
    pub group_override: bool,
    pub group_weight: Option<u32>,
    pub use_group_scoring: Option<bool>,
    /// Tie-break; lower values win and sort first.
    pub order: i64,
    pub position: Position,
    pub depth: Option<i64>,
    /// Role used when the fragment is placed inside the chat history.
    pub role: Option<Role>,
    pub disable: bool,
    pub vectorized: bool,
    pub case_sensitive: Option<bool>,
    pub match_whole_words: Option<bool>,
    /// Declared but not evaluated by the activation pass.
    pub sticky: Option<u32>,
    pub cooldown: Option<u32>,
    pub delay: Option<u32>,
}

impl Fragment {
    /// Create a fragment, stripping leading decorators from `content`.
    pub fn new(uid: u64, content: impl Into<String>) -> Self {
        FragmentRecord {
            uid,
            content: content.into(),
            ..FragmentRecord::default()
        }
        .into()
    }

    pub fn id(&self) -> FragmentId {
        FragmentId {
            world: self.world.clone(),
            uid: self.uid,
        }
    }

    /// Non-empty group names this fragment belongs to.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.group.split(',').map(str::trim).filter(|g| !g.is_empty())
    }

    pub fn has_decorator(&self, decorator: &Decorator) -> bool {
        self.decorators.contains(decorator)
    }

    /// The `@@inject` annotation, if present.
    pub fn inject_annotation(&self) -> Option<&str> {
        self.decorators.iter().find_map(|d| match d {
            Decorator::Inject(args) => Some(args.as_str()),
            _ => None,
        })
    }

    /// Group weight, falling back to `default` and floored at 1.
    pub fn effective_weight(&self, default: u32) -> u32 {
        self.group_weight.unwrap_or(default).max(1)
    }

    pub fn with_world(mut self, world: impl Into<String>) -> Self {
        self.world = world.into();
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_secondary_keys<I, S>(mut self, keys: I, logic: SelectiveLogic) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keysecondary = keys.into_iter().map(Into::into).collect();
        self.selective = true;
        self.selective_logic = logic;
        self
    }

    pub fn with_constant(mut self, constant: bool) -> Self {
        self.constant = constant;
        self
    }

    pub fn with_probability(mut self, probability: u32) -> Self {
        self.probability = probability.min(100);
        self.use_probability = true;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_group_override(mut self, group_override: bool) -> Self {
        self.group_override = group_override;
        self
    }

    pub fn with_group_weight(mut self, weight: u32) -> Self {
        self.group_weight = Some(weight);
        self
    }

    pub fn with_group_scoring(mut self, scoring: bool) -> Self {
        self.use_group_scoring = Some(scoring);
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn with_depth(mut self, depth: i64) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_disabled(mut self, disable: bool) -> Self {
        self.disable = disable;
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = Some(case_sensitive);
        self
    }

    pub fn with_whole_words(mut self, whole_words: bool) -> Self {
        self.match_whole_words = Some(whole_words);
        self
    }
}

/// Wire shape of a fragment, before decorators are split off.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FragmentRecord {
    uid: u64,
    world: String,
    comment: String,
    key: Vec<String>,
    keysecondary: Vec<String>,
    content: String,
    decorators: Vec<Decorator>,
    constant: bool,
    selective: bool,
    selective_logic: SelectiveLogic,
    probability: u32,
    use_probability: bool,
    group: String,
    group_override: bool,
    group_weight: Option<u32>,
    use_group_scoring: Option<bool>,
    order: i64,
    position: Position,
    depth: Option<i64>,
    role: Option<Role>,
    disable: bool,
    vectorized: bool,
    case_sensitive: Option<bool>,
    match_whole_words: Option<bool>,
    sticky: Option<u32>,
    cooldown: Option<u32>,
    delay: Option<u32>,
}

impl Default for FragmentRecord {
    fn default() -> Self {
        Self {
            uid: 0,
            world: String::new(),
            comment: String::new(),
            key: Vec::new(),
            keysecondary: Vec::new(),
            content: String::new(),
            decorators: Vec::new(),
            constant: false,
            selective: true,
            selective_logic: SelectiveLogic::AndAny,
            probability: 100,
            use_probability: false,
            group: String::new(),
            group_override: false,
            group_weight: None,
            use_group_scoring: None,
            order: 100,
            position: Position::Before,
            depth: None,
            role: None,
            disable: false,
            vectorized: false,
            case_sensitive: None,
            match_whole_words: None,
            sticky: None,
            cooldown: None,
            delay: None,
        }
    }
}

impl From<FragmentRecord> for Fragment {
    fn from(record: FragmentRecord) -> Self {
        let (mut decorators, content) = parse_decorators(&record.content);
        // Decorators serialized alongside already-stripped content come first.
        let mut all = record.decorators;
        all.append(&mut decorators);
        Self {
            uid: record.uid,
            world: record.world,
            comment: record.comment,
            key: record.key,
            keysecondary: record.keysecondary,
            content,
            decorators: all,
            constant: record.constant,
            selective: record.selective,
            selective_logic: record.selective_logic,
            probability: record.probability.min(100),
            use_probability: record.use_probability,
            group: record.group,
            group_override: record.group_override,
            group_weight: record.group_weight,
            use_group_scoring: record.use_group_scoring,
            order: record.order,
            position: record.position,
            depth: record.depth,
            role: record.role,
            disable: record.disable,
            vectorized: record.vectorized,
            case_sensitive: record.case_sensitive,
            match_whole_words: record.match_whole_words,
            sticky: record.sticky,
            cooldown: record.cooldown,
            delay: record.delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decorators_are_stripped_once() {
        let frag = Fragment::new(1, "@@activate\n@@depth 3\nThe tavern is loud.");
        assert_eq!(frag.content, "The tavern is loud.");
        assert_eq!(frag.decorators.len(), 2);
        assert!(frag.has_decorator(&Decorator::Activate));
        assert_eq!(
            frag.decorators[1],
            Decorator::Custom {
                name: "depth".into(),
                args: "3".into()
            }
        );
    }

    #[test]
    fn decorator_parsing_stops_at_content() {
        let (decorators, content) = parse_decorators("Intro\n@@activate");
        assert!(decorators.is_empty());
        assert_eq!(content, "Intro\n@@activate");
    }

    #[test]
    fn triple_at_escapes_literal_line() {
        let (decorators, content) = parse_decorators("@@dont_activate\n@@@literal\nrest");
        assert_eq!(decorators, vec![Decorator::DontActivate]);
        assert_eq!(content, "@@literal\nrest");
    }

    #[test]
    fn inject_annotation_is_exposed() {
        let frag = Fragment::new(2, "@@inject pos=0 role=user\nHello");
        assert_eq!(frag.inject_annotation(), Some("pos=0 role=user"));
    }

    #[test]
    fn deserializing_strips_decorators() {
        let frag: Fragment = serde_json::from_str(
            r#"{"uid":7,"key":["dragon"],"content":"@@dont_activate\nScales.","groupOverride":true,"position":"at_depth","depth":2}"#,
        )
        .unwrap();
        assert_eq!(frag.content, "Scales.");
        assert!(frag.has_decorator(&Decorator::DontActivate));
        assert!(frag.group_override);
        assert_eq!(frag.position, Position::AtDepth);
        assert_eq!(frag.probability, 100);
        assert_eq!(frag.order, 100);
    }

    #[test]
    fn serialized_fragment_keeps_decorators() {
        let frag = Fragment::new(3, "@@activate\nBody");
        let json = serde_json::to_string(&frag).unwrap();
        let back: Fragment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "Body");
        assert_eq!(back.decorators, vec![Decorator::Activate]);
    }

    #[test]
    fn escaped_line_survives_a_round_trip() {
        for raw in ["@@@literal line\nbody", "@@activate\n@@@@twice"] {
            let frag = Fragment::new(8, raw);
            let json = serde_json::to_string(&frag).unwrap();
            let back: Fragment = serde_json::from_str(&json).unwrap();
            assert_eq!(back.content, frag.content, "{raw}");
            assert_eq!(back.decorators, frag.decorators, "{raw}");
        }
        assert_eq!(Fragment::new(8, "@@@literal line\nbody").content, "@@literal line\nbody");
    }

    #[test]
    fn groups_split_on_commas() {
        let frag = Fragment::new(4, "x").with_group("weather, mood,,");
        assert_eq!(frag.groups().collect::<Vec<_>>(), vec!["weather", "mood"]);
    }

    #[test]
    fn weight_defaults_and_floors() {
        assert_eq!(
            Fragment::new(5, "x").effective_weight(DEFAULT_GROUP_WEIGHT),
            DEFAULT_GROUP_WEIGHT
        );
        assert_eq!(Fragment::new(5, "x").effective_weight(7), 7);
        assert_eq!(Fragment::new(6, "x").with_group_weight(0).effective_weight(7), 1);
        assert_eq!(Fragment::new(6, "x").effective_weight(0), 1);
    }
}
