//! Positional wire codec for the MakerSuite RPC payloads.
//!
//! The host application speaks `application/json+protobuf`: protobuf messages
//! serialized as nested JSON arrays with no field names. Every positional
//! index the crate relies on lives in this module behind a small typed view;
//! callers only see [`ConversationTurn`] and plain strings.
//!
//! Decoding never fails. A payload that does not have the expected shape
//! yields an empty result and the caller decides whether to abort.

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

const HISTORY_TURNS_SLOT: usize = 1;
const TURN_CONTENT_SLOT: usize = 0;
const TURN_ROLE_SLOT: usize = 1;
const FRAGMENT_TEXT_SLOT: usize = 1;
const FRAGMENT_THOUGHT_SLOT: usize = 12;

const CREATE_ENTRY_MIN_SLOTS: usize = 9;
const CREATE_ENTRY_ROLE_SLOT: usize = 8;
const CREATE_ENTRY_TOKEN_SLOTS: usize = 19;
const CREATE_ENTRY_TOKEN_SLOT: usize = 18;

const CREATE_ROOT_MIN_LEN: usize = 14;
const CREATE_ROOT_THREADS_SLOT: usize = 13;

const LIST_TITLE_MAX_CHARS: usize = 50;
const LIST_TITLE_FALLBACK: &str = "Compressed Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "model" => Some(Role::Model),
            _ => None,
        }
    }
}

/// One decoded message of a conversation.
///
/// `raw_entry` keeps the undecoded record so unknown fields survive when the
/// turn is carried into a rebuilt thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub raw_entry: Value,
}

impl ConversationTurn {
    /// A turn created during reconstruction rather than decoded from traffic.
    pub fn synthetic(role: Role, text: impl Into<String>) -> Self {
        let text = text.into();
        let raw_entry = CreatePromptEntry::from_parts(role, &text).to_value();
        Self {
            role,
            text,
            raw_entry,
        }
    }

    /// Length in UTF-16 code units, the unit the host counts text in.
    pub fn char_len(&self) -> usize {
        utf16_len(&self.text)
    }
}

fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Mirrors JavaScript truthiness, which is how the host reads its flag slots.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `[text_holder, text, ..., thought_flag@12, ...]`
struct FragmentRecord<'a>(&'a [Value]);

impl<'a> FragmentRecord<'a> {
    fn from_value(value: &'a Value) -> Option<Self> {
        value.as_array().map(|items| Self(items.as_slice()))
    }

    fn text(&self) -> Option<&'a str> {
        self.0.get(FRAGMENT_TEXT_SLOT).and_then(Value::as_str)
    }

    fn is_thought(&self) -> bool {
        self.0.get(FRAGMENT_THOUGHT_SLOT).is_some_and(is_truthy)
    }

    fn visible_text(&self) -> Option<&'a str> {
        if self.is_thought() {
            return None;
        }
        self.text()
    }
}

/// `[content, role, ...]` where content is a fragment list or a bare string.
struct TurnRecord<'a>(&'a [Value]);

impl<'a> TurnRecord<'a> {
    fn from_value(value: &'a Value) -> Option<Self> {
        let items = value.as_array()?;
        if items.len() < 2 {
            return None;
        }
        Some(Self(items.as_slice()))
    }

    fn role(&self) -> Option<Role> {
        self.0
            .get(TURN_ROLE_SLOT)
            .and_then(Value::as_str)
            .and_then(Role::parse)
    }

    fn text(&self) -> String {
        match self.0.get(TURN_CONTENT_SLOT) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(fragments)) => fragments
                .iter()
                .filter_map(FragmentRecord::from_value)
                .filter_map(|fragment| fragment.visible_text())
                .collect(),
            _ => String::new(),
        }
    }
}

fn history_turn_records(payload: &Value) -> Option<&Vec<Value>> {
    payload.as_array()?.get(HISTORY_TURNS_SLOT)?.as_array()
}

/// Decode a captured GenerateContent request body into ordered turns.
///
/// Records without a recognised role or with no visible text are dropped;
/// partial histories routinely contain both.
pub fn extract_turns(payload: &Value) -> Vec<ConversationTurn> {
    let Some(records) = history_turn_records(payload) else {
        debug!(target: "compressor::net", "prompt history payload has no turn list");
        return Vec::new();
    };

    let turns = records
        .iter()
        .filter_map(|entry| {
            let record = TurnRecord::from_value(entry)?;
            let role = record.role()?;
            let text = record.text();
            if text.is_empty() {
                return None;
            }
            Some(ConversationTurn {
                role,
                text,
                raw_entry: entry.clone(),
            })
        })
        .collect::<Vec<_>>();
    debug!(target: "compressor::net", count = turns.len(), "extracted turns from prompt history");
    turns
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryDescription {
    pub valid: bool,
    pub turn_count: usize,
    pub first_role: Option<String>,
    pub first_chunk_type: Option<String>,
    pub reason: Option<String>,
}

fn json_type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "undefined",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "chunks",
        Some(Value::Object(_)) => "object",
    }
}

/// Diagnostic summary of a history payload, used in logs and CLI reports.
pub fn describe_history(payload: &Value) -> HistoryDescription {
    if !payload.is_array() {
        return HistoryDescription {
            reason: Some(format!("payload is {}", json_type_name(Some(payload)))),
            ..HistoryDescription::default()
        };
    }
    let Some(records) = history_turn_records(payload) else {
        return HistoryDescription {
            reason: Some("missing turns array".to_string()),
            ..HistoryDescription::default()
        };
    };
    let first = records.first();
    HistoryDescription {
        valid: true,
        turn_count: records.len(),
        first_role: first
            .and_then(|turn| turn.get(TURN_ROLE_SLOT))
            .and_then(Value::as_str)
            .map(str::to_string),
        first_chunk_type: first
            .map(|turn| json_type_name(turn.get(TURN_CONTENT_SLOT)).to_string()),
        reason: None,
    }
}

/// Flatten a streamed response into its event records.
///
/// A stream arrives either as a bare event list or wrapped once as
/// `[[event, event, ...]]`; the wrapper is removed when its only element is a
/// list of lists.
fn normalize_events(payload: &Value) -> Vec<&Value> {
    let Some(items) = payload.as_array() else {
        return Vec::new();
    };
    if items.len() == 1
        && let Some(inner) = items[0].as_array()
        && inner.iter().all(Value::is_array)
    {
        return inner.iter().collect();
    }
    items.iter().collect()
}

/// `event[0]` → candidates; `candidate[0][0]` → parts.
fn event_parts(event: &Value) -> impl Iterator<Item = FragmentRecord<'_>> {
    event
        .get(0)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| candidate.get(0)?.get(0)?.as_array())
        .flatten()
        .filter_map(FragmentRecord::from_value)
}

/// Concatenate every non-thought text part of a model output stream.
pub fn collect_model_output_text(payload: &Value) -> String {
    let events = normalize_events(payload);
    let mut buffer = String::new();
    for event in &events {
        for part in event_parts(event) {
            if let Some(text) = part.visible_text() {
                buffer.push_str(text);
            }
        }
    }
    debug!(
        target: "compressor::net",
        event_count = events.len(),
        text_len = buffer.len(),
        "aggregated model output text"
    );
    buffer
}

/// Host-side token estimate: one token per four UTF-16 code units, at least
/// one for any non-empty text.
pub fn estimate_token_count(text: &str) -> u64 {
    let chars = utf16_len(text) as u64;
    if chars == 0 {
        return 0;
    }
    ((chars + 2) / 4).max(1)
}

/// Positional turn record accepted by CreatePrompt.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePromptEntry {
    pub text: String,
    pub role: Role,
    pub token_estimate: u64,
}

impl CreatePromptEntry {
    pub fn from_parts(role: Role, text: &str) -> Self {
        Self {
            text: text.to_string(),
            role,
            token_estimate: estimate_token_count(text),
        }
    }

    pub fn from_turn(turn: &ConversationTurn) -> Self {
        Self::from_parts(turn.role, &turn.text)
    }

    pub fn to_value(&self) -> Value {
        let mut slots = vec![Value::Null; CREATE_ENTRY_MIN_SLOTS];
        slots[0] = Value::String(self.text.clone());
        slots[CREATE_ENTRY_ROLE_SLOT] = Value::String(self.role.as_str().to_string());
        if self.token_estimate > 0 {
            slots.resize(CREATE_ENTRY_TOKEN_SLOTS, Value::Null);
            slots[CREATE_ENTRY_TOKEN_SLOT] = json!(self.token_estimate);
        }
        while slots.last().is_some_and(Value::is_null) {
            slots.pop();
        }
        Value::Array(slots)
    }
}

/// Replace the primary thread of a CreatePrompt body with `turns`.
///
/// The body must look like `[root, ...]` where `root` has at least 14 slots
/// and `root[13]` is a non-empty thread list. The secondary thread, when
/// present, is kept as is. Returns `None` on any mismatch.
pub fn rewrite_create_prompt_body(body: &str, turns: &[ConversationTurn]) -> Option<String> {
    let mut parsed: Value = serde_json::from_str(body).ok()?;
    let root = parsed.as_array_mut()?.get_mut(0)?.as_array_mut()?;
    if root.len() < CREATE_ROOT_MIN_LEN {
        return None;
    }
    let threads = root[CREATE_ROOT_THREADS_SLOT].as_array()?;
    if threads.is_empty() {
        return None;
    }
    let secondary = threads
        .get(1)
        .filter(|thread| is_truthy(thread))
        .cloned()
        .unwrap_or_else(|| json!([]));
    let rebuilt = turns
        .iter()
        .map(|turn| CreatePromptEntry::from_turn(turn).to_value())
        .collect::<Vec<_>>();
    root[CREATE_ROOT_THREADS_SLOT] = json!([rebuilt, secondary]);
    serde_json::to_string(&parsed).ok()
}

/// ResolveDriveResource body: `[[[[null, text]], role], ...]`.
pub fn encode_resolve_body(turns: &[ConversationTurn]) -> String {
    let history = turns
        .iter()
        .map(|turn| json!([[[null, turn.text]], turn.role.as_str()]))
        .collect::<Vec<_>>();
    Value::Array(history).to_string()
}

/// ListPrompts body: `[[title, 0]]`.
pub fn encode_list_body(turns: &[ConversationTurn]) -> String {
    let title = turns
        .first()
        .map(|turn| turn.text.chars().take(LIST_TITLE_MAX_CHARS).collect::<String>())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| LIST_TITLE_FALLBACK.to_string());
    json!([[title, 0]]).to_string()
}
