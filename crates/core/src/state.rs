//! Conversation state, what we know about one chat.
//!
//! The state store hands out copies of this value; the orchestrator mutates
//! its copy during a turn and writes it back once at the end.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::message::Role;
use crate::turn::ChatContext;
use crate::updates::{ContextUpdates, LANGUAGE_KEY, METADATA_KEY, SLOTS_KEY};

/// Metadata key holding the resolved timezone name.
pub const TIMEZONE_KEY: &str = "timezone";

/// One remembered message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Aggregated view of a chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub chat_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default)]
    pub slots: Map<String, Value>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    pub last_updated: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            language: None,
            slots: Map::new(),
            metadata: Map::new(),
            history: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Whether this snapshot is older than `ttl` at `now`.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_updated > ttl
    }

    /// Fold in what the chatbot sent with the message.
    ///
    /// Language and timezone only fill empty values; slots overwrite per key.
    pub fn merge_inbound_context(&mut self, context: &ChatContext) {
        if self.language.as_deref().is_none_or(str::is_empty) {
            if let Some(language) = context.language.as_deref().filter(|l| !l.is_empty()) {
                self.language = Some(language.to_string());
            }
        }
        for (key, value) in &context.slots {
            self.slots.insert(key.clone(), value.clone());
        }
        if let Some(timezone) = context.timezone.as_deref().filter(|t| !t.is_empty()) {
            self.metadata
                .entry(TIMEZONE_KEY)
                .or_insert_with(|| Value::String(timezone.to_string()));
        }
    }

    /// Apply a patch produced by tools or the orchestrator.
    ///
    /// Keys are only ever added or overwritten; unreserved keys land in
    /// metadata so nothing in a patch is dropped.
    pub fn apply_updates(&mut self, updates: &ContextUpdates) {
        for (key, value) in updates {
            match (key.as_str(), value) {
                (LANGUAGE_KEY, Value::String(language)) => {
                    if !language.is_empty() {
                        self.language = Some(language.clone());
                    }
                }
                (LANGUAGE_KEY, Value::Null) => {}
                (SLOTS_KEY, Value::Object(slots)) => {
                    for (k, v) in slots {
                        self.slots.insert(k.clone(), v.clone());
                    }
                }
                (METADATA_KEY, Value::Object(metadata)) => {
                    for (k, v) in metadata {
                        self.metadata.insert(k.clone(), v.clone());
                    }
                }
                (SLOTS_KEY | METADATA_KEY, _) => {}
                _ => {
                    self.metadata.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Append a message, keeping at most `max_messages` (0 = unbounded).
    pub fn append_history(&mut self, role: Role, content: impl Into<String>, max_messages: usize) {
        let content = content.into();
        if content.is_empty() {
            return;
        }
        self.history.push(HistoryEntry { role, content });
        if max_messages > 0 && self.history.len() > max_messages {
            let excess = self.history.len() - max_messages;
            self.history.drain(..excess);
        }
        self.touch();
    }

    /// Refresh the last-updated timestamp.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// The conversation language, or `default` when none is known.
    pub fn language_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.language.as_deref().filter(|l| !l.is_empty()).unwrap_or(default)
    }

    /// Timezone name remembered for this chat.
    pub fn timezone(&self) -> Option<&str> {
        self.metadata.get(TIMEZONE_KEY).and_then(Value::as_str)
    }
}
