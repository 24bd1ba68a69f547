//! Inbound and outbound payloads of a single chat turn.
//!
//! The legacy chatbot posts a [`ChatbotMessage`] and receives an
//! [`AgentReply`] serialized as `{ "event": ..., "data": ... }`.

use serde::{Deserialize, Serialize};
use crate::updates::ContextUpdates;

/// Context snapshot the chatbot already knows about the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatContext {
    /// IETF language tag preferred by the user (e.g. "uk", "en")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// End-user timezone identifier, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Slot values already collected by the chatbot
    #[serde(default)]
    pub slots: serde_json::Map<String, serde_json::Value>,
}

/// Inbound payload posted by the legacy chatbot backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatbotMessage {
    /// Identifier of the chat; doubles as the conversation id
    pub chat_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Raw text provided by the end user
    pub text: String,

    #[serde(default = "default_private")]
    pub is_private: bool,

    #[serde(default)]
    pub context: ChatContext,

    /// Transport metadata (user agent, experiments, ...)
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_private() -> bool {
    true
}

impl ChatbotMessage {
    /// Minimal message with only a chat id and text.
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: None,
            message_id: None,
            text: text.into(),
            is_private: true,
            context: ChatContext::default(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// What the chatbot should do with `data`.
///
/// `send` delivers text to the user, `function` hands an instruction to the
/// legacy backend; any other tag is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReplyEvent {
    Send,
    Function,
    Other(String),
}

impl ReplyEvent {
    pub fn as_str(&self) -> &str {
        match self {
            ReplyEvent::Send => "send",
            ReplyEvent::Function => "function",
            ReplyEvent::Other(tag) => tag,
        }
    }

    pub fn is_send(&self) -> bool {
        matches!(self, ReplyEvent::Send)
    }
}

impl From<String> for ReplyEvent {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "send" => ReplyEvent::Send,
            "function" => ReplyEvent::Function,
            _ => ReplyEvent::Other(tag),
        }
    }
}

impl From<ReplyEvent> for String {
    fn from(event: ReplyEvent) -> Self {
        event.as_str().to_string()
    }
}

impl std::fmt::Display for ReplyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The final output of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub event: ReplyEvent,

    pub data: String,

    /// Patch to merge into the stored state; never sent to the chatbot.
    #[serde(skip)]
    pub context_updates: ContextUpdates,

    /// Whether the reply text belongs in conversation history.
    #[serde(skip)]
    pub record_in_history: bool,
}

impl AgentReply {
    /// A reply produced by the model or a tool.
    pub fn new(event: ReplyEvent, data: impl Into<String>, context_updates: ContextUpdates) -> Self {
        Self {
            event,
            data: data.into(),
            context_updates,
            record_in_history: true,
        }
    }

    /// A text reply produced by the model or a tool.
    pub fn send(data: impl Into<String>, context_updates: ContextUpdates) -> Self {
        Self::new(ReplyEvent::Send, data, context_updates)
    }

    /// A canned notice (fallback, unavailable tool) kept out of history.
    pub fn notice(data: impl Into<String>, context_updates: ContextUpdates) -> Self {
        Self {
            record_in_history: false,
            ..Self::send(data, context_updates)
        }
    }

    /// Text that should be appended to history, if any.
    pub fn history_text(&self) -> Option<&str> {
        (self.record_in_history && self.event.is_send() && !self.data.is_empty())
            .then_some(self.data.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updates::metadata_patch;

    #[test]
    fn inbound_defaults() {
        let msg: ChatbotMessage =
            serde_json::from_str(r#"{"chat_id": "c1", "text": "привіт"}"#).unwrap();
        assert_eq!(msg.chat_id, "c1");
        assert!(msg.is_private);
        assert!(msg.context.language.is_none());
        assert!(msg.context.slots.is_empty());
    }

    #[test]
    fn inbound_with_context() {
        let msg: ChatbotMessage = serde_json::from_str(
            r#"{"chat_id": "c1", "text": "hi", "is_private": false,
                "context": {"language": "en", "timezone": "Europe/Kyiv", "slots": {"client_id": 5}}}"#,
        )
        .unwrap();
        assert!(!msg.is_private);
        assert_eq!(msg.context.language.as_deref(), Some("en"));
        assert_eq!(msg.context.slots["client_id"], 5);
    }

    #[test]
    fn reply_serializes_without_updates() {
        let reply = AgentReply::send("hello", metadata_patch("k", "v"));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json, serde_json::json!({"event": "send", "data": "hello"}));
    }

    #[test]
    fn custom_event_tags_pass_through() {
        let event = ReplyEvent::from("handoff".to_string());
        assert_eq!(event, ReplyEvent::Other("handoff".into()));
        assert_eq!(serde_json::to_string(&event).unwrap(), "\"handoff\"");
        assert_eq!(ReplyEvent::from("function".to_string()), ReplyEvent::Function);
    }

    #[test]
    fn notices_are_not_recorded() {
        assert_eq!(AgentReply::send("ok", ContextUpdates::new()).history_text(), Some("ok"));
        assert_eq!(AgentReply::notice("sorry", ContextUpdates::new()).history_text(), None);
        assert_eq!(AgentReply::send("", ContextUpdates::new()).history_text(), None);
        let function = AgentReply::new(ReplyEvent::Function, "get_balance", ContextUpdates::new());
        assert_eq!(function.history_text(), None);
    }
}
