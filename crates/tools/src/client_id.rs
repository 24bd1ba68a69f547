//! Resolving which bank client a tool call is about.
//!
//! The model may pass the id explicitly; otherwise it is looked up in what
//! the conversation already knows.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tellerline_core::state::ConversationState;

/// Keys under which a client id may be remembered, in lookup order.
pub const CLIENT_ID_KEYS: [&str; 3] = ["client_id", "customerid", "customer_id"];

/// A numeric identifier the model may send as a number or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Number(i64),
    Text(String),
}

impl Identifier {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Identifier::Number(n) => Some(*n),
            Identifier::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identifier::Number(n) => write!(f, "{n}"),
            Identifier::Text(s) => f.write_str(s),
        }
    }
}

fn numeric(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Resolve the client id for a call.
///
/// An explicit argument decides on its own, even when it is not numeric.
/// Without one, each known key is tried in `slots` and then `metadata`.
pub fn resolve_client_id(explicit: Option<&Identifier>, state: &ConversationState) -> Option<i64> {
    if let Some(id) = explicit {
        return id.as_i64();
    }
    CLIENT_ID_KEYS.iter().find_map(|key| {
        state
            .slots
            .get(*key)
            .and_then(numeric)
            .or_else(|| state.metadata.get(*key).and_then(numeric))
    })
}
