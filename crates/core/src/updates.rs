//! Context updates: partial patches produced by tools and fallbacks.
//!
//! A patch is a JSON object. Three keys are reserved:
//! - `language`: replaces the conversation language when non-empty
//! - `slots`: merged key by key into the conversation slots
//! - `metadata`: merged key by key into the conversation metadata
//!
//! Any other key is kept under `metadata` when the patch is applied.

use serde_json::{Map, Value};

/// A partial update to a conversation state.
pub type ContextUpdates = Map<String, Value>;

pub const LANGUAGE_KEY: &str = "language";
pub const SLOTS_KEY: &str = "slots";
pub const METADATA_KEY: &str = "metadata";

/// Combine several patches into one, in sequence order.
///
/// Later patches win for every key, except `slots` and `metadata`: when both
/// the accumulated value and the incoming value are objects, they are merged
/// key by key (later wins per inner key) instead of replaced wholesale.
pub fn merge_context_updates<'a, I>(updates: I) -> ContextUpdates
where
    I: IntoIterator<Item = &'a ContextUpdates>,
{
    let mut merged = ContextUpdates::new();
    for patch in updates {
        for (key, value) in patch {
            if key == SLOTS_KEY || key == METADATA_KEY {
                if let (Some(Value::Object(existing)), Value::Object(incoming)) =
                    (merged.get_mut(key), value)
                {
                    for (inner_key, inner_value) in incoming {
                        existing.insert(inner_key.clone(), inner_value.clone());
                    }
                    continue;
                }
            }
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Build a patch that sets a single metadata key.
pub fn metadata_patch(key: &str, value: impl Into<Value>) -> ContextUpdates {
    let mut inner = Map::new();
    inner.insert(key.to_string(), value.into());
    let mut patch = ContextUpdates::new();
    patch.insert(METADATA_KEY.to_string(), Value::Object(inner));
    patch
}

/// Build a patch from a `serde_json::json!` object literal.
///
/// Non-object values produce an empty patch.
pub fn patch_from(value: Value) -> ContextUpdates {
    match value {
        Value::Object(map) => map,
        _ => ContextUpdates::new(),
    }
}
