//! In-memory state store with idle expiry.
//!
//! State is ephemeral: a restart forgets every conversation. One mutex guards
//! the whole map and is only held for the copy in or out, never across a
//! model or tool call.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tellerline_core::error::MemoryError;
use tellerline_core::memory::StateStore;
use tellerline_core::state::ConversationState;
use tellerline_core::turn::ChatContext;
use tokio::sync::Mutex;
use tracing::debug;

/// Keeps conversations in a map, dropping those idle longer than the TTL.
///
/// Concurrent turns for the same chat are not serialized here: the later
/// `persist` replaces the earlier one.
pub struct InMemoryStateStore {
    states: Mutex<HashMap<String, ConversationState>>,
    ttl: Duration,
}

impl InMemoryStateStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
        }
    }

    /// Number of stored conversations, expired ones included.
    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.lock().await.is_empty()
    }

    /// Drop every expired conversation, returning how many went.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut states = self.states.lock().await;
        let before = states.len();
        states.retain(|_, state| !state.is_expired(self.ttl, now));
        before - states.len()
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(2 * 60 * 60))
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(
        &self,
        chat_id: &str,
        inbound: &ChatContext,
    ) -> Result<ConversationState, MemoryError> {
        let now = Utc::now();
        let mut states = self.states.lock().await;

        if states.get(chat_id).is_some_and(|s| s.is_expired(self.ttl, now)) {
            debug!(chat_id, "Conversation state expired");
            states.remove(chat_id);
        }
        let state = states.entry(chat_id.to_string()).or_insert_with(|| {
            debug!(chat_id, "Starting new conversation state");
            ConversationState::new(chat_id)
        });

        state.merge_inbound_context(inbound);
        state.touch();
        Ok(state.clone())
    }

    async fn persist(&self, state: &ConversationState) -> Result<(), MemoryError> {
        let mut snapshot = state.clone();
        snapshot.touch();
        self.states.lock().await.insert(snapshot.chat_id.clone(), snapshot);
        Ok(())
    }
}
