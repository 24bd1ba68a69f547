//! State store trait: where conversation state lives between turns.
//!
//! Stores hand out copies: callers mutate their copy during a turn and write
//! it back with `persist`. The last `persist` for an id wins.

use async_trait::async_trait;
use crate::error::MemoryError;
use crate::state::ConversationState;
use crate::turn::ChatContext;

/// The core StateStore trait.
///
/// Implementations: in-memory with TTL expiry (`tellerline-memory`).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Fetch the state for `chat_id`, creating or recreating it when absent
    /// or expired, with `inbound` merged in.
    async fn load(
        &self,
        chat_id: &str,
        inbound: &ChatContext,
    ) -> std::result::Result<ConversationState, MemoryError>;

    /// Store a snapshot of `state`, replacing whatever was there.
    async fn persist(&self, state: &ConversationState) -> std::result::Result<(), MemoryError>;
}
