//! # Tellerline Core
//!
//! Domain types, traits, and error definitions for the Tellerline chatbot
//! orchestrator. This crate has **no transport dependencies**: it defines the
//! model that the provider, store, tool, and agent crates implement against.
//!
//! ## Layout
//!
//! Every seam is a trait here (`Provider`, `Tool`, `StateStore`) with
//! implementations in their own crates, so tests swap in inline mocks.

pub mod error;
pub mod event;
pub mod language;
pub mod memory;
pub mod message;
pub mod provider;
pub mod state;
pub mod tool;
pub mod turn;
pub mod updates;

// Re-export key types at crate root for ergonomics
pub use error::{MemoryError, ProviderError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use language::Locale;
pub use memory::StateStore;
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use state::{ConversationState, HistoryEntry};
pub use tool::{Tool, ToolContext, ToolExecutionResult, ToolRegistry};
pub use turn::{AgentReply, ChatContext, ChatbotMessage, ReplyEvent};
pub use updates::{merge_context_updates, ContextUpdates};
