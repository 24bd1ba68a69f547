//! Conversation state store implementations for Tellerline.

pub mod in_memory;

pub use in_memory::InMemoryStateStore;
