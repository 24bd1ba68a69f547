//! Turn orchestration for Tellerline.
//!
//! A turn follows a fixed shape:
//!
//! 1. **Load** the conversation and record the user's message
//! 2. **Ask** the model, offering every registered tool
//! 3. **Dispatch** requested tools; an instruction for the chatbot ends the turn
//! 4. **Post-process**: tool data goes back to the model for a final answer
//! 5. **Persist** the updated conversation
//!
//! Failures never escape as errors: the caller gets a localized apology and
//! the conversation keeps the user's message.

pub mod fallback;
pub mod orchestrator;
pub mod prompt;

pub use fallback::{fallback_text, tool_unavailable_text, TurnCancelled};
pub use orchestrator::{OrchestratorSettings, TurnOrchestrator};
pub use prompt::DEFAULT_SYSTEM_PROMPT;
