//! Failure taxonomy of a turn and the replies served when one fails.

use tellerline_core::error::{ProviderError, ToolError};
use tellerline_core::language::Locale;
use tellerline_core::turn::AgentReply;
use tellerline_core::updates::metadata_patch;

/// Metadata key recording why the last turn fell back.
pub const LAST_ERROR_KEY: &str = "last_error";

/// Returned when a turn was cancelled before it finished.
///
/// Nothing is persisted for a cancelled turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("turn cancelled")]
pub struct TurnCancelled;

/// Why a turn could not produce a regular reply.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TurnError {
    #[error("model call failed: {0}")]
    Upstream(ProviderError),

    #[error("invalid arguments for tool '{tool_name}': {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("tool '{tool_name}' failed: {reason}")]
    ToolFailed { tool_name: String, reason: String },

    #[error("model returned an empty response")]
    EmptyModelResponse,

    #[error("model kept requesting tools after {0} rounds")]
    ToolRoundsExceeded(u32),

    #[error("cancelled")]
    Cancelled,
}

impl TurnError {
    /// Name recorded under `metadata.last_error`.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            TurnError::Upstream(_) => "UpstreamError",
            TurnError::InvalidArguments { .. } => "InvalidArguments",
            TurnError::ToolFailed { .. } => "ToolExecutionFailure",
            TurnError::EmptyModelResponse => "EmptyModelResponse",
            TurnError::ToolRoundsExceeded(_) => "ToolRoundsExceeded",
            TurnError::Cancelled => "Cancelled",
        }
    }
}

impl From<ProviderError> for TurnError {
    fn from(e: ProviderError) -> Self {
        if e.is_cancelled() {
            TurnError::Cancelled
        } else {
            TurnError::Upstream(e)
        }
    }
}

impl From<ToolError> for TurnError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::InvalidArguments { tool_name, reason } => {
                TurnError::InvalidArguments { tool_name, reason }
            }
            ToolError::ExecutionFailed { tool_name, reason } => {
                TurnError::ToolFailed { tool_name, reason }
            }
            ToolError::NotFound(tool_name) => TurnError::ToolFailed {
                tool_name,
                reason: "not registered".into(),
            },
        }
    }
}

pub fn fallback_text(locale: Locale) -> &'static str {
    locale.pick(
        "Вибачте, наразі я не можу опрацювати запит. Будь ласка, спробуйте знову трохи пізніше.",
        "Sorry, I cannot process this request right now. Please try again in a moment.",
    )
}

pub fn tool_unavailable_text(locale: Locale) -> &'static str {
    locale.pick(
        "Запитаний інструмент зараз недоступний.",
        "The requested tool is unavailable right now.",
    )
}

/// The apology served on failure, noting the failure kind in metadata.
pub(crate) fn fallback_reply(locale: Locale, error: &TurnError) -> AgentReply {
    AgentReply::notice(fallback_text(locale), metadata_patch(LAST_ERROR_KEY, error.kind()))
}
