//! What the model is told: the system prompt and the rendered user turn.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use tellerline_core::state::ConversationState;
use tellerline_core::turn::ChatbotMessage;

/// Default instructions for the banking assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a compliant digital banking assistant serving retail clients in Ukraine. \
Respond only in Ukrainian. \
If the request needs a back-end action, decide whether to call one of the available tools. \
Never invent account information; when unsure, ask a follow-up question. \
If the user asks about bank branches, first ask which city they are looking for. \
When the user asks again about their accounts, call the tools for fresh data instead of repeating earlier answers. \
Prefer calling a tool right away over promising a future action. \
For bank statements: if the accountid is unknown, call get_client_accounts_info, pick the account by currency or IBAN fragment, \
then confirm the account and period with the user before calling get_statement. \
Never use future dates for statements; ask for a period that ends today or earlier. \
If the user only says thanks without a new request, reply politely and do not call tools.";

const USER_PREAMBLE: &str = "Below is the latest customer input and known context.";

/// Resolve a timezone name, falling back to UTC for unknown or missing names.
///
/// Returns the zone and the name actually used.
pub fn resolve_timezone(name: Option<&str>) -> (Tz, &'static str) {
    match name.map(str::trim).filter(|n| !n.is_empty()).map(str::parse::<Tz>) {
        Some(Ok(tz)) => (tz, tz.name()),
        _ => (Tz::UTC, "UTC"),
    }
}

/// Render the user's message together with what we know about the chat.
///
/// The timezone is taken from the conversation first, then from the inbound
/// context.
pub fn render_user_message(
    message: &ChatbotMessage,
    state: &ConversationState,
    language: &str,
    now: DateTime<Utc>,
) -> String {
    let tz_name = state.timezone().or(message.context.timezone.as_deref());
    let (tz, tz_used) = resolve_timezone(tz_name);

    let payload = json!({
        "chat_id": message.chat_id,
        "user_id": message.user_id,
        "message_id": message.message_id,
        "language": language,
        "slots": state.slots,
        "text": message.text,
        "timestamp": {
            "iso": now.with_timezone(&tz).to_rfc3339(),
            "timezone": tz_used,
        },
    });
    let body = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());

    format!("{USER_PREAMBLE}\n```json\n{body}\n```")
}
