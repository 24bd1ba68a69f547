//! Exchange-rate intent.

use async_trait::async_trait;
use tellerline_core::error::ToolError;
use tellerline_core::tool::{Tool, ToolContext, ToolExecutionResult};
use crate::balance::NoArgs;

/// Asks the legacy backend to show today's exchange rates.
pub struct GetExchangeTool;

#[async_trait]
impl Tool for GetExchangeTool {
    type Args = NoArgs;

    fn name(&self) -> &str {
        "get_exchange"
    }

    fn description(&self) -> &str {
        "Ask the chatbot backend to send the bank's current currency exchange rates to the client."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        })
    }

    async fn call(&self, _args: NoArgs, _ctx: ToolContext<'_>) -> Result<ToolExecutionResult, ToolError> {
        Ok(ToolExecutionResult::function("get_exchange"))
    }
}
