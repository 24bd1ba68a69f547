//! Curated bank facts.
//!
//! Answers come from configuration so the model repeats vetted text instead
//! of inventing branch addresses or opening hours.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tellerline_core::error::ToolError;
use tellerline_core::tool::{Tool, ToolContext, ToolExecutionResult};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct BankInfoArgs {
    pub topic: String,
}

pub struct GetBankInfoTool {
    topics: BTreeMap<String, String>,
}

impl GetBankInfoTool {
    /// Topics are matched case-insensitively.
    pub fn new(topics: BTreeMap<String, String>) -> Self {
        Self {
            topics: topics
                .into_iter()
                .map(|(topic, text)| (topic.to_lowercase(), text))
                .collect(),
        }
    }
}

#[async_trait]
impl Tool for GetBankInfoTool {
    type Args = BankInfoArgs;

    fn name(&self) -> &str {
        "get_bank_info"
    }

    fn description(&self) -> &str {
        "Return curated information about the bank for a specific topic"
    }

    fn parameters_schema(&self) -> Value {
        let mut topic = json!({
            "type": "string",
            "description": "Identifier of the information needed about the bank"
        });
        if !self.topics.is_empty() {
            topic["enum"] = json!(self.topics.keys().collect::<Vec<_>>());
        }
        json!({
            "type": "object",
            "properties": { "topic": topic },
            "required": ["topic"]
        })
    }

    async fn call(&self, args: BankInfoArgs, ctx: ToolContext<'_>) -> Result<ToolExecutionResult, ToolError> {
        debug!(topic = %args.topic, "Bank info requested");
        Ok(match self.topics.get(&args.topic.trim().to_lowercase()) {
            Some(text) => ToolExecutionResult::for_model(text.clone()),
            None => ToolExecutionResult::send(ctx.locale.pick(
                "У мене немає інформації на цю тему.",
                "I don't have info on that topic.",
            )),
        })
    }
}
