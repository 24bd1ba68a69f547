//! Tool trait and the registry that dispatches model-requested calls.
//!
//! Tools are what let the assistant do more than talk: hand an instruction
//! to the legacy backend, or fetch data the model then summarises.
//!
//! Every tool declares a typed argument struct. The registry parses the raw
//! JSON string from the model into that struct before invoking the tool, so
//! a malformed call never reaches tool code.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::error::ToolError;
use crate::language::Locale;
use crate::provider::ToolDefinition;
use crate::state::ConversationState;
use crate::turn::ReplyEvent;
use crate::updates::ContextUpdates;

/// What a tool produced.
///
/// A `send` result may ask for post-processing (its data goes back to the
/// model for summarising). Any other event is a terminal instruction and is
/// never post-processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub event: ReplyEvent,

    pub data: String,

    #[serde(default)]
    pub context_updates: ContextUpdates,

    #[serde(default)]
    pub post_process: bool,
}

impl ToolExecutionResult {
    /// Text delivered to the user as is.
    pub fn send(data: impl Into<String>) -> Self {
        Self {
            event: ReplyEvent::Send,
            data: data.into(),
            context_updates: ContextUpdates::new(),
            post_process: false,
        }
    }

    /// Data the model must turn into a reply.
    pub fn for_model(data: impl Into<String>) -> Self {
        Self {
            post_process: true,
            ..Self::send(data)
        }
    }

    /// A `function` instruction for the legacy backend.
    pub fn function(descriptor: impl Into<String>) -> Self {
        Self::instruction(ReplyEvent::Function, descriptor)
    }

    /// Any terminal instruction tag.
    pub fn instruction(event: ReplyEvent, data: impl Into<String>) -> Self {
        Self {
            event,
            data: data.into(),
            context_updates: ContextUpdates::new(),
            post_process: false,
        }
    }

    pub fn with_updates(mut self, updates: ContextUpdates) -> Self {
        self.context_updates = updates;
        self
    }

    pub fn is_terminal(&self) -> bool {
        !self.event.is_send()
    }

    fn normalized(mut self) -> Self {
        if self.is_terminal() {
            self.post_process = false;
        }
        self
    }
}

/// Read-only view a tool gets of the conversation.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    pub state: &'a ConversationState,
    pub locale: Locale,
}

/// A capability the model may request.
///
/// Tools never mutate state; they return patches in
/// [`ToolExecutionResult::context_updates`] and the caller applies them.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    /// Arguments the model must supply, parsed from its JSON string.
    type Args: DeserializeOwned + Send;

    /// The unique name advertised to the model (e.g., "get_balance").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing `Args`.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn call(
        &self,
        args: Self::Args,
        ctx: ToolContext<'_>,
    ) -> std::result::Result<ToolExecutionResult, ToolError>;
}

/// Object-safe face of [`Tool`], so tools with different `Args` share a map.
#[async_trait]
trait DynTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn invoke(
        &self,
        raw_arguments: &str,
        ctx: ToolContext<'_>,
    ) -> std::result::Result<ToolExecutionResult, ToolError>;
}

#[async_trait]
impl<T: Tool> DynTool for T {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    async fn invoke(
        &self,
        raw_arguments: &str,
        ctx: ToolContext<'_>,
    ) -> std::result::Result<ToolExecutionResult, ToolError> {
        let raw = if raw_arguments.trim().is_empty() { "{}" } else { raw_arguments };
        let args: T::Args = serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
            tool_name: self.name().to_string(),
            reason: e.to_string(),
        })?;
        self.call(args, ctx).await
    }
}

/// The set of tools advertised to and dispatchable by the model.
///
/// `definitions()` is derived from the registered tools, so what the model
/// sees is exactly what `execute()` accepts.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn DynTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Box::new(tool));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool definitions for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Dispatch one model-requested call.
    pub async fn execute(
        &self,
        name: &str,
        raw_arguments: &str,
        state: &ConversationState,
        locale: Locale,
    ) -> std::result::Result<ToolExecutionResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let result = tool.invoke(raw_arguments, ToolContext { state, locale }).await?;
        Ok(result.normalized())
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
