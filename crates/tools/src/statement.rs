//! Statement tools.
//!
//! Preparing a statement needs an account id. When the model does not know
//! it, it first calls `get_client_accounts_info`, then `get_statement`,
//! which only emits the instruction for the legacy backend.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tellerline_core::error::ToolError;
use tellerline_core::tool::{Tool, ToolContext, ToolExecutionResult};
use tellerline_core::updates::patch_from;
use tracing::{info, warn};
use crate::bank_api::BankApi;
use crate::client_id::{resolve_client_id, Identifier};

#[derive(Debug, Deserialize)]
pub struct AccountsInfoArgs {
    #[serde(default)]
    pub client_id: Option<Identifier>,
}

/// Fetches the client's accounts for the model and remembers them.
pub struct GetClientAccountsInfoTool {
    api: Arc<dyn BankApi>,
}

impl GetClientAccountsInfoTool {
    pub fn new(api: Arc<dyn BankApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetClientAccountsInfoTool {
    type Args = AccountsInfoArgs;

    fn name(&self) -> &str {
        "get_client_accounts_info"
    }

    fn description(&self) -> &str {
        "Fetch all accounts of a client. Call this first when preparing a statement \
         and the account id is unknown."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "client_id": {
                    "type": "integer",
                    "description": "Numeric client identifier in the bank system"
                }
            },
            "required": [],
            "additionalProperties": false
        })
    }

    async fn call(
        &self,
        args: AccountsInfoArgs,
        ctx: ToolContext<'_>,
    ) -> Result<ToolExecutionResult, ToolError> {
        let Some(client_id) = resolve_client_id(args.client_id.as_ref(), ctx.state) else {
            warn!(chat_id = %ctx.state.chat_id, "get_client_accounts_info without a client id");
            return Ok(ToolExecutionResult::send(ctx.locale.pick(
                "Потрібен ідентифікатор клієнта, щоб отримати рахунки.",
                "A client identifier is needed to look up accounts.",
            )));
        };

        let accounts = match self.api.accounts(client_id, 0).await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(client_id, error = %e, "Account lookup failed");
                return Ok(ToolExecutionResult::send(ctx.locale.pick(
                    "Наразі не вдається отримати рахунки.",
                    "Cannot retrieve accounts right now.",
                )));
            }
        };
        info!(client_id, "Fetched client accounts");

        let updates = patch_from(json!({
            "slots": { "accounts": accounts, "client_id": client_id }
        }));
        Ok(ToolExecutionResult::for_model(accounts.to_string()).with_updates(updates))
    }
}

#[derive(Debug, Deserialize)]
pub struct StatementArgs {
    pub accountid: Identifier,
    pub datefrom: String,
    pub dateinto: String,
}

/// Emits `get_statement(accountid=…,datefrom=…,dateinto=…)` for the backend.
pub struct GetStatementTool;

#[async_trait]
impl Tool for GetStatementTool {
    type Args = StatementArgs;

    fn name(&self) -> &str {
        "get_statement"
    }

    fn description(&self) -> &str {
        "Emit an instruction for the chatbot backend to prepare a bank statement. Use when the \
         user asks for a statement or extract. If accountid is unknown, call \
         get_client_accounts_info first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "accountid": {
                    "type": "integer",
                    "description": "Account identifier inside the bank system"
                },
                "datefrom": {
                    "type": "string",
                    "format": "date-time",
                    "description": "Statement start (ISO 8601, e.g. 2024-12-01 or 2024-12-01T00:00:00Z)"
                },
                "dateinto": {
                    "type": "string",
                    "format": "date-time",
                    "description": "Statement end (ISO 8601, e.g. 2024-12-31 or 2024-12-31T23:59:59Z)"
                }
            },
            "required": ["accountid", "datefrom", "dateinto"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: StatementArgs, _ctx: ToolContext<'_>) -> Result<ToolExecutionResult, ToolError> {
        info!(accountid = %args.accountid, datefrom = %args.datefrom, dateinto = %args.dateinto, "Statement requested");
        Ok(ToolExecutionResult::function(format!(
            "get_statement(accountid={},datefrom={},dateinto={})",
            args.accountid, args.datefrom, args.dateinto
        )))
    }
}
