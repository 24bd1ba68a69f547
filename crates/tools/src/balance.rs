//! Balance tools.
//!
//! `get_balance` only declares the intent: the legacy backend already knows
//! how to show every balance. `get_specific_balance` looks up one account,
//! or hands the account list to the model when no account was named.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tellerline_core::error::ToolError;
use tellerline_core::language::Locale;
use tellerline_core::tool::{Tool, ToolContext, ToolExecutionResult};
use tracing::{info, warn};
use crate::bank_api::{is_empty_payload, BankApi};
use crate::client_id::{resolve_client_id, Identifier};

const GET_BALANCE: &str = "get_balance";

/// No arguments.
#[derive(Debug, Default, Deserialize)]
pub struct NoArgs {}

pub struct GetBalanceTool;

#[async_trait]
impl Tool for GetBalanceTool {
    type Args = NoArgs;

    fn name(&self) -> &str {
        GET_BALANCE
    }

    fn description(&self) -> &str {
        "Ask the chatbot backend to find and send the client's current account balances. \
         Use when the user asks about balances in general or wants all of them."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        })
    }

    async fn call(&self, _args: NoArgs, _ctx: ToolContext<'_>) -> Result<ToolExecutionResult, ToolError> {
        Ok(ToolExecutionResult::function(GET_BALANCE))
    }
}

#[derive(Debug, Deserialize)]
pub struct SpecificBalanceArgs {
    #[serde(default)]
    pub client_id: Option<Identifier>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub mode: Option<i64>,
}

pub struct GetSpecificBalanceTool {
    api: Arc<dyn BankApi>,
}

impl GetSpecificBalanceTool {
    pub fn new(api: Arc<dyn BankApi>) -> Self {
        Self { api }
    }
}

/// Render a JSON scalar the way a person would read it.
fn plain(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn find_account<'a>(payload: &'a Value, account: &str) -> Option<&'a Value> {
    payload.as_array()?.iter().find(|entry| {
        plain(entry.get("IBAN")).replace(' ', "") == account
    })
}

fn balance_line(locale: Locale, account: &str, amount: &str, currency: &str) -> String {
    match locale {
        Locale::Ukrainian => format!("Баланс на рахунку {account}: {amount} {currency}"),
        Locale::English => format!("Balance on account {account}: {amount} {currency}"),
    }
}

fn account_not_found(locale: Locale, account: &str) -> String {
    match locale {
        Locale::Ukrainian => format!("Рахунок {account} не знайдено."),
        Locale::English => format!("Account {account} was not found."),
    }
}

#[async_trait]
impl Tool for GetSpecificBalanceTool {
    type Args = SpecificBalanceArgs;

    fn name(&self) -> &str {
        "get_specific_balance"
    }

    fn description(&self) -> &str {
        "Fetch all of the client's accounts with balances to answer about one specific \
         account or balance. Use when the user asks about a particular balance or mentions an IBAN."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "client_id": {
                    "type": "integer",
                    "description": "Identifier of the client in the bank database"
                },
                "account": {
                    "type": "string",
                    "description": "Account number or IBAN the user is asking about"
                },
                "mode": {
                    "type": "integer",
                    "description": "Kind of account search to perform"
                }
            },
            "required": ["client_id"],
            "additionalProperties": false
        })
    }

    async fn call(
        &self,
        args: SpecificBalanceArgs,
        ctx: ToolContext<'_>,
    ) -> Result<ToolExecutionResult, ToolError> {
        let Some(client_id) = resolve_client_id(args.client_id.as_ref(), ctx.state) else {
            warn!(chat_id = %ctx.state.chat_id, "get_specific_balance without a client id");
            return Ok(ToolExecutionResult::function(GET_BALANCE));
        };

        let account = args
            .account
            .map(|a| a.replace(' ', ""))
            .filter(|a| !a.is_empty());
        let mode = args.mode.unwrap_or(0);
        info!(client_id, mode, account = ?account, "Looking up specific balance");

        let payload = match self.api.accounts(client_id, mode).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(client_id, error = %e, "Balance lookup failed, deferring to backend");
                return Ok(ToolExecutionResult::function(GET_BALANCE));
            }
        };
        if is_empty_payload(&payload) {
            return Ok(ToolExecutionResult::function(GET_BALANCE));
        }

        let Some(account) = account else {
            return Ok(ToolExecutionResult::for_model(payload.to_string()));
        };

        let text = match find_account(&payload, &account) {
            Some(entry) => balance_line(
                ctx.locale,
                &account,
                &plain(entry.get("amountRest")),
                &plain(entry.get("currencyTag")),
            ),
            None => account_not_found(ctx.locale, &account),
        };
        Ok(ToolExecutionResult::send(text))
    }
}
