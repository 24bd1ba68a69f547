//! Banking tools for Tellerline.
//!
//! Two kinds of tool live here:
//! - intent tools (`get_balance`, `get_exchange`, `get_statement`) that hand
//!   an instruction to the legacy chatbot backend
//! - data tools (`get_specific_balance`, `get_client_accounts_info`,
//!   `get_bank_info`) that fetch something for the model to summarise

pub mod balance;
pub mod bank_api;
pub mod client_id;
pub mod currency;
pub mod info;
pub mod statement;

#[cfg(test)]
mod testing;

use std::collections::BTreeMap;
use std::sync::Arc;
use tellerline_core::tool::ToolRegistry;

pub use bank_api::{BankApi, BankApiError, DisabledBankApi, HttpBankApi};
pub use client_id::{resolve_client_id, Identifier};

/// Create the registry with every banking tool.
pub fn default_registry(bank_api: Arc<dyn BankApi>, bank_info: BTreeMap<String, String>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(balance::GetBalanceTool);
    registry.register(balance::GetSpecificBalanceTool::new(bank_api.clone()));
    registry.register(currency::GetExchangeTool);
    registry.register(statement::GetClientAccountsInfoTool::new(bank_api));
    registry.register(statement::GetStatementTool);
    registry.register(info::GetBankInfoTool::new(bank_info));
    registry
}
