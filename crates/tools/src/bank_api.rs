//! Adapter for the legacy bank REST API.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Errors talking to the bank API.
#[derive(Debug, thiserror::Error)]
pub enum BankApiError {
    #[error("Bank API is not configured")]
    NotConfigured,

    #[error("Bank API request failed: {0}")]
    Request(String),

    #[error("Bank API returned status {0}")]
    Status(u16),

    #[error("Bank API returned an unreadable body: {0}")]
    Decode(String),
}

/// Read access to client data held by the bank.
#[async_trait]
pub trait BankApi: Send + Sync {
    /// Accounts (with balances) of `client_id`, as the bank returns them.
    async fn accounts(&self, client_id: i64, mode: i64) -> Result<Value, BankApiError>;
}

/// `reqwest`-backed client for `GET {base_url}/api/chatbot/accounts`.
pub struct HttpBankApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBankApi {
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self, BankApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| BankApiError::Request(e.to_string()))?;
        Ok(Self {
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn accounts_url(&self) -> String {
        format!("{}/api/chatbot/accounts", self.base_url)
    }
}

#[async_trait]
impl BankApi for HttpBankApi {
    async fn accounts(&self, client_id: i64, mode: i64) -> Result<Value, BankApiError> {
        debug!(client_id, mode, "Fetching client accounts");
        let response = self
            .client
            .get(self.accounts_url())
            .query(&[("clientid", client_id), ("mode", mode)])
            .send()
            .await
            .map_err(|e| BankApiError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BankApiError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| BankApiError::Decode(e.to_string()))
    }
}

/// Stand-in used when no bank API URL is configured; every call fails.
pub struct DisabledBankApi;

#[async_trait]
impl BankApi for DisabledBankApi {
    async fn accounts(&self, _client_id: i64, _mode: i64) -> Result<Value, BankApiError> {
        Err(BankApiError::NotConfigured)
    }
}

/// Whether a bank payload carries nothing worth showing.
pub fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}
