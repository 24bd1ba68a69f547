//! Test doubles shared by the tool tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use crate::bank_api::{BankApi, BankApiError};

/// Answers every call with a fixed payload or status, recording arguments.
pub struct MockBankApi {
    response: Result<Value, u16>,
    calls: Mutex<Vec<(i64, i64)>>,
}

impl MockBankApi {
    pub fn ok(payload: Value) -> Arc<Self> {
        Arc::new(Self {
            response: Ok(payload),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            response: Err(status),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(i64, i64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BankApi for MockBankApi {
    async fn accounts(&self, client_id: i64, mode: i64) -> Result<Value, BankApiError> {
        self.calls.lock().unwrap().push((client_id, mode));
        self.response.clone().map_err(BankApiError::Status)
    }
}
