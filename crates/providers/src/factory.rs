//! Provider factory: builds the model client described by configuration.
//!
//! The result is always the retrying wrapper around a concrete endpoint, so
//! callers never talk to an endpoint without the retry policy applied.

use std::sync::Arc;
use tellerline_config::{ProviderConfig, ProviderKind, RetryConfig};
use tellerline_core::error::ProviderError;
use tellerline_core::event::EventBus;
use tellerline_core::provider::Provider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::{RetryPolicy, RetryingProvider};

/// Build the bare endpoint client for `config`.
pub fn build_endpoint(config: &ProviderConfig) -> Result<OpenAiCompatProvider, ProviderError> {
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ProviderError::NotConfigured("provider.api_key is not set".into()))?;

    match config.kind {
        ProviderKind::Azure => {
            let endpoint = config.endpoint.as_deref().filter(|e| !e.is_empty()).ok_or_else(|| {
                ProviderError::NotConfigured("provider.endpoint is required for Azure OpenAI".into())
            })?;
            OpenAiCompatProvider::azure(
                endpoint,
                api_key,
                &config.model,
                &config.api_version,
                config.timeout(),
            )
        }
        ProviderKind::OpenAi => match config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(base_url) => OpenAiCompatProvider::new("openai", base_url, api_key, config.timeout()),
            None => OpenAiCompatProvider::openai(api_key, config.timeout()),
        },
    }
}

/// Build the retrying model client from configuration.
pub fn build_from_config(
    provider: &ProviderConfig,
    retry: &RetryConfig,
    events: Option<Arc<EventBus>>,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let endpoint: Arc<dyn Provider> = Arc::new(build_endpoint(provider)?);
    let mut client = RetryingProvider::new(endpoint, RetryPolicy::from_config(retry));
    if let Some(bus) = events {
        client = client.with_events(bus);
    }
    Ok(Arc::new(client))
}
