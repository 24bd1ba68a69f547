//! Retrying provider with exponential backoff and jitter.
//!
//! Wraps any provider. Failed calls are retried up to `max_retries` times,
//! sleeping `min(max_delay, base_delay * 2^(attempt-1))` scaled by a random
//! factor in `[0.8, 1.2]` between attempts, or the upstream's `Retry-After`
//! hint (capped at `max_delay`) when it rate-limits. Cancellation stops
//! everything at once, mid-call or mid-sleep, and is never retried.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tellerline_config::RetryConfig;
use tellerline_core::error::ProviderError;
use tellerline_core::event::{DomainEvent, EventBus};
use tellerline_core::provider::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many times to retry and how long to wait between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() || attempt == 0 {
            return Duration::ZERO;
        }
        let exp = (attempt - 1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Delay before retry number `attempt`, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if backoff.is_zero() {
            return backoff;
        }
        let jitter: f64 = rand::rng().random_range(0.8..=1.2);
        backoff.mul_f64(jitter)
    }

    /// Delay before retrying after `err`. A rate-limit hint from the upstream
    /// replaces the computed backoff, capped at `max_delay`.
    pub fn delay_after(&self, err: &ProviderError, attempt: u32) -> Duration {
        match err {
            ProviderError::RateLimited { retry_after_secs } if !self.base_delay.is_zero() => {
                Duration::from_secs(*retry_after_secs).min(self.max_delay)
            }
            _ => self.delay_for(attempt),
        }
    }
}

/// A provider that retries a wrapped provider on failure.
pub struct RetryingProvider {
    inner: Arc<dyn tellerline_core::Provider>,
    policy: RetryPolicy,
    events: Option<Arc<EventBus>>,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn tellerline_core::Provider>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            events: None,
        }
    }

    /// Publish `ModelRetried` events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl tellerline_core::Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.complete_with_cancel(request, &CancellationToken::new()).await
    }

    async fn complete_with_cancel(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                result = self.inner.complete_with_cancel(request.clone(), cancel) => result,
            };

            let err = match result {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(provider = %self.inner.name(), attempt, "Model call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };

            if attempt > self.policy.max_retries {
                warn!(
                    provider = %self.inner.name(),
                    attempts = attempt,
                    error = %err,
                    "Model call failed, retries exhausted"
                );
                return Err(err);
            }

            let delay = self.policy.delay_after(&err, attempt);
            warn!(
                provider = %self.inner.name(),
                attempt,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Model call failed, retrying"
            );

            if let Some(bus) = &self.events {
                bus.publish(DomainEvent::ModelRetried {
                    provider: self.inner.name().to_string(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error_message: err.to_string(),
                    timestamp: Utc::now(),
                });
            }

            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
