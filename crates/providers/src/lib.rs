//! LLM provider implementations for Tellerline.
//!
//! All providers implement the `tellerline_core::Provider` trait.
//! `build_from_config` composes the endpoint client with the retry wrapper.

pub mod factory;
pub mod openai_compat;
pub mod retry;

pub use factory::{build_endpoint, build_from_config};
pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, RetryingProvider};
