//! OpenAI-compatible provider implementation.
//!
//! Works with: Azure OpenAI deployments, OpenAI, and any endpoint exposing
//! an OpenAI-compatible `/chat/completions` route.
//!
//! Supports:
//! - Non-streaming chat completions
//! - Tool use / function calling
//! - Text-part message content as well as plain strings

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tellerline_core::error::ProviderError;
use tellerline_core::message::{Message, MessageToolCall};
use tellerline_core::provider::*;
use tracing::{debug, warn};

/// How requests are authenticated.
#[derive(Clone)]
enum Auth {
    /// `Authorization: Bearer <key>`
    Bearer(String),
    /// `api-key: <key>` as Azure expects
    AzureKey(String),
}

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    url: String,
    auth: Auth,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider for an OpenAI-compatible base URL (bearer auth).
    pub fn new(
        name: impl Into<String>,
        base_url: impl AsRef<str>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            url: format!("{}/chat/completions", base_url.as_ref().trim_end_matches('/')),
            auth: Auth::Bearer(api_key.into()),
            client: build_client(timeout)?,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key, timeout)
    }

    /// Create a provider for an Azure OpenAI deployment.
    pub fn azure(
        endpoint: impl AsRef<str>,
        api_key: impl Into<String>,
        deployment: &str,
        api_version: &str,
        timeout: Duration,
    ) -> std::result::Result<Self, ProviderError> {
        Ok(Self {
            name: "azure".into(),
            url: format!(
                "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
                endpoint.as_ref().trim_end_matches('/'),
            ),
            auth: Auth::AzureKey(api_key.into()),
            client: build_client(timeout)?,
        })
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let carries_calls = !m.tool_calls.is_empty();
                ApiMessage {
                    role: m.role.as_str().into(),
                    // assistant tool-call messages go out with `content: null`
                    content: if carries_calls && m.content.is_empty() {
                        None
                    } else {
                        Some(m.content.clone())
                    },
                    tool_calls: carries_calls.then(|| {
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect()
                    }),
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
        });

        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> =
                request.tools.iter().map(ToolDefinition::to_openai_schema).collect();
            body["tools"] = serde_json::Value::Array(tools);
        }

        body
    }

    /// Turn a parsed API response into our response type.
    ///
    /// No choices yields an empty assistant message; callers decide what
    /// an empty completion means.
    fn into_response(api_response: ApiResponse, requested_model: &str) -> ProviderResponse {
        let (content, tool_calls) = match api_response.choices.into_iter().next() {
            Some(choice) => {
                let tool_calls = choice
                    .message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|tc| MessageToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    })
                    .collect();
                let content = choice.message.content.map(ApiContent::into_text).unwrap_or_default();
                (content, tool_calls)
            }
            None => (String::new(), Vec::new()),
        };

        let message = Message {
            tool_calls,
            ..Message::assistant(content)
        };

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        ProviderResponse {
            message,
            usage,
            model: api_response.model.unwrap_or_else(|| requested_model.to_string()),
        }
    }
}

fn build_client(timeout: Duration) -> std::result::Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Map a non-success status to our error.
fn status_error(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(5),
        },
        401 | 403 => {
            ProviderError::AuthenticationFailed("Invalid API key or insufficient permissions".into())
        }
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

#[async_trait]
impl tellerline_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let builder = self.client.post(&self.url).json(&body);
        let builder = match &self.auth {
            Auth::Bearer(key) => builder.bearer_auth(key),
            Auth::AzureKey(key) => builder.header("api-key", key),
        };

        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(status_error(status, retry_after, error_body));
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        Ok(Self::into_response(api_response, &request.model))
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

/// Message content is either a plain string or a list of typed parts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

/// One entry of a content list. Only `text` parts and bare strings carry text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiContentPart {
    Plain(String),
    Typed {
        #[serde(default, rename = "type")]
        kind: String,
        #[serde(default)]
        text: String,
    },
    Other(serde_json::Value),
}

impl ApiContentPart {
    fn into_text(self) -> Option<String> {
        match self {
            ApiContentPart::Plain(text) => Some(text),
            ApiContentPart::Typed { kind, text } if kind == "text" => Some(text),
            ApiContentPart::Typed { .. } | ApiContentPart::Other(_) => None,
        }
    }
}

impl ApiContent {
    fn into_text(self) -> String {
        match self {
            ApiContent::Text(text) => text,
            ApiContent::Parts(parts) => parts
                .into_iter()
                .filter_map(ApiContentPart::into_text)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
