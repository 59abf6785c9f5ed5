//! OpenAI-compatible `chat/completions` client shared by the remote
//! backends.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BackendError;
use crate::llm::{ChatMessage, GenerationTokens};
use crate::messages;

/// Configuration of the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL, e.g. "https://api.openai.com"
    pub base_url: String,
    /// Bearer token, if the endpoint needs one
    pub api_key: Option<String>,
    /// Transport-level timeout; request timeouts are enforced by the service
    pub timeout_secs: u64,
}

impl HttpClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout_secs: 600,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Client {
    let timeout = Duration::from_secs(timeout_secs);

    // Some sandboxed macOS environments can panic during proxy auto-detection
    // in reqwest's default client builder. Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => client,
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .unwrap_or_default(),
    }
}

/// Request to a `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsRequest<'a> {
    /// Name of the requesting service, used in error messages
    pub service_name: &'a str,
    pub model: Option<&'a str>,
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
    pub temperature: f64,
    pub choices: usize,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    n: usize,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Raw choices plus the usage the endpoint reported, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletions {
    pub contents: Vec<String>,
    pub usage: Option<GenerationTokens>,
}

/// Client for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    config: HttpClientConfig,
    http: Client,
}

impl ChatCompletionsClient {
    pub fn new(config: HttpClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self { config, http }
    }

    /// Base URL of the endpoint.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Send a request and collect every returned choice.
    pub async fn complete(
        &self,
        request: ChatCompletionsRequest<'_>,
        api_key: Option<&str>,
    ) -> Result<ChatCompletions, BackendError> {
        let body = WireRequest {
            model: request.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            n: request.choices,
        };

        let url = format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!(url = %url, n = request.choices, "sending chat completions request");

        let mut builder = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = api_key.or(self.config.api_key.as_deref()) {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::Http(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Http(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_error(request.service_name, status, &text));
        }

        let parsed: WireResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::Other(format!("Failed to parse response: {}", e)))?;

        Ok(ChatCompletions {
            contents: parsed
                .choices
                .into_iter()
                .map(|c| c.message.content.unwrap_or_default())
                .collect(),
            usage: parsed
                .usage
                .map(|u| GenerationTokens::new(u.prompt_tokens, u.completion_tokens)),
        })
    }
}

/// Keep exactly `requested` choices. An endpoint answering with fewer is a
/// failed generation, not a shorter success.
pub fn require_choices(mut contents: Vec<String>, requested: usize) -> Result<Vec<String>, BackendError> {
    if contents.len() < requested {
        return Err(BackendError::NotEnoughProofs {
            requested,
            available: contents.len(),
        });
    }
    contents.truncate(requested);
    Ok(contents)
}

/// Map an error response to a backend error. Errors the user can only fix
/// in the settings become [`BackendError::InvalidConfiguration`].
fn classify_error(service_name: &str, status: StatusCode, body: &str) -> BackendError {
    let detail = serde_json::from_str::<WireError>(body).ok().map(|e| e.error);
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .unwrap_or_else(|| body.to_string());

    let code = detail.as_ref().and_then(|d| d.code.as_deref());
    match (status, code) {
        (StatusCode::UNAUTHORIZED, _) => BackendError::InvalidConfiguration(format!(
            "incorrect API key: {}. {}",
            message,
            messages::api_key_is_not_set(service_name)
        )),
        (_, Some("context_length_exceeded")) => BackendError::InvalidConfiguration(format!(
            "`tokensLimit` exceeds the model context: {}",
            message
        )),
        (_, Some("model_not_found")) => {
            BackendError::InvalidConfiguration(format!("unknown model: {}", message))
        }
        _ => BackendError::Api {
            status: status.as_u16(),
            message,
        },
    }
}
