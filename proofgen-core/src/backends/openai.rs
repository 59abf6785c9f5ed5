//! OpenAI chat completions backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::http::{require_choices, ChatCompletionsClient, ChatCompletionsRequest, HttpClientConfig};
use super::LlmBackend;
use crate::error::BackendError;
use crate::llm::{AnalyzedChat, GeneratedRawContent};
use crate::params::{
    basic_model_params_schema, max_tokens_to_generate_rule, tokens_limit_rule, FieldType,
    ModelParams, ParamRule, ParamsSchema, ResolutionContext, ResolvedModelParams, UserModelParams,
    ValidationRule,
};

/// Upper bound of `n` accepted by the API.
const MAX_CHOICES_PER_REQUEST: usize = 128;

/// `(tokensLimit, maxTokensToGenerate)` defaults of well-known models.
pub fn known_model_limits(model_name: &str) -> Option<(u32, u32)> {
    let limits = match model_name {
        "gpt-4o" | "gpt-4o-2024-08-06" | "gpt-4o-2024-05-13" => (128_000, 2_048),
        "gpt-4o-mini" | "gpt-4o-mini-2024-07-18" => (128_000, 2_048),
        "gpt-4-turbo" | "gpt-4-turbo-2024-04-09" => (128_000, 2_048),
        "gpt-4" | "gpt-4-0613" => (8_192, 2_048),
        "gpt-3.5-turbo" | "gpt-3.5-turbo-0125" => (16_385, 2_048),
        _ => return None,
    };
    Some(limits)
}

/// User configuration of an OpenAI model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiUserModelParams {
    #[serde(flatten)]
    pub base: UserModelParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Resolved OpenAI parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiModelParams {
    #[serde(flatten)]
    pub base: ModelParams,
    pub model_name: String,
    pub temperature: f64,
    pub api_key: String,
}

impl ResolvedModelParams for OpenAiModelParams {
    fn base(&self) -> &ModelParams {
        &self.base
    }
}

fn known_limit(ctx: &ResolutionContext<'_>, pick: fn((u32, u32)) -> u32) -> Value {
    ctx.input("modelName")
        .and_then(Value::as_str)
        .and_then(known_model_limits)
        .map(|limits| json!(pick(limits)))
        .unwrap_or(Value::Null)
}

/// Backend talking to `api.openai.com`.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: ChatCompletionsClient,
}

impl OpenAiBackend {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::new(Self::DEFAULT_BASE_URL))
    }

    /// Backend for a custom endpoint, e.g. a proxy.
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            client: ChatCompletionsClient::new(config),
        }
    }
}

impl Default for OpenAiBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    type UserParams = OpenAiUserModelParams;
    type Params = OpenAiModelParams;

    fn name(&self) -> &str {
        "OpenAiService"
    }

    fn params_schema(&self) -> ParamsSchema {
        let extension = ParamsSchema::new("OpenAiModelParams")
            .rule(
                max_tokens_to_generate_rule()
                    .default(|ctx| known_limit(ctx, |(_, max_tokens)| max_tokens)),
            )
            .rule(tokens_limit_rule().default(|ctx| known_limit(ctx, |(limit, _)| limit)))
            .rule(
                ParamRule::resolve("modelName", FieldType::String)
                    .required_to_be_configured()
                    .validate(ValidationRule::non_empty()),
            )
            .rule(
                ParamRule::resolve("temperature", FieldType::Float)
                    .required_to_be_configured()
                    .validate(ValidationRule::in_range(0.0, 2.0)),
            )
            .rule(
                ParamRule::resolve("apiKey", FieldType::String)
                    .required_to_be_configured()
                    .validate(ValidationRule::non_empty()),
            );
        basic_model_params_schema().compose(extension)
    }

    fn max_choices(&self, _params: &Self::Params) -> Option<usize> {
        Some(MAX_CHOICES_PER_REQUEST)
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn generate_from_chat(
        &self,
        chat: &AnalyzedChat,
        params: &Self::Params,
        choices: usize,
    ) -> Result<GeneratedRawContent, BackendError> {
        let completions = self
            .client
            .complete(
                ChatCompletionsRequest {
                    service_name: self.name(),
                    model: Some(&params.model_name),
                    messages: &chat.chat,
                    max_tokens: params.base.max_tokens_to_generate,
                    temperature: params.temperature,
                    choices,
                },
                Some(&params.api_key),
            )
            .await?;

        Ok(GeneratedRawContent::aggregate(
            require_choices(completions.contents, choices)?,
            chat.estimated_tokens.messages_tokens,
            completions.usage,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamSource;
    use pretty_assertions::assert_eq;

    fn user_params() -> OpenAiUserModelParams {
        OpenAiUserModelParams {
            base: UserModelParams::new("open-ai-gpt").with_choices(2),
            model_name: Some("gpt-4o".to_string()),
            temperature: Some(1.0),
            api_key: Some("undefined".to_string()),
        }
    }

    #[test]
    fn test_resolves_known_model_limits() {
        let result = OpenAiBackend::new()
            .params_schema()
            .resolve_params::<_, OpenAiModelParams>(&user_params());
        let params = result.resolved.clone().unwrap();

        assert_eq!(params.base.tokens_limit, 128_000);
        assert_eq!(params.base.max_tokens_to_generate, 2_048);
        assert_eq!(params.model_name, "gpt-4o");
        let source = result
            .logs
            .iter()
            .find(|log| log.output_name == "tokensLimit")
            .map(|log| log.source);
        assert_eq!(source, Some(ParamSource::Default));
    }

    #[test]
    fn test_unknown_model_requires_limits() {
        let mut input = user_params();
        input.model_name = Some("my-fine-tune".to_string());
        let result = OpenAiBackend::new()
            .params_schema()
            .resolve_params::<_, OpenAiModelParams>(&input);

        let failed: Vec<&str> = result
            .invalid_causes()
            .map(|log| log.output_name.as_str())
            .collect();
        assert_eq!(failed, vec!["maxTokensToGenerate", "tokensLimit"]);
    }

    #[test]
    fn test_temperature_range() {
        let mut input = user_params();
        input.temperature = Some(2.5);
        let result = OpenAiBackend::new()
            .params_schema()
            .resolve_params::<_, OpenAiModelParams>(&input);
        let description = result.failure_description();
        assert!(description.contains("`temperature` should be in range between 0 and 2"), "{description}");
    }

    #[test]
    fn test_missing_api_key() {
        let mut input = user_params();
        input.api_key = None;
        let result = OpenAiBackend::new()
            .params_schema()
            .resolve_params::<_, OpenAiModelParams>(&input);
        assert_eq!(result.invalid_causes().count(), 1);
        assert!(result.failure_description().starts_with("`apiKey` is required"));
    }

    #[test]
    fn test_user_params_json_shape() {
        let value = serde_json::to_value(user_params()).unwrap();
        assert_eq!(value["modelId"], "open-ai-gpt");
        assert_eq!(value["modelName"], "gpt-4o");
        assert_eq!(value["apiKey"], "undefined");
    }
}
