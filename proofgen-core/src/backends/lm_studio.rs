//! Backend for a local LM Studio server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{require_choices, ChatCompletionsClient, ChatCompletionsRequest, HttpClientConfig};
use super::LlmBackend;
use crate::error::BackendError;
use crate::llm::{AnalyzedChat, GeneratedRawContent, GenerationTokens};
use crate::params::{
    basic_model_params_schema, FieldType, ModelParams, ParamRule, ParamsSchema,
    ResolvedModelParams, UserModelParams, ValidationRule,
};

/// User configuration of an LM Studio model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmStudioUserModelParams {
    #[serde(flatten)]
    pub base: UserModelParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
}

/// Resolved LM Studio parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmStudioModelParams {
    #[serde(flatten)]
    pub base: ModelParams,
    pub temperature: f64,
    pub port: u16,
}

impl ResolvedModelParams for LmStudioModelParams {
    fn base(&self) -> &ModelParams {
        &self.base
    }
}

/// Backend for the OpenAI-compatible server LM Studio runs on localhost.
///
/// The server ignores `n`, so choices are requested one by one.
#[derive(Debug, Clone, Default)]
pub struct LmStudioBackend {
    host: Option<String>,
}

impl LmStudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a host other than `localhost`.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    fn client(&self, port: u16) -> ChatCompletionsClient {
        let host = self.host.as_deref().unwrap_or("localhost");
        ChatCompletionsClient::new(HttpClientConfig::new(format!("http://{}:{}", host, port)))
    }
}

#[async_trait]
impl LlmBackend for LmStudioBackend {
    type UserParams = LmStudioUserModelParams;
    type Params = LmStudioModelParams;

    fn name(&self) -> &str {
        "LMStudioService"
    }

    fn params_schema(&self) -> ParamsSchema {
        let extension = ParamsSchema::new("LmStudioModelParams")
            .rule(
                ParamRule::resolve("temperature", FieldType::Float)
                    .required_to_be_configured()
                    .validate(ValidationRule::in_range(0.0, 2.0)),
            )
            .rule(
                ParamRule::resolve("port", FieldType::Integer)
                    .required_to_be_configured()
                    .validate(ValidationRule::in_range(0.0, 65_535.0)),
            );
        basic_model_params_schema().compose(extension)
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
        let client = self.client(params.port);
        let mut contents = Vec::with_capacity(choices);
        let mut reported = Some(GenerationTokens::default());

        for _ in 0..choices {
            let completions = client
                .complete(
                    ChatCompletionsRequest {
                        service_name: self.name(),
                        model: None,
                        messages: &chat.chat,
                        max_tokens: params.base.max_tokens_to_generate,
                        temperature: params.temperature,
                        choices: 1,
                    },
                    None,
                )
                .await?;
            reported = match (reported, completions.usage) {
                (Some(total), Some(usage)) => Some(total.merge(&usage)),
                _ => None,
            };
            contents.extend(completions.contents.into_iter().take(1));
        }

        Ok(GeneratedRawContent::aggregate(
            require_choices(contents, choices)?,
            chat.estimated_tokens.messages_tokens,
            reported,
        ))
    }
}
