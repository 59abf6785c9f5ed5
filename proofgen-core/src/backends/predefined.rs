//! Backend that "generates" a fixed list of tactics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::LlmBackend;
use crate::error::BackendError;
use crate::llm::{AnalyzedChat, GeneratedRawContent, ProofGenerationContext};
use crate::params::{
    basic_model_params_schema, max_tokens_to_generate_rule, multiround_profile_schema,
    tokens_limit_rule, FieldType, ModelParams, ParamRule, ParamsSchema, ResolutionContext,
    ResolvedModelParams, UserModelParams, ValidationRule,
};

/// User configuration of a predefined-proofs model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredefinedProofsUserModelParams {
    #[serde(flatten)]
    pub base: UserModelParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tactics: Option<Vec<String>>,
}

impl PredefinedProofsUserModelParams {
    pub fn new(model_id: impl Into<String>, tactics: Vec<String>) -> Self {
        Self {
            base: UserModelParams::new(model_id),
            tactics: Some(tactics),
        }
    }
}

/// Resolved predefined-proofs parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredefinedProofsModelParams {
    #[serde(flatten)]
    pub base: ModelParams,
    pub tactics: Vec<String>,
}

impl ResolvedModelParams for PredefinedProofsModelParams {
    fn base(&self) -> &ModelParams {
        &self.base
    }
}

fn longest_tactic(ctx: &ResolutionContext<'_>) -> Value {
    ctx.input("tactics")
        .and_then(Value::as_array)
        .and_then(|tactics| {
            tactics
                .iter()
                .filter_map(Value::as_str)
                .map(|t| t.chars().count())
                .max()
        })
        .map(|len| json!(len))
        .unwrap_or(Value::Null)
}

/// Backend returning the configured tactics as proofs, in order. It has no
/// model behind it: chats are not supported and proofs cannot be fixed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredefinedProofsBackend;

impl PredefinedProofsBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LlmBackend for PredefinedProofsBackend {
    type UserParams = PredefinedProofsUserModelParams;
    type Params = PredefinedProofsModelParams;

    fn name(&self) -> &str {
        "PredefinedProofsService"
    }

    fn params_schema(&self) -> ParamsSchema {
        let extension = ParamsSchema::new("PredefinedProofsModelParams")
            .rule(
                ParamRule::resolve("systemPrompt", FieldType::String).override_with_explanation(
                    |_| json!(""),
                    "predefined proofs are not generated from a prompt",
                ),
            )
            .rule(max_tokens_to_generate_rule().default(longest_tactic))
            .rule(tokens_limit_rule().default(longest_tactic))
            .rule(
                ParamRule::resolve("multiroundProfile", FieldType::Object)
                    .override_with_explanation(
                        |_| {
                            json!({
                                "maxRoundsNumber": 1,
                                "proofFixChoices": 1,
                                "proofFixPrompt": "",
                                "maxPreviousProofVersionsNumber": 0
                            })
                        },
                        "predefined proofs cannot be fixed",
                    )
                    .nested(multiround_profile_schema()),
            )
            .rule(
                ParamRule::resolve_as("choices", "defaultChoices", FieldType::Integer)
                    .override_with_explanation(
                        |ctx| json!(ctx.input_len("tactics").unwrap_or(0)),
                        "always equals the number of tactics",
                    )
                    .required_to_be_configured()
                    .validate(ValidationRule::positive()),
            )
            .rule(
                ParamRule::resolve("tactics", FieldType::list(FieldType::String))
                    .required_to_be_configured()
                    .validate(ValidationRule::non_empty()),
            );
        basic_model_params_schema().compose(extension)
    }

    fn supports_chat(&self) -> bool {
        false
    }

    async fn generate_from_chat(
        &self,
        _chat: &AnalyzedChat,
        _params: &Self::Params,
        _choices: usize,
    ) -> Result<GeneratedRawContent, BackendError> {
        Err(BackendError::UnsupportedOperation(
            "`PredefinedProofsService` does not support generation from chat".to_string(),
        ))
    }

    async fn generate_from_context(
        &self,
        _context: &ProofGenerationContext,
        _chat: &AnalyzedChat,
        params: &Self::Params,
        choices: usize,
    ) -> Result<GeneratedRawContent, BackendError> {
        if choices > params.tactics.len() {
            return Err(BackendError::NotEnoughProofs {
                requested: choices,
                available: params.tactics.len(),
            });
        }
        Ok(GeneratedRawContent::aggregate(
            params.tactics[..choices].to_vec(),
            0,
            None,
        ))
    }
}
