//! Scriptable in-process backend for tests and demos.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::LlmBackend;
use crate::error::BackendError;
use crate::llm::{AnalyzedChat, Chat, ChatMessage, GeneratedRawContent};
use crate::params::{
    basic_model_params_schema, FieldType, ModelParams, ParamRule, ParamsSchema,
    ResolvedModelParams, UserModelParams, ValidationRule,
};

/// User configuration of a mock model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockUserModelParams {
    #[serde(flatten)]
    pub base: UserModelParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proofs_to_generate: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<i64>,
}

impl MockUserModelParams {
    pub fn new(model_id: impl Into<String>, proofs_to_generate: Vec<String>) -> Self {
        Self {
            base: UserModelParams::new(model_id),
            proofs_to_generate: Some(proofs_to_generate),
            worker_id: None,
        }
    }

    pub fn with_worker_id(mut self, worker_id: i64) -> Self {
        self.worker_id = Some(worker_id);
        self
    }
}

/// Resolved mock parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockModelParams {
    #[serde(flatten)]
    pub base: ModelParams,
    pub proofs_to_generate: Vec<String>,
    pub worker_id: u64,
    pub resolved_with_mock_service: bool,
}

impl ResolvedModelParams for MockModelParams {
    fn base(&self) -> &ModelParams {
        &self.base
    }
}

/// Backend returning the first `choices` of `proofsToGenerate`.
///
/// Special behaviour:
/// - an error registered with [`MockBackend::throw_error_on_next_generation`]
///   for the request's `workerId` is raised once, then forgotten;
/// - a last chat message built by [`MockBackend::skip_first_n_proofs`]
///   skips that many proofs from the start of the list;
/// - if any message equals [`MockBackend::PROOF_FIX_PROMPT`], every
///   generated proof is [`MockBackend::FIXED_PROOF`].
///
/// Asking for more proofs than are available fails with
/// [`BackendError::NotEnoughProofs`].
#[derive(Debug)]
pub struct MockBackend {
    errors_on_next_generation: Mutex<HashMap<u64, BackendError>>,
    received_chats: Mutex<Vec<Chat>>,
    skip_pattern: Regex,
}

impl MockBackend {
    /// System prompt every mock model is resolved with.
    pub const SYSTEM_PROMPT: &'static str = "unique mock-llm system prompt";
    /// Fix prompt that makes the mock answer with [`Self::FIXED_PROOF`].
    pub const PROOF_FIX_PROMPT: &'static str = "Generate `Fixed.` instead of proof.";
    /// Proof generated for fix requests.
    pub const FIXED_PROOF: &'static str = "Fixed.";

    pub fn new() -> Self {
        Self {
            errors_on_next_generation: Mutex::new(HashMap::new()),
            received_chats: Mutex::new(Vec::new()),
            skip_pattern: Regex::new(r"^SKIP_FIRST_PROOFS: (\d+)$").unwrap(),
        }
    }

    /// Make the next generation of `worker_id` fail with `error`.
    pub fn throw_error_on_next_generation(&self, error: BackendError, worker_id: u64) {
        if let Ok(mut errors) = self.errors_on_next_generation.lock() {
            errors.insert(worker_id, error);
        }
    }

    /// Append the control message that skips the first `n` proofs.
    pub fn skip_first_n_proofs(chat: &[ChatMessage], n: usize) -> Chat {
        let mut chat = chat.to_vec();
        chat.push(ChatMessage::user(format!("SKIP_FIRST_PROOFS: {}", n)));
        chat
    }

    /// Chats received so far, one per generation call.
    pub fn received_chats(&self) -> Vec<Chat> {
        self.received_chats
            .lock()
            .map(|chats| chats.clone())
            .unwrap_or_default()
    }

    /// Number of generation calls received so far.
    pub fn generation_calls(&self) -> usize {
        self.received_chats.lock().map(|chats| chats.len()).unwrap_or(0)
    }

    fn skipped_proofs(&self, chat: &[ChatMessage]) -> usize {
        chat.last()
            .and_then(|message| self.skip_pattern.captures(&message.content))
            .and_then(|captures| captures[1].parse().ok())
            .unwrap_or(0)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    type UserParams = MockUserModelParams;
    type Params = MockModelParams;

    fn name(&self) -> &str {
        "MockLLMService"
    }

    fn params_schema(&self) -> ParamsSchema {
        let extension = ParamsSchema::new("MockModelParams")
            .rule(
                ParamRule::resolve("systemPrompt", FieldType::String)
                    .override_with(|_| json!(MockBackend::SYSTEM_PROMPT)),
            )
            .rule(
                ParamRule::resolve_as("choices", "defaultChoices", FieldType::Integer)
                    .override_with(|ctx| json!(ctx.input_len("proofsToGenerate").unwrap_or(0)))
                    .required_to_be_configured()
                    .validate(ValidationRule::positive()),
            )
            .rule(
                ParamRule::resolve("proofsToGenerate", FieldType::list(FieldType::String))
                    .required_to_be_configured()
                    .validate(ValidationRule::non_empty()),
            )
            .rule(
                ParamRule::resolve("workerId", FieldType::Integer)
                    .default_value(0)
                    .validate(ValidationRule::non_negative()),
            )
            .rule(
                ParamRule::insert("resolvedWithMockService", FieldType::Boolean, |_| json!(true))
                    .validate(ValidationRule::new("be true", |v| v.as_bool() == Some(true))),
            );
        basic_model_params_schema().compose(extension)
    }

    async fn generate_from_chat(
        &self,
        chat: &AnalyzedChat,
        params: &Self::Params,
        choices: usize,
    ) -> Result<GeneratedRawContent, BackendError> {
        if let Ok(mut chats) = self.received_chats.lock() {
            chats.push(chat.chat.clone());
        }
        debug!(worker_id = params.worker_id, choices, "mock generation");

        let scheduled_error = self
            .errors_on_next_generation
            .lock()
            .ok()
            .and_then(|mut errors| errors.remove(&params.worker_id));
        if let Some(error) = scheduled_error {
            return Err(error);
        }

        let prompt_tokens = chat.estimated_tokens.messages_tokens;
        if chat.chat.iter().any(|m| m.content == Self::PROOF_FIX_PROMPT) {
            return Ok(GeneratedRawContent::aggregate(
                vec![Self::FIXED_PROOF.to_string(); choices],
                prompt_tokens,
                None,
            ));
        }

        let skip = self.skipped_proofs(&chat.chat);
        let available = params.proofs_to_generate.len().saturating_sub(skip);
        if choices > available {
            return Err(BackendError::NotEnoughProofs {
                requested: choices,
                available,
            });
        }

        Ok(GeneratedRawContent::aggregate(
            params.proofs_to_generate[skip..skip + choices].to_vec(),
            prompt_tokens,
            None,
        ))
    }
}
