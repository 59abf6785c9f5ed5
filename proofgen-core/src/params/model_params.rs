//! User-supplied and resolved model parameters.
//!
//! User params are loose: every field is optional and numeric fields are
//! signed so that out-of-range input reaches the resolver and gets reported
//! instead of failing deserialization. Resolved params are complete and
//! immutable.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Raw multiround profile as configured by the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMultiroundProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rounds_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_fix_choices: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_fix_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_previous_proof_versions_number: Option<i64>,
}

/// Raw parameters shared by every backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserModelParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens_to_generate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_theorems_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiround_profile: Option<UserMultiroundProfile>,
}

impl UserModelParams {
    /// Params with only the model identifier set.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens_to_generate(mut self, tokens: i64) -> Self {
        self.max_tokens_to_generate = Some(tokens);
        self
    }

    pub fn with_tokens_limit(mut self, tokens: i64) -> Self {
        self.tokens_limit = Some(tokens);
        self
    }

    pub fn with_choices(mut self, choices: i64) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn with_multiround_profile(mut self, profile: UserMultiroundProfile) -> Self {
        self.multiround_profile = Some(profile);
        self
    }

    /// Model identifier, or a placeholder for messages when it is missing.
    pub fn model_id_or_unknown(&self) -> &str {
        self.model_id.as_deref().unwrap_or("<unknown>")
    }
}

/// Resolved settings of the generate-check-fix loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiroundProfile {
    /// Maximum number of proof versions in a fix chain (including the first)
    pub max_rounds_number: usize,
    /// Choices requested per fix round unless the caller overrides it
    pub default_proof_fix_choices: usize,
    /// Prompt sent with the diagnostic; `{diagnostic}` is substituted
    pub proof_fix_prompt: String,
    /// Previous versions kept in a fix chat, oldest dropped first
    pub max_previous_proof_versions_number: usize,
}

/// Fully resolved parameters shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelParams {
    pub model_id: String,
    pub system_prompt: String,
    pub max_tokens_to_generate: u32,
    pub tokens_limit: u32,
    pub max_context_theorems_number: usize,
    pub default_choices: usize,
    pub multiround_profile: MultiroundProfile,
}

/// Resolved backend parameters: the shared base plus backend fields.
pub trait ResolvedModelParams:
    Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Shared resolved fields.
    fn base(&self) -> &ModelParams;

    /// Model identifier.
    fn model_id(&self) -> &str {
        &self.base().model_id
    }

    /// Multiround profile.
    fn multiround_profile(&self) -> &MultiroundProfile {
        &self.base().multiround_profile
    }
}

impl ResolvedModelParams for ModelParams {
    fn base(&self) -> &ModelParams {
        self
    }
}
