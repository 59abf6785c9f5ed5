//! Base schema shared by every backend, and its defaults.

use serde_json::json;

use super::field_type::FieldType;
use super::model_params::MultiroundProfile;
use super::resolver::{ParamRule, ParamsSchema, ValidationRule};

/// System prompt used when the user configures none.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Generate proof of the theorem from user input in Coq. \
    You should only generate proofs in Coq. Never add special comments to the proof. \
    Your answer should be a valid Coq proof. It should start with 'Proof.' and end with 'Qed.'.";

/// Fix prompt used when the user configures none. `{diagnostic}` is
/// replaced by the checker's diagnostic.
pub const DEFAULT_PROOF_FIX_PROMPT: &str = "Unfortunately, the last proof is not correct. \
    Here is the compiler's feedback: `{diagnostic}`. \
    Using this feedback, please, generate a new proof.";

/// Placeholder substituted in fix prompts.
pub const DIAGNOSTIC_PLACEHOLDER: &str = "{diagnostic}";

/// No bound on the number of context theorems sent.
pub const DEFAULT_MAX_CONTEXT_THEOREMS_NUMBER: usize = usize::MAX;

/// Multiround profile used for every field the user leaves unset.
pub fn default_multiround_profile() -> MultiroundProfile {
    MultiroundProfile {
        max_rounds_number: 1,
        default_proof_fix_choices: 1,
        proof_fix_prompt: DEFAULT_PROOF_FIX_PROMPT.to_string(),
        max_previous_proof_versions_number: 100,
    }
}

/// Schema of the nested `multiroundProfile`.
pub fn multiround_profile_schema() -> ParamsSchema {
    let defaults = default_multiround_profile();
    ParamsSchema::new("MultiroundProfile")
        .rule(
            ParamRule::resolve("maxRoundsNumber", FieldType::Integer)
                .default_value(defaults.max_rounds_number)
                .validate(ValidationRule::positive()),
        )
        .rule(
            ParamRule::resolve_as("proofFixChoices", "defaultProofFixChoices", FieldType::Integer)
                .default_value(defaults.default_proof_fix_choices)
                .validate(ValidationRule::positive()),
        )
        .rule(
            ParamRule::resolve("proofFixPrompt", FieldType::String)
                .default_value(defaults.proof_fix_prompt),
        )
        .rule(
            ParamRule::resolve("maxPreviousProofVersionsNumber", FieldType::Integer)
                .default_value(defaults.max_previous_proof_versions_number)
                .validate(ValidationRule::non_negative()),
        )
}

/// Base `maxTokensToGenerate` rule; backends add their own defaults to it.
pub(crate) fn max_tokens_to_generate_rule() -> ParamRule {
    ParamRule::resolve("maxTokensToGenerate", FieldType::Integer)
        .required_to_be_configured()
        .validate(ValidationRule::positive())
}

/// Base `tokensLimit` rule; backends add their own defaults to it.
pub(crate) fn tokens_limit_rule() -> ParamRule {
    ParamRule::resolve("tokensLimit", FieldType::Integer)
        .required_to_be_configured()
        .validate(ValidationRule::positive())
        .validate(ValidationRule::with_context(
            "be not less than `maxTokensToGenerate`",
            |value, ctx| match (value.as_u64(), ctx.resolved_u64("maxTokensToGenerate")) {
                (Some(limit), Some(to_generate)) => limit >= to_generate,
                _ => true,
            },
        ))
}

/// Schema resolving [`UserModelParams`](super::UserModelParams) into
/// [`ModelParams`](super::ModelParams). Backends compose on top of it.
pub fn basic_model_params_schema() -> ParamsSchema {
    ParamsSchema::new("ModelParams")
        .rule(ParamRule::resolve("modelId", FieldType::String).required_to_be_configured())
        .rule(ParamRule::resolve("systemPrompt", FieldType::String).default_value(DEFAULT_SYSTEM_PROMPT))
        .rule(max_tokens_to_generate_rule())
        .rule(tokens_limit_rule())
        .rule(
            ParamRule::resolve("maxContextTheoremsNumber", FieldType::Integer)
                .default(|_| json!(DEFAULT_MAX_CONTEXT_THEOREMS_NUMBER))
                .validate(ValidationRule::non_negative()),
        )
        .rule(
            ParamRule::resolve("multiroundProfile", FieldType::Object)
                .nested(multiround_profile_schema()),
        )
        .rule(
            ParamRule::resolve_as("choices", "defaultChoices", FieldType::Integer)
                .required_to_be_configured()
                .validate(ValidationRule::positive()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ModelParams, UserModelParams, UserMultiroundProfile};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn complete_input() -> UserModelParams {
        UserModelParams::new("test model")
            .with_choices(1)
            .with_max_tokens_to_generate(100)
            .with_tokens_limit(1000)
            .with_multiround_profile(UserMultiroundProfile {
                proof_fix_choices: Some(3),
                ..Default::default()
            })
    }

    fn expected_params() -> ModelParams {
        ModelParams {
            model_id: "test model".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens_to_generate: 100,
            tokens_limit: 1000,
            max_context_theorems_number: DEFAULT_MAX_CONTEXT_THEOREMS_NUMBER,
            default_choices: 1,
            multiround_profile: MultiroundProfile {
                default_proof_fix_choices: 3,
                ..default_multiround_profile()
            },
        }
    }

    #[test]
    fn test_resolves_with_defaults() {
        let result = basic_model_params_schema().resolve_params::<_, ModelParams>(&complete_input());
        assert_eq!(result.resolved, Some(expected_params()));
        assert_eq!(result.invalid_causes().count(), 0);
    }

    #[test]
    fn test_resolves_missing_multiround_profile() {
        let input = UserModelParams {
            multiround_profile: None,
            ..complete_input()
        };
        let result = basic_model_params_schema().resolve_params::<_, ModelParams>(&input);
        assert_eq!(
            result.resolved,
            Some(ModelParams {
                multiround_profile: default_multiround_profile(),
                ..expected_params()
            })
        );
    }

    #[test]
    fn test_reports_every_failed_parameter() {
        let input = UserModelParams {
            model_id: Some("test model".to_string()),
            choices: None,
            system_prompt: Some("Generate proof!".to_string()),
            max_tokens_to_generate: Some(-1),
            tokens_limit: Some(-1),
            max_context_theorems_number: None,
            multiround_profile: Some(UserMultiroundProfile {
                max_rounds_number: Some(-1),
                proof_fix_choices: Some(-1),
                proof_fix_prompt: Some("Fix proof!".to_string()),
                max_previous_proof_versions_number: None,
            }),
        };
        let result = basic_model_params_schema().resolve_params::<_, ModelParams>(&input);

        assert!(result.resolved.is_none());
        assert_eq!(result.invalid_causes().count(), 5);
    }

    #[test]
    fn test_tokens_limit_must_cover_generation() {
        let input = complete_input().with_max_tokens_to_generate(2000);
        let result = basic_model_params_schema().resolve_params::<_, ModelParams>(&input);
        let failed: Vec<&str> = result.invalid_causes().map(|l| l.output_name.as_str()).collect();
        assert_eq!(failed, vec!["tokensLimit"]);
    }

    proptest! {
        /// Resolving the same input twice gives identical params and logs.
        #[test]
        fn resolution_is_deterministic(
            choices in -3i64..10,
            max_tokens in -10i64..5000,
            tokens_limit in -10i64..5000,
            rounds in proptest::option::of(-2i64..6),
        ) {
            let input = UserModelParams::new("m")
                .with_choices(choices)
                .with_max_tokens_to_generate(max_tokens)
                .with_tokens_limit(tokens_limit)
                .with_multiround_profile(UserMultiroundProfile {
                    max_rounds_number: rounds,
                    ..Default::default()
                });
            let schema = basic_model_params_schema();
            let first = schema.resolve_params::<_, ModelParams>(&input);
            let second = schema.resolve_params::<_, ModelParams>(&input);

            prop_assert_eq!(&first.resolved, &second.resolved);
            prop_assert_eq!(&first.logs, &second.logs);
            prop_assert_eq!(first.resolved.is_some(), first.invalid_causes().count() == 0);
        }
    }
}
