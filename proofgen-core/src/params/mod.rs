//! Parameter resolution.
//!
//! Turns loosely-typed user configuration into validated model parameters
//! through declarative [`ParamsSchema`]s. Every backend composes its own
//! schema on top of [`basic_model_params_schema`].

mod basic;
mod field_type;
mod model_params;
mod resolver;

pub use basic::{
    basic_model_params_schema, default_multiround_profile, multiround_profile_schema,
    DEFAULT_MAX_CONTEXT_THEOREMS_NUMBER, DEFAULT_PROOF_FIX_PROMPT, DEFAULT_SYSTEM_PROMPT,
    DIAGNOSTIC_PLACEHOLDER,
};
pub(crate) use basic::{max_tokens_to_generate_rule, tokens_limit_rule};
pub use field_type::{value_type_name, FieldType};
pub use model_params::{
    ModelParams, MultiroundProfile, ResolvedModelParams, UserModelParams, UserMultiroundProfile,
};
pub use resolver::{
    ParamLog, ParamRule, ParamSource, ParamsSchema, PredicateFn, ResolutionContext,
    ResolutionResult, ValidationRule, ValueFn,
};
