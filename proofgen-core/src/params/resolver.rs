//! Declarative parameter resolution.
//!
//! A [`ParamsSchema`] is an ordered list of [`ParamRule`]s. Each rule reads
//! at most one input field and produces one output field, following a fixed
//! order:
//!
//! 1. an override rule, if declared, wins over anything the user supplied;
//! 2. otherwise a user-supplied value is taken as is;
//! 3. otherwise a default rule, if declared, computes the value;
//! 4. otherwise the field is either reported as missing (if required) or
//!    left undefined.
//!
//! The value is then checked against its [`FieldType`] and every declared
//! [`ValidationRule`]. Rules are evaluated in order and can read the raw
//! input and every sibling resolved before them through
//! [`ResolutionContext`].
//!
//! Resolution never fails: it returns a [`ResolutionResult`] whose
//! `resolved` value is present iff no [`ParamLog`] entry carries an invalid
//! cause.
//!
//! # Example
//!
//! ```
//! use proofgen_core::params::{FieldType, ParamRule, ParamsSchema, ValidationRule};
//! use serde_json::{json, Map, Value};
//!
//! let schema = ParamsSchema::new("Example")
//!     .rule(
//!         ParamRule::resolve("choices", FieldType::Integer)
//!             .required_to_be_configured()
//!             .validate(ValidationRule::positive()),
//!     )
//!     .rule(ParamRule::resolve("prompt", FieldType::String).default_value("Prove it."));
//!
//! let result = schema.resolve::<Map<String, Value>>(&json!({ "choices": 3 }));
//! assert_eq!(result.resolved.unwrap()["prompt"], json!("Prove it."));
//!
//! let failed = schema.resolve::<Map<String, Value>>(&json!({ "choices": -3 }));
//! assert!(failed.resolved.is_none());
//! assert_eq!(failed.invalid_causes().count(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::field_type::FieldType;
use crate::error::{Error, Result};
use crate::messages;

/// Computes a value from the raw input and already-resolved siblings.
pub type ValueFn = Arc<dyn Fn(&ResolutionContext<'_>) -> Value + Send + Sync>;

/// Checks a value, optionally looking at its siblings.
pub type PredicateFn = Arc<dyn Fn(&Value, &ResolutionContext<'_>) -> bool + Send + Sync>;

/// What a rule can see while it is being evaluated.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionContext<'a> {
    /// Raw input object for the current (possibly nested) schema.
    pub input: &'a Map<String, Value>,
    /// Output fields resolved so far, in declaration order.
    pub resolved: &'a Map<String, Value>,
}

impl<'a> ResolutionContext<'a> {
    /// Raw input value, treating `null` as absent.
    pub fn input(&self, name: &str) -> Option<&'a Value> {
        self.input.get(name).filter(|v| !v.is_null())
    }

    /// Already-resolved sibling value.
    pub fn resolved(&self, name: &str) -> Option<&'a Value> {
        self.resolved.get(name)
    }

    /// Already-resolved sibling as an unsigned integer.
    pub fn resolved_u64(&self, name: &str) -> Option<u64> {
        self.resolved(name).and_then(Value::as_u64)
    }

    /// Already-resolved sibling as a string.
    pub fn resolved_str(&self, name: &str) -> Option<&'a str> {
        self.resolved(name).and_then(Value::as_str)
    }

    /// Raw input value as an array length.
    pub fn input_len(&self, name: &str) -> Option<usize> {
        self.input(name).and_then(Value::as_array).map(Vec::len)
    }
}

/// Predicate plus the human-readable requirement it enforces.
#[derive(Clone)]
pub struct ValidationRule {
    predicate: PredicateFn,
    description: String,
}

impl ValidationRule {
    /// Create a rule from a context-free predicate. The description is
    /// phrased as a requirement, e.g. "be positive".
    pub fn new(
        description: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: Arc::new(move |value, _| predicate(value)),
            description: description.into(),
        }
    }

    /// Create a rule that can read sibling fields.
    pub fn with_context(
        description: impl Into<String>,
        predicate: impl Fn(&Value, &ResolutionContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: Arc::new(predicate),
            description: description.into(),
        }
    }

    /// Number strictly greater than zero.
    pub fn positive() -> Self {
        Self::new("be positive", |v| v.as_f64().is_some_and(|n| n > 0.0))
    }

    /// Number greater than or equal to zero.
    pub fn non_negative() -> Self {
        Self::new("be non-negative", |v| v.as_f64().is_some_and(|n| n >= 0.0))
    }

    /// Number within `[min, max]`.
    pub fn in_range(min: f64, max: f64) -> Self {
        Self::new(format!("be in range between {min} and {max}"), move |v| {
            v.as_f64().is_some_and(|n| (min..=max).contains(&n))
        })
    }

    /// Non-empty string or array.
    pub fn non_empty() -> Self {
        Self::new("be non-empty", |v| match v {
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            _ => false,
        })
    }

    /// The requirement text, e.g. "be positive".
    pub fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, value: &Value, ctx: &ResolutionContext<'_>) -> bool {
        (self.predicate)(value, ctx)
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Clone)]
struct OverrideRule {
    value: ValueFn,
    explanation: Option<String>,
}

/// Resolution rule for a single output field.
#[derive(Clone)]
pub struct ParamRule {
    input_name: Option<String>,
    output_name: String,
    field_type: FieldType,
    override_rule: Option<OverrideRule>,
    default_rule: Option<ValueFn>,
    required: bool,
    validations: Vec<ValidationRule>,
    nested: Option<Arc<ParamsSchema>>,
}

impl ParamRule {
    /// Resolve `name` from the input field of the same name.
    pub fn resolve(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self::resolve_as(name.clone(), name, field_type)
    }

    /// Resolve output field `output` from input field `input`.
    pub fn resolve_as(
        input: impl Into<String>,
        output: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        Self {
            input_name: Some(input.into()),
            output_name: output.into(),
            field_type,
            override_rule: None,
            default_rule: None,
            required: false,
            validations: Vec::new(),
            nested: None,
        }
    }

    /// Insert a field that has no input counterpart; its value is always
    /// computed by `value`.
    pub fn insert(
        name: impl Into<String>,
        field_type: FieldType,
        value: impl Fn(&ResolutionContext<'_>) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            input_name: None,
            output_name: name.into(),
            field_type,
            override_rule: Some(OverrideRule {
                value: Arc::new(value),
                explanation: None,
            }),
            default_rule: None,
            required: true,
            validations: Vec::new(),
            nested: None,
        }
    }

    /// Always use the computed value, ignoring any user-supplied one.
    pub fn override_with(
        mut self,
        value: impl Fn(&ResolutionContext<'_>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.override_rule = Some(OverrideRule {
            value: Arc::new(value),
            explanation: None,
        });
        self
    }

    /// Like [`ParamRule::override_with`], with an explanation surfaced to the
    /// user when their value gets replaced.
    pub fn override_with_explanation(
        mut self,
        value: impl Fn(&ResolutionContext<'_>) -> Value + Send + Sync + 'static,
        explanation: impl Into<String>,
    ) -> Self {
        self.override_rule = Some(OverrideRule {
            value: Arc::new(value),
            explanation: Some(explanation.into()),
        });
        self
    }

    /// Compute a value when the user supplied none.
    pub fn default(
        mut self,
        value: impl Fn(&ResolutionContext<'_>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.default_rule = Some(Arc::new(value));
        self
    }

    /// Constant default.
    pub fn default_value(self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.default(move |_| value.clone())
    }

    /// Fail resolution if no value can be found.
    pub fn required_to_be_configured(mut self) -> Self {
        self.required = true;
        self
    }

    /// Add a validation rule. All rules are checked; the first failing one
    /// is reported.
    pub fn validate(mut self, rule: ValidationRule) -> Self {
        self.validations.push(rule);
        self
    }

    /// Resolve this field with its own schema, merging a partial user object
    /// with the nested defaults field by field.
    pub fn nested(mut self, schema: ParamsSchema) -> Self {
        self.field_type = FieldType::Object;
        self.nested = Some(Arc::new(schema));
        self
    }

    /// Name of the output field.
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Name of the input field, if any.
    pub fn input_name(&self) -> Option<&str> {
        self.input_name.as_deref()
    }
}

impl fmt::Debug for ParamRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamRule")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("field_type", &self.field_type)
            .field("has_override", &self.override_rule.is_some())
            .field("has_default", &self.default_rule.is_some())
            .field("required", &self.required)
            .field("validations", &self.validations)
            .field("nested", &self.nested.as_ref().map(|s| s.title()))
            .finish()
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSource {
    /// Supplied by the user
    Explicit,
    /// Computed by a default rule
    Default,
    /// Computed by an override rule, replacing or filling the user value
    Override,
    /// Computed field with no input counterpart
    Inserted,
    /// No value found
    Undefined,
}

/// Resolution log entry for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamLog {
    /// Input field name, if the rule reads one
    pub input_name: Option<String>,
    /// Output field name (dotted path for nested fields)
    pub output_name: String,
    /// Value the user supplied
    pub input_value: Option<Value>,
    /// Value after resolution
    pub resolved_value: Option<Value>,
    /// Where the resolved value came from
    pub source: ParamSource,
    /// Explanation attached to an override that replaced a user value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_explanation: Option<String>,
    /// Why this field makes resolution fail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_cause: Option<String>,
}

impl ParamLog {
    /// Whether the user value was replaced by a different override value.
    pub fn user_value_overridden(&self) -> bool {
        self.source == ParamSource::Override
            && self.input_value.is_some()
            && self.input_value != self.resolved_value
    }
}

impl fmt::Display for ParamLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.invalid_cause {
            Some(cause) => write!(f, "`{}` {}", self.output_name, cause),
            None => write!(
                f,
                "`{}` resolved ({:?}) to {}",
                self.output_name,
                self.source,
                self.resolved_value
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| "undefined".to_string())
            ),
        }
    }
}

/// Outcome of resolving a schema against raw input.
#[derive(Debug, Clone)]
pub struct ResolutionResult<T> {
    /// Typed parameters, present iff every field resolved
    pub resolved: Option<T>,
    /// One entry per field, in resolution order
    pub logs: Vec<ParamLog>,
}

impl<T> ResolutionResult<T> {
    /// Entries that make resolution fail.
    pub fn invalid_causes(&self) -> impl Iterator<Item = &ParamLog> {
        self.logs.iter().filter(|log| log.invalid_cause.is_some())
    }

    /// Whether every field resolved.
    pub fn is_success(&self) -> bool {
        self.resolved.is_some()
    }

    /// Aggregated text of every invalid cause, e.g.
    /// "`choices` is required, ...; `tokensLimit` should be positive ...".
    pub fn failure_description(&self) -> String {
        self.invalid_causes()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Convert into a `Result`, turning failure into a configuration error
    /// that lists every failed field.
    pub fn into_result(self, model_id: &str) -> Result<T> {
        let description = self.failure_description();
        self.resolved.ok_or_else(|| {
            Error::configuration(messages::model_configured_incorrectly(
                model_id,
                &description,
            ))
        })
    }
}

/// Ordered collection of rules with a title used in diagnostics.
#[derive(Clone, Debug)]
pub struct ParamsSchema {
    title: String,
    rules: Vec<ParamRule>,
}

impl ParamsSchema {
    /// Create an empty schema.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            rules: Vec::new(),
        }
    }

    /// Append a rule.
    pub fn rule(mut self, rule: ParamRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Layer `extension` on top of this schema. Extension rules replace base
    /// rules with the same output name in place; new ones are appended.
    pub fn compose(mut self, extension: ParamsSchema) -> Self {
        for rule in extension.rules {
            match self
                .rules
                .iter_mut()
                .find(|existing| existing.output_name == rule.output_name)
            {
                Some(existing) => *existing = rule,
                None => self.rules.push(rule),
            }
        }
        self.title = extension.title;
        self
    }

    /// Schema title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[ParamRule] {
        &self.rules
    }

    /// Resolve raw JSON input into `T`.
    pub fn resolve<T: DeserializeOwned>(&self, input: &Value) -> ResolutionResult<T> {
        let (resolved, mut logs) = self.resolve_map(input, "");
        let resolved = match resolved {
            Some(map) => match serde_json::from_value::<T>(Value::Object(map)) {
                Ok(typed) => Some(typed),
                Err(e) => {
                    logs.push(self.schema_mismatch_log(e.to_string()));
                    None
                }
            },
            None => None,
        };
        ResolutionResult { resolved, logs }
    }

    /// Resolve any serializable user params into `T`.
    pub fn resolve_params<U: Serialize, T: DeserializeOwned>(
        &self,
        input: &U,
    ) -> ResolutionResult<T> {
        match serde_json::to_value(input) {
            Ok(value) => self.resolve(&value),
            Err(e) => ResolutionResult {
                resolved: None,
                logs: vec![self.schema_mismatch_log(e.to_string())],
            },
        }
    }

    fn schema_mismatch_log(&self, details: String) -> ParamLog {
        ParamLog {
            input_name: None,
            output_name: self.title.clone(),
            input_value: None,
            resolved_value: None,
            source: ParamSource::Undefined,
            override_explanation: None,
            invalid_cause: Some(format!("does not match the `{}` schema: {}", self.title, details)),
        }
    }

    /// Resolve into an untyped object, logging nested fields under `prefix`.
    fn resolve_map(&self, input: &Value, prefix: &str) -> (Option<Map<String, Value>>, Vec<ParamLog>) {
        let empty = Map::new();
        let input = match input {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                let log = ParamLog {
                    input_name: None,
                    output_name: if prefix.is_empty() {
                        self.title.clone()
                    } else {
                        prefix.trim_end_matches('.').to_string()
                    },
                    input_value: Some(other.clone()),
                    resolved_value: None,
                    source: ParamSource::Undefined,
                    override_explanation: None,
                    invalid_cause: FieldType::Object.mismatch_cause(other),
                };
                return (None, vec![log]);
            }
        };

        let mut resolved = Map::new();
        let mut logs = Vec::with_capacity(self.rules.len());
        let mut failed = false;

        for rule in &self.rules {
            let (value, mut rule_logs) = self.resolve_rule(rule, input, &resolved, prefix);
            failed |= rule_logs.iter().any(|log| log.invalid_cause.is_some());
            logs.append(&mut rule_logs);
            if let Some(value) = value {
                resolved.insert(rule.output_name.clone(), value);
            }
        }

        if failed {
            (None, logs)
        } else {
            (Some(resolved), logs)
        }
    }

    fn resolve_rule(
        &self,
        rule: &ParamRule,
        input: &Map<String, Value>,
        resolved: &Map<String, Value>,
        prefix: &str,
    ) -> (Option<Value>, Vec<ParamLog>) {
        let ctx = ResolutionContext { input, resolved };
        let output_path = format!("{}{}", prefix, rule.output_name);
        let input_value = rule
            .input_name
            .as_deref()
            .and_then(|name| ctx.input(name))
            .cloned();

        let (value, source) = if let Some(override_rule) = &rule.override_rule {
            let source = if rule.input_name.is_some() {
                ParamSource::Override
            } else {
                ParamSource::Inserted
            };
            (non_null((override_rule.value)(&ctx)), source)
        } else if let Some(value) = &input_value {
            (Some(value.clone()), ParamSource::Explicit)
        } else if let Some(default_rule) = &rule.default_rule {
            (non_null(default_rule(&ctx)), ParamSource::Default)
        } else {
            (None, ParamSource::Undefined)
        };

        let mut log = ParamLog {
            input_name: rule.input_name.clone(),
            output_name: output_path.clone(),
            input_value: input_value.clone(),
            resolved_value: value.clone(),
            source,
            override_explanation: None,
            invalid_cause: None,
        };

        if log.user_value_overridden() {
            let explanation = rule
                .override_rule
                .as_ref()
                .and_then(|o| o.explanation.clone());
            let model_id = ctx
                .resolved_str("modelId")
                .or_else(|| ctx.input("modelId").and_then(Value::as_str))
                .unwrap_or("<unknown>");
            let message = messages::user_value_was_overridden(
                model_id,
                &output_path,
                log.resolved_value.as_ref().unwrap_or(&Value::Null),
                explanation.as_deref(),
            );
            warn!(schema = %self.title, param = %output_path, "{}", message);
            log.override_explanation = explanation;
        }

        if let Some(nested) = &rule.nested {
            return Self::resolve_nested(nested, log, value, &output_path);
        }

        let Some(value) = value else {
            if rule.required {
                log.invalid_cause =
                    Some("is required, but neither a user value nor a default one is specified".to_string());
            }
            return (None, vec![log]);
        };

        if let Some(cause) = rule.field_type.mismatch_cause(&value) {
            log.invalid_cause = Some(cause);
            return (None, vec![log]);
        }

        let failing: Vec<&ValidationRule> = rule
            .validations
            .iter()
            .filter(|validation| !validation.check(&value, &ctx))
            .collect();
        if let Some(first) = failing.first() {
            log.invalid_cause = Some(format!("should {}, but has value {}", first.description, value));
            return (None, vec![log]);
        }

        (Some(value), vec![log])
    }

    fn resolve_nested(
        nested: &ParamsSchema,
        mut log: ParamLog,
        value: Option<Value>,
        output_path: &str,
    ) -> (Option<Value>, Vec<ParamLog>) {
        let nested_input = match value {
            None => Value::Object(Map::new()),
            Some(value @ Value::Object(_)) => value,
            Some(other) => {
                log.invalid_cause = FieldType::Object.mismatch_cause(&other);
                return (None, vec![log]);
            }
        };
        if log.source == ParamSource::Undefined {
            log.source = ParamSource::Default;
        }

        let (nested_resolved, nested_logs) =
            nested.resolve_map(&nested_input, &format!("{output_path}."));
        let nested_value = nested_resolved.map(Value::Object);
        log.resolved_value = nested_value.clone();

        let mut logs = Vec::with_capacity(nested_logs.len() + 1);
        logs.push(log);
        logs.extend(nested_logs);
        (nested_value, logs)
    }
}

fn non_null(value: Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}
