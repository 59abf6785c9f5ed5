//! User-facing message texts.
//!
//! The library never renders UI; these strings are what a frontend shows
//! when a model is misconfigured or a backend becomes unavailable.

use std::time::Duration;

use serde_json::Value;

/// A backend failed and is expected to recover in about `retry_in`.
pub fn service_became_unavailable(service_name: &str, error_message: &str, retry_in: Duration) -> String {
    format!(
        "`{service_name}` became unavailable for this generation. \
         If you want to use it, try again in ~ {}. Caused by error: \"{error_message}\".",
        format_duration(retry_in)
    )
}

/// A remote backend could not be reached at all.
pub fn failed_to_reach_remote_service(service_name: &str, message: &str) -> String {
    format!(
        "`{service_name}` became unavailable for this generation: {message}. \
         Check your internet connection and try again."
    )
}

/// A backend answered successfully after a series of failures.
pub fn service_is_available_again(service_name: &str) -> String {
    format!("`{service_name}` is available again!")
}

/// Per-model configuration problem; `error_message` lists the failed fields.
pub fn model_configured_incorrectly(model_id: &str, error_message: &str) -> String {
    format!(
        "Model \"{model_id}\" is configured incorrectly: {error_message}. \
         Thus, \"{model_id}\" will be skipped for this run. \
         Please fix the model's configuration in the settings."
    )
}

/// Two configured models share an identifier.
pub fn models_ids_are_not_unique(model_id: &str) -> String {
    format!("Please make identifiers of the models unique (\"{model_id}\" is not unique).")
}

/// The backend needs an API key that was not provided.
pub fn api_key_is_not_set(service_name: &str) -> String {
    format!("Please set your {service_name} API key in the settings.")
}

/// No model survived configuration.
pub const NO_VALID_MODELS_ARE_CHOSEN: &str =
    "No valid models are chosen. Please specify at least one in the settings.";

/// An override rule replaced the user's value.
pub fn user_value_was_overridden(
    model_id: &str,
    param_name: &str,
    with_value: &Value,
    explanation: Option<&str>,
) -> String {
    let explanation = explanation.map(|e| format!(": {e}")).unwrap_or_default();
    format!(
        "The `{param_name}` parameter of the \"{model_id}\" model was overridden \
         with the value {with_value}{explanation}. Please configure it the same way in the settings."
    )
}

/// Format a duration as its two most significant non-zero units, e.g.
/// "2 hours, 0 minutes" or "5 seconds".
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let items = [
        (total / 86_400, "day"),
        ((total % 86_400) / 3_600, "hour"),
        ((total % 3_600) / 60, "minute"),
        (total % 60, "second"),
    ];

    for (i, (value, name)) in items.iter().enumerate() {
        if *value != 0 {
            let next = items
                .get(i + 1)
                .map(|(next_value, next_name)| format!(", {}", format_item(*next_value, next_name)))
                .unwrap_or_default();
            return format!("{}{}", format_item(*value, name), next);
        }
    }
    format_item(0, "second")
}

fn format_item(value: u64, name: &str) -> String {
    let suffix = if value == 1 { "" } else { "s" };
    format!("{value} {name}{suffix}")
}
