//! Persisted telemetry records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::llm::{Chat, EstimatedTokens};

/// Outcome of a logged generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Flattened cause of a failed generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedError {
    pub type_name: String,
    pub message: String,
}

/// One logged generation attempt.
///
/// `chat`, `params` and `generated_raw_proofs` are only written by a
/// logger in debug mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggerRecord {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub model_id: String,
    pub response_status: ResponseStatus,
    pub choices: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<EstimatedTokens>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LoggedError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<Chat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_raw_proofs: Option<Vec<String>>,
}

impl LoggerRecord {
    pub fn is_success(&self) -> bool {
        self.response_status == ResponseStatus::Success
    }

    /// Serialize for the log file (without the delimiter). Every `@` is
    /// written as the JSON escape `\u0040`, so no record contains the
    /// delimiter.
    pub fn serialize_to_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?.replace('@', "\\u0040"))
    }

    /// Parse a record written by [`LoggerRecord::serialize_to_string`].
    /// Trailing whitespace is ignored.
    pub fn deserialize_from_string(raw: &str) -> Result<Self> {
        serde_json::from_str(raw.trim_end()).map_err(|e| {
            Error::internal(format!("malformed generations log record {:?}: {}", raw, e))
        })
    }
}
