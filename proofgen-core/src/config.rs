//! Service configuration and model settings.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backends::{
    LmStudioUserModelParams, OpenAiUserModelParams, PredefinedProofsUserModelParams,
};
use crate::error::{Error, Result};
use crate::messages;

/// Default directory of the generations logs.
pub const DEFAULT_LOGS_DIR: &str = "~/.proofgen/logs";

/// Default number of targets generated for concurrently.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;

/// Configuration of an [`LlmService`](crate::service::LlmService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// Directory of the generations logs; `~` is expanded
    pub logs_dir: String,
    /// Exact log file, overriding `logs_dir`
    pub generations_log_path: Option<PathBuf>,
    /// Keep chats and params in the log and never truncate it
    pub debug_logs: bool,
    /// Clear the log when the service starts
    pub clean_logs_on_start: bool,
    /// Concurrency bound of multi-target generation
    pub max_concurrent_requests: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            logs_dir: DEFAULT_LOGS_DIR.to_string(),
            generations_log_path: None,
            debug_logs: false,
            clean_logs_on_start: true,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            logs_dir: std::env::var("PROOFGEN_LOGS_DIR").unwrap_or(defaults.logs_dir),
            generations_log_path: std::env::var("PROOFGEN_GENERATIONS_LOG")
                .ok()
                .map(PathBuf::from),
            debug_logs: std::env::var("PROOFGEN_DEBUG_LOGS")
                .map(|s| s != "0" && s.to_lowercase() != "false")
                .unwrap_or(false),
            clean_logs_on_start: defaults.clean_logs_on_start,
            max_concurrent_requests: std::env::var("PROOFGEN_MAX_CONCURRENT_REQUESTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_requests),
        }
    }

    pub fn with_logs_dir(mut self, dir: impl Into<String>) -> Self {
        self.logs_dir = dir.into();
        self
    }

    pub fn with_generations_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.generations_log_path = Some(path.into());
        self
    }

    pub fn with_debug_logs(mut self, debug: bool) -> Self {
        self.debug_logs = debug;
        self
    }

    pub fn with_clean_logs_on_start(mut self, clean: bool) -> Self {
        self.clean_logs_on_start = clean;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max.max(1);
        self
    }

    /// Log file of the service named `service_name`.
    pub fn generations_log_path(&self, service_name: &str) -> PathBuf {
        if let Some(path) = &self.generations_log_path {
            return expand_path(path);
        }
        let dir = shellexpand::tilde(&self.logs_dir);
        Path::new(dir.as_ref()).join(format!("{}-generations.log", service_name))
    }
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => path.to_path_buf(),
    }
}

/// Configuration of a [`FixLoop`](crate::fix::FixLoop).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixLoopConfig {
    /// Choices of the first round; `defaultChoices` if unset
    pub initial_choices: Option<usize>,
    /// Choices of every fix round; `defaultProofFixChoices` if unset
    pub fix_choices: Option<usize>,
    /// Limit of a single proof-checking call
    pub check_timeout: Option<Duration>,
}

impl FixLoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_choices(mut self, choices: usize) -> Self {
        self.initial_choices = Some(choices);
        self
    }

    pub fn with_fix_choices(mut self, choices: usize) -> Self {
        self.fix_choices = Some(choices);
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = Some(timeout);
        self
    }
}

/// Models configured by the user, grouped by backend, as stored in the
/// editor settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelsSettings {
    pub open_ai_params: Vec<OpenAiUserModelParams>,
    pub lm_studio_params: Vec<LmStudioUserModelParams>,
    pub predefined_proofs_model_params: Vec<PredefinedProofsUserModelParams>,
}

impl ModelsSettings {
    /// Parse and validate settings JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(raw)
            .map_err(|e| Error::validation(format!("invalid models settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a file; `~` is expanded.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(expand_path(path.as_ref()))?;
        Self::from_json(&raw)
    }

    /// Identifiers of every configured model, in settings order.
    /// Models without an identifier are reported as `<unknown>`.
    pub fn model_ids(&self) -> Vec<&str> {
        self.open_ai_params
            .iter()
            .map(|p| p.base.model_id_or_unknown())
            .chain(self.lm_studio_params.iter().map(|p| p.base.model_id_or_unknown()))
            .chain(
                self.predefined_proofs_model_params
                    .iter()
                    .map(|p| p.base.model_id_or_unknown()),
            )
            .collect()
    }

    /// At least one model, and unique identifiers across every backend.
    pub fn validate(&self) -> Result<()> {
        let ids = self.model_ids();
        if ids.is_empty() {
            return Err(Error::configuration(messages::NO_VALID_MODELS_ARE_CHOSEN));
        }
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) {
                return Err(Error::configuration(messages::models_ids_are_not_unique(id)));
            }
        }
        Ok(())
    }
}
