//! Per-request generation options.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// What to do with a failed backend call.
///
/// Configuration errors always propagate, whatever the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorsHandlingMode {
    /// Return the error to the caller
    #[default]
    RethrowErrors,
    /// Publish and log the failure, then return no proofs
    LogAndSwallowErrors,
}

/// Options of a single generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub errors_handling_mode: ErrorsHandlingMode,
    /// Shared signal aborting in-flight requests
    pub cancellation: Option<CancellationToken>,
    /// Wall-clock limit of this request
    pub timeout: Option<Duration>,
}

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_errors_handling_mode(mut self, mode: ErrorsHandlingMode) -> Self {
        self.errors_handling_mode = mode;
        self
    }

    pub fn swallowing_errors(self) -> Self {
        self.with_errors_handling_mode(ErrorsHandlingMode::LogAndSwallowErrors)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the shared signal already fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}
