//! Error types for proofgen-core.
//!
//! The taxonomy is sealed: callers see [`Error::Configuration`],
//! [`Error::Validation`] and [`Error::GenerationFailed`]. Only the latter is
//! eligible for telemetry and fix rounds. [`Error::Internal`] marks a broken
//! invariant and is never meant to be shown to a user.

use std::fmt;

use thiserror::Error;

/// Result type alias using proofgen-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving parameters or generating proofs.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing setup. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A backend call failed.
    #[error(transparent)]
    GenerationFailed(#[from] GenerationFailedError),

    /// Parameters have an invalid shape.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Telemetry file I/O error
    #[error("Telemetry I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an internal invariant violation.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wrap a backend failure.
    pub fn generation_failed(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::GenerationFailed(GenerationFailedError::new(cause))
    }

    /// Whether the failure was caused by a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailed(e) if matches!(e.backend_cause(), Some(BackendError::Timeout { .. }))
        )
    }

    /// Whether the failure was caused by the shared cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailed(e) if matches!(e.backend_cause(), Some(BackendError::Cancelled))
        )
    }

    /// Short name of the error kind, used in telemetry and messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::GenerationFailed(_) => "GenerationFailedError",
            Self::Validation { .. } => "ValidationError",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
            Self::Internal(_) => "InternalError",
        }
    }
}

/// A failed backend call. Wraps exactly one cause that is not itself part
/// of the taxonomy.
#[derive(Debug)]
pub struct GenerationFailedError {
    cause: Box<dyn std::error::Error + Send + Sync>,
}

impl GenerationFailedError {
    /// Wrap `cause`.
    ///
    /// # Panics
    ///
    /// Panics if `cause` is already an [`Error`] or a
    /// [`GenerationFailedError`]: double wrapping is a construction bug.
    pub fn new(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        let cause: Box<dyn std::error::Error + Send + Sync> = Box::new(cause);
        assert!(
            !cause.is::<Error>() && !cause.is::<GenerationFailedError>(),
            "received double-wrapped error, cause is already a taxonomy error: {cause}"
        );
        Self { cause }
    }

    /// The wrapped cause.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// The cause as a [`BackendError`], if it is one.
    pub fn backend_cause(&self) -> Option<&BackendError> {
        self.cause.downcast_ref::<BackendError>()
    }

    /// Name of the cause kind as persisted in telemetry.
    pub fn cause_kind_name(&self) -> String {
        match self.backend_cause() {
            Some(backend) => backend.kind_name().to_string(),
            None => "Error".to_string(),
        }
    }
}

impl fmt::Display for GenerationFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generation failed: {}", self.cause)
    }
}

impl std::error::Error for GenerationFailedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Failures raised by backends before the engine classifies them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The remote API answered with an error
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Timeout during the request
    #[error("Request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The shared cancellation signal fired
    #[error("Request was cancelled")]
    Cancelled,

    /// Fewer distinct outputs than requested choices
    #[error("`choices = {requested}` > `available proofs length = {available}`")]
    NotEnoughProofs { requested: usize, available: usize },

    /// The backend cannot perform this operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The backend detected a configuration problem while serving the request
    #[error("{0}")]
    InvalidConfiguration(String),

    /// Any other backend failure
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Short name of the failure kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Http(_) => "HttpError",
            Self::Api { .. } => "ApiError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Cancelled => "CancelledError",
            Self::NotEnoughProofs { .. } => "NotEnoughProofsError",
            Self::UnsupportedOperation(_) => "UnsupportedOperationError",
            Self::InvalidConfiguration(_) => "InvalidConfigurationError",
            Self::Other(_) => "BackendError",
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }
}
