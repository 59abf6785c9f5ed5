//! # proofgen-core
//!
//! LLM proof generation, validation and repair orchestration.
//!
//! ## Core Components
//!
//! - **Params**: schema-driven resolution of user model settings
//! - **Service**: backend calls with events, timeouts and error policy
//! - **Fix**: bounded generate, check and fix rounds
//! - **Telemetry**: generations log and backend availability estimates
//!
//! ## Example
//!
//! ```rust,ignore
//! use proofgen_core::{
//!     EventBus, FixLoop, FixLoopConfig, GenerationOptions, LlmService, OpenAiBackend,
//!     ServiceConfig,
//! };
//!
//! let service = LlmService::new(OpenAiBackend::new(), EventBus::default(), ServiceConfig::from_env())?;
//! let params = service.resolve_parameters_or_err(&user_params)?;
//!
//! let fix_loop = FixLoop::new(service, checker, FixLoopConfig::default());
//! let outcome = fix_loop
//!     .run(context, params, &GenerationOptions::default(), |_| true)
//!     .await?;
//! if let Some(proof) = outcome.valid_proof() {
//!     println!("{}", proof.proof.proof());
//! }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod fix;
pub mod llm;
pub mod messages;
pub mod params;
pub mod service;
pub mod telemetry;

// Re-exports for convenience
pub use backends::{
    LlmBackend, LmStudioBackend, LmStudioModelParams, LmStudioUserModelParams, MockBackend,
    MockModelParams, MockUserModelParams, OpenAiBackend, OpenAiModelParams, OpenAiUserModelParams,
    PredefinedProofsBackend, PredefinedProofsModelParams, PredefinedProofsUserModelParams,
};
pub use config::{FixLoopConfig, ModelsSettings, ServiceConfig};
pub use error::{BackendError, Error, GenerationFailedError, Result};
pub use fix::{
    BenchmarkedProof, ChainTermination, FixLoop, FixLoopOutcome, FixRound, ProofCheckResult,
    ProofChecker, ProofFixChain, ProofRef, ProofStatus, RoundOutcome,
};
pub use llm::{
    AnalyzedChat, Chat, ChatMessage, ChatRole, EstimatedTokens, GeneratedRawContent,
    GeneratedRawContentItem, GenerationTokens, ProofGenerationContext, ProofVersion,
    TheoremSummary,
};
pub use params::{
    ModelParams, MultiroundProfile, ParamLog, ParamRule, ParamSource, ParamsSchema,
    ResolutionResult, ResolvedModelParams, UserModelParams, UserMultiroundProfile,
    ValidationRule,
};
pub use service::{
    ErrorsHandlingMode, EventBus, EventsTracker, GeneratedProof, GenerationOptions,
    LlmService, LlmServiceEvent, RequestFailed, RequestSucceeded,
};
pub use telemetry::{AvailabilityReport, GenerationsLogger, LoggerRecord, ResponseStatus};
