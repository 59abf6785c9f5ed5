//! Generation engine.
//!
//! [`LlmService`] wraps one [`LlmBackend`] and owns everything around a
//! backend call: choices validation, chat building, timeouts and
//! cancellation, error classification, lifecycle events and availability
//! telemetry.
//!
//! # Example
//!
//! ```rust,ignore
//! use proofgen_core::backends::{MockBackend, MockUserModelParams};
//! use proofgen_core::service::{EventBus, GenerationOptions, LlmService};
//!
//! let service = LlmService::new(MockBackend::new(), EventBus::default(), config)?;
//! let params = service.resolve_parameters_or_err(&user_params)?;
//! let proofs = service
//!     .generate_proof(context, params, None, &GenerationOptions::default())
//!     .await?;
//! ```

mod events;
mod generated_proof;
mod options;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backends::LlmBackend;
use crate::config::ServiceConfig;
use crate::error::{BackendError, Error, Result};
use crate::llm::{
    build_proof_generation_chat, AnalyzedChat, Chat, GeneratedRawContent, ProofGenerationContext,
};
use crate::messages;
use crate::params::{ResolutionResult, ResolvedModelParams};
use crate::telemetry::{
    estimate_from_failing_since, estimate_time_to_become_available, AvailabilityReport,
    GenerationAttempt, GenerationsLogger, LoggerRecord,
};

pub use events::{
    EventBus, EventCounts, EventsTracker, FailureSummary, LlmServiceEvent, RequestFailed,
    RequestInfo, RequestSucceeded, DEFAULT_EVENT_BUS_CAPACITY,
};
pub use generated_proof::GeneratedProof;
pub use options::{ErrorsHandlingMode, GenerationOptions};

struct ServiceInner<B: LlmBackend> {
    backend: B,
    events: EventBus,
    logger: Mutex<GenerationsLogger>,
    config: ServiceConfig,
}

/// Generation engine over one backend. Cloning yields a handle to the same
/// service.
pub struct LlmService<B: LlmBackend> {
    inner: Arc<ServiceInner<B>>,
}

impl<B: LlmBackend> Clone for LlmService<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: LlmBackend> fmt::Debug for LlmService<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmService")
            .field("name", &self.name())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<B: LlmBackend> LlmService<B> {
    /// Create a service publishing on `events` and logging to the file
    /// `config` names for this backend.
    pub fn new(backend: B, events: EventBus, config: ServiceConfig) -> Result<Self> {
        let path = config.generations_log_path(backend.name());
        let logger = GenerationsLogger::new(path, config.debug_logs, config.clean_logs_on_start)?;
        debug!(service = backend.name(), path = %logger.path().display(), "service created");
        Ok(Self {
            inner: Arc::new(ServiceInner {
                backend,
                events,
                logger: Mutex::new(logger),
                config,
            }),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.backend.name()
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Bus this service publishes on.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Resolve user params, keeping every per-field log.
    pub fn resolve_parameters(&self, user_params: &B::UserParams) -> ResolutionResult<B::Params> {
        self.inner
            .backend
            .params_schema()
            .resolve_params(user_params)
    }

    /// Resolve user params, failing with a configuration error that lists
    /// every failed field.
    pub fn resolve_parameters_or_err(&self, user_params: &B::UserParams) -> Result<Arc<B::Params>> {
        let model_id = model_id_of(user_params);
        self.resolve_parameters(user_params)
            .into_result(&model_id)
            .map(Arc::new)
    }

    /// Generate proofs of `context.completion_target`.
    ///
    /// `choices` defaults to the model's `defaultChoices`. In
    /// [`ErrorsHandlingMode::LogAndSwallowErrors`] a failed backend call
    /// yields no proofs instead of an error.
    #[instrument(skip_all, fields(service = %self.name(), model_id = %params.model_id()))]
    pub async fn generate_proof(
        &self,
        context: Arc<ProofGenerationContext>,
        params: Arc<B::Params>,
        choices: Option<usize>,
        options: &GenerationOptions,
    ) -> Result<Vec<GeneratedProof<B>>> {
        let choices = choices.unwrap_or(params.base().default_choices);
        self.validate_choices(&params, choices)?;
        let chat = if self.inner.backend.supports_chat() {
            build_proof_generation_chat(&context, params.base())?
        } else {
            AnalyzedChat::new(Vec::new(), params.base().max_tokens_to_generate)
        };

        let generated = self
            .generate_wrapped(Some(&context), chat, &params, choices, options)
            .await?;
        Ok(generated
            .items
            .into_iter()
            .map(|item| {
                GeneratedProof::new(
                    self.clone(),
                    item,
                    Arc::clone(&context),
                    Arc::clone(&params),
                    Vec::new(),
                )
            })
            .collect())
    }

    /// Generate raw completions of a prepared chat.
    #[instrument(skip_all, fields(service = %self.name(), model_id = %params.model_id()))]
    pub async fn generate_from_chat(
        &self,
        chat: Chat,
        params: &B::Params,
        choices: usize,
        options: &GenerationOptions,
    ) -> Result<Vec<String>> {
        if !self.inner.backend.supports_chat() {
            return Err(Error::configuration(format!(
                "`{}` does not support generation from chat",
                self.name()
            )));
        }
        self.validate_choices(params, choices)?;
        let base = params.base();
        let chat = AnalyzedChat::new(chat, base.max_tokens_to_generate);
        if chat.estimated_tokens.max_tokens_in_total > base.tokens_limit {
            return Err(Error::configuration(format!(
                "chat of {} tokens and {} tokens to generate do not fit into `tokensLimit = {}` of model \"{}\"",
                chat.estimated_tokens.messages_tokens,
                base.max_tokens_to_generate,
                base.tokens_limit,
                base.model_id
            )));
        }

        let generated = self
            .generate_wrapped(None, chat, params, choices, options)
            .await?;
        Ok(generated.items.into_iter().map(|item| item.content).collect())
    }

    /// Generate proofs for several targets, at most
    /// `maxConcurrentRequests` at a time. Results keep the targets' order;
    /// one target failing does not affect the others.
    pub async fn generate_for_targets(
        &self,
        targets: Vec<Arc<ProofGenerationContext>>,
        params: Arc<B::Params>,
        choices: Option<usize>,
        options: &GenerationOptions,
    ) -> Vec<Result<Vec<GeneratedProof<B>>>> {
        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_concurrent_requests.max(1)));

        let tasks: Vec<_> = targets
            .into_iter()
            .map(|context| {
                let semaphore = Arc::clone(&semaphore);
                let params = Arc::clone(&params);
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| Error::internal(format!("generation semaphore closed: {e}")))?;
                    self.generate_proof(context, params, choices, options).await
                }
            })
            .collect();

        join_all(tasks).await
    }

    /// Records since the last success, oldest first.
    pub fn generation_logs_since_last_success(&self) -> Result<Vec<LoggerRecord>> {
        self.logger()?.read_logs_since_last_success()
    }

    /// Expected time until the backend answers again; zero if its last
    /// request succeeded.
    pub fn estimate_time_to_become_available(&self) -> Result<Duration> {
        let records = self.generation_logs_since_last_success()?;
        Ok(estimate_time_to_become_available(
            &records,
            Utc::now().timestamp_millis(),
        ))
    }

    pub fn availability(&self) -> Result<AvailabilityReport> {
        let records = self.generation_logs_since_last_success()?;
        Ok(AvailabilityReport::from_records(
            self.name(),
            &records,
            Utc::now().timestamp_millis(),
        ))
    }

    /// Clear the generations log.
    pub fn reset_generation_logs(&self) -> Result<()> {
        self.logger()?.reset_logs()
    }

    /// Delete the generations log file.
    pub fn dispose(&self) -> Result<()> {
        self.logger()?.dispose()
    }

    pub(crate) fn validate_choices(&self, params: &B::Params, choices: usize) -> Result<()> {
        if choices == 0 {
            return Err(Error::configuration(format!(
                "`choices` of model \"{}\" should be positive, got 0",
                params.model_id()
            )));
        }
        if let Some(max) = self.inner.backend.max_choices(params) {
            if choices > max {
                return Err(Error::configuration(format!(
                    "`choices = {choices}` of model \"{}\" exceeds the maximum of `{}`: {max}",
                    params.model_id(),
                    self.name()
                )));
            }
        }
        Ok(())
    }

    /// Run one backend request and account for its outcome: exactly one
    /// event, and a log record for every generation failure or success.
    /// A log write that fails is reported with `warn!` and never changes
    /// the outcome or suppresses the event.
    pub(crate) async fn generate_wrapped(
        &self,
        context: Option<&ProofGenerationContext>,
        chat: AnalyzedChat,
        params: &B::Params,
        choices: usize,
        options: &GenerationOptions,
    ) -> Result<GeneratedRawContent> {
        let params_json = serde_json::to_value(params)?;
        let info = RequestInfo {
            request_id: Uuid::new_v4(),
            service_name: self.name().to_string(),
            model_id: params.model_id().to_string(),
            params: params_json,
            analyzed_chat: Some(chat.clone()),
            choices,
            timestamp: Utc::now(),
        };
        debug!(request_id = %info.request_id, choices, "sending generation request");

        match self.call_backend(context, &chat, params, choices, options).await {
            Ok(generated) => {
                let proofs: Vec<String> = generated.items.iter().map(|i| i.content.clone()).collect();
                let logged = self.log_success(&GenerationAttempt {
                    model_id: &info.model_id,
                    choices,
                    chat: Some(&chat),
                    params: &info.params,
                    generated_raw_proofs: Some(&proofs),
                });
                if let Err(e) = logged {
                    warn!(request_id = %info.request_id, error = %e, "failed to log a successful generation");
                }
                self.inner
                    .events
                    .publish(LlmServiceEvent::RequestSucceeded(Arc::new(RequestSucceeded {
                        info,
                        generated: generated.clone(),
                    })));
                Ok(generated)
            }
            Err(cause) => {
                let error = classify_backend_error(cause);
                if !matches!(error, Error::Configuration(_)) {
                    let logged = self.log_failure(
                        &GenerationAttempt {
                            model_id: &info.model_id,
                            choices,
                            chat: Some(&chat),
                            params: &info.params,
                            generated_raw_proofs: None,
                        },
                        &error,
                    );
                    if let Err(e) = logged {
                        warn!(request_id = %info.request_id, error = %e, "failed to log a failed generation");
                    }
                }
                self.inner
                    .events
                    .publish(LlmServiceEvent::RequestFailed(Arc::new(RequestFailed {
                        info,
                        error: FailureSummary::from(&error),
                    })));

                match (&error, options.errors_handling_mode) {
                    (Error::GenerationFailed(_), ErrorsHandlingMode::LogAndSwallowErrors) => {
                        debug!(error = %error, "generation error swallowed");
                        Ok(GeneratedRawContent::default())
                    }
                    _ => Err(error),
                }
            }
        }
    }

    async fn call_backend(
        &self,
        context: Option<&ProofGenerationContext>,
        chat: &AnalyzedChat,
        params: &B::Params,
        choices: usize,
        options: &GenerationOptions,
    ) -> std::result::Result<GeneratedRawContent, BackendError> {
        let backend = &self.inner.backend;
        let generation = match context {
            Some(context) => backend.generate_from_context(context, chat, params, choices),
            None => backend.generate_from_chat(chat, params, choices),
        };
        let limited = async {
            match options.timeout {
                Some(limit) => tokio::time::timeout(limit, generation)
                    .await
                    .unwrap_or_else(|_| Err(BackendError::timeout(limit.as_millis() as u64))),
                None => generation.await,
            }
        };

        match &options.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(BackendError::Cancelled),
                    result = limited => result,
                }
            }
            None => limited.await,
        }
    }

    fn log_success(&self, attempt: &GenerationAttempt<'_>) -> Result<()> {
        let mut logger = self.logger()?;
        let had_failures = logger.failures_since_last_success() > 0;
        logger.log_generation_succeeded(attempt)?;
        if had_failures {
            info!("{}", messages::service_is_available_again(self.name()));
        }
        Ok(())
    }

    fn log_failure(&self, attempt: &GenerationAttempt<'_>, error: &Error) -> Result<()> {
        let mut logger = self.logger()?;
        logger.log_generation_failed(attempt, error)?;
        let Error::GenerationFailed(failed) = error else {
            return Ok(());
        };

        let cause_message = failed.cause().to_string();
        if self.inner.backend.is_remote() && matches!(failed.backend_cause(), Some(BackendError::Http(_))) {
            warn!("{}", messages::failed_to_reach_remote_service(self.name(), &cause_message));
        } else {
            let retry_in = estimate_from_failing_since(logger.failing_since(), Utc::now().timestamp_millis());
            warn!(
                "{}",
                messages::service_became_unavailable(self.name(), &cause_message, retry_in)
            );
        }
        Ok(())
    }

    fn logger(&self) -> Result<MutexGuard<'_, GenerationsLogger>> {
        self.inner
            .logger
            .lock()
            .map_err(|_| Error::internal("generations logger lock poisoned"))
    }
}

/// Map a backend failure onto the error taxonomy.
fn classify_backend_error(cause: BackendError) -> Error {
    match cause {
        BackendError::InvalidConfiguration(message) => Error::configuration(message),
        BackendError::UnsupportedOperation(_) => Error::configuration(cause.to_string()),
        other => Error::generation_failed(other),
    }
}

fn model_id_of<U: serde::Serialize>(user_params: &U) -> String {
    serde_json::to_value(user_params)
        .ok()
        .as_ref()
        .and_then(|value| value.get("modelId"))
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}
