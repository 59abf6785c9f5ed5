//! Request lifecycle across resolution, generation, events and telemetry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use proofgen_core::backends::LlmBackend;
use proofgen_core::llm::{AnalyzedChat, GeneratedRawContent};
use proofgen_core::params::basic_model_params_schema;
use proofgen_core::service::EventCounts;
use proofgen_core::{
    BackendError, Error, ErrorsHandlingMode, EventBus, GenerationOptions, LlmService,
    MockBackend, MockUserModelParams, ModelParams, ParamsSchema, PredefinedProofsBackend,
    PredefinedProofsUserModelParams, ProofGenerationContext, ResponseStatus, ServiceConfig,
    UserModelParams,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Backend that answers after a fixed delay.
#[derive(Debug)]
struct SlowBackend {
    delay: Duration,
}

#[async_trait]
impl LlmBackend for SlowBackend {
    type UserParams = UserModelParams;
    type Params = ModelParams;

    fn name(&self) -> &str {
        "SlowService"
    }

    fn params_schema(&self) -> ParamsSchema {
        basic_model_params_schema()
    }

    async fn generate_from_chat(
        &self,
        chat: &AnalyzedChat,
        _params: &ModelParams,
        choices: usize,
    ) -> Result<GeneratedRawContent, BackendError> {
        tokio::time::sleep(self.delay).await;
        Ok(GeneratedRawContent::aggregate(
            vec!["auto.".to_string(); choices],
            chat.estimated_tokens.messages_tokens,
            None,
        ))
    }
}

fn config(dir: &TempDir, name: &str) -> ServiceConfig {
    ServiceConfig::new().with_generations_log_path(dir.path().join(format!("{name}.log")))
}

fn context() -> Arc<ProofGenerationContext> {
    Arc::new(ProofGenerationContext::new("Theorem plus_O_n : forall n, 0 + n = n."))
}

fn mock_user_params() -> MockUserModelParams {
    MockUserModelParams {
        base: UserModelParams::new("mock")
            .with_max_tokens_to_generate(100)
            .with_tokens_limit(1000),
        ..MockUserModelParams::new("mock", vec!["intros.".to_string(), "auto.".to_string()])
    }
}

fn slow_service(dir: &TempDir, delay: Duration) -> (LlmService<SlowBackend>, Arc<ModelParams>) {
    let service = LlmService::new(SlowBackend { delay }, EventBus::new(16), config(dir, "slow")).unwrap();
    let params = service
        .resolve_parameters_or_err(
            &UserModelParams::new("slow")
                .with_max_tokens_to_generate(100)
                .with_tokens_limit(1000)
                .with_choices(1),
        )
        .unwrap();
    (service, params)
}

#[tokio::test]
async fn test_failures_then_success_telemetry() {
    let dir = TempDir::new().unwrap();
    let service = LlmService::new(MockBackend::new(), EventBus::default(), config(&dir, "mock")).unwrap();
    let params = service.resolve_parameters_or_err(&mock_user_params()).unwrap();
    let options = GenerationOptions::new().swallowing_errors();

    for i in 0..3 {
        service
            .backend()
            .throw_error_on_next_generation(BackendError::Other(format!("failure {i}")), 0);
        let generated = service
            .generate_proof(context(), Arc::clone(&params), Some(1), &options)
            .await
            .unwrap();
        assert!(generated.is_empty());
    }

    let records = service.generation_logs_since_last_success().unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.response_status == ResponseStatus::Failure));
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    let report = service.availability().unwrap();
    assert_eq!(report.consecutive_failures, 3);
    assert!(report.estimated_time_to_become_available >= Duration::from_secs(1));

    service
        .generate_proof(context(), params, Some(1), &options)
        .await
        .unwrap();
    assert!(service.generation_logs_since_last_success().unwrap().is_empty());
    assert_eq!(service.estimate_time_to_become_available().unwrap(), Duration::ZERO);
}

#[tokio::test]
async fn test_exactly_one_event_and_record_per_request() {
    for mode in [ErrorsHandlingMode::RethrowErrors, ErrorsHandlingMode::LogAndSwallowErrors] {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::default();
        let mut events = bus.track();
        let service = LlmService::new(
            MockBackend::new(),
            bus,
            config(&dir, "mock").with_debug_logs(true),
        )
        .unwrap();
        let params = service.resolve_parameters_or_err(&mock_user_params()).unwrap();
        let options = GenerationOptions::new().with_errors_handling_mode(mode);

        service
            .generate_proof(context(), Arc::clone(&params), Some(2), &options)
            .await
            .unwrap();
        let failed = service
            .generate_proof(context(), Arc::clone(&params), Some(3), &options)
            .await;
        match mode {
            ErrorsHandlingMode::RethrowErrors => {
                assert!(matches!(failed, Err(Error::GenerationFailed(_))))
            }
            ErrorsHandlingMode::LogAndSwallowErrors => assert!(failed.unwrap().is_empty()),
        }

        assert_eq!(events.counts(), EventCounts { succeeded: 1, failed: 1 });
        let records = service.generation_logs_since_last_success().unwrap();
        assert_eq!(records.len(), 1);
        let error = records[0].error.as_ref().unwrap();
        assert_eq!(error.type_name, "NotEnoughProofsError");
        assert_eq!(error.message, "`choices = 3` > `available proofs length = 2`");
    }
}

#[tokio::test]
async fn test_services_do_not_share_buses() {
    let dir = TempDir::new().unwrap();
    let first = LlmService::new(MockBackend::new(), EventBus::default(), config(&dir, "first")).unwrap();
    let second = LlmService::new(MockBackend::new(), EventBus::default(), config(&dir, "second")).unwrap();
    let mut first_events = first.events().track();
    let mut second_events = second.events().track();
    let params = first.resolve_parameters_or_err(&mock_user_params()).unwrap();

    first
        .generate_proof(context(), params, Some(1), &GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(first_events.counts().succeeded, 1);
    assert_eq!(second_events.counts(), EventCounts::default());
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout() {
    let dir = TempDir::new().unwrap();
    let (service, params) = slow_service(&dir, Duration::from_secs(30));
    let mut events = service.events().track();

    let err = service
        .generate_proof(
            context(),
            params,
            None,
            &GenerationOptions::new().with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "Generation failed: Request timed out after 5000ms");
    assert_eq!(events.counts().failed, 1);

    let records = service.generation_logs_since_last_success().unwrap();
    assert_eq!(records[0].error.as_ref().unwrap().type_name, "TimeoutError");
}

#[tokio::test(start_paused = true)]
async fn test_request_within_timeout() {
    let dir = TempDir::new().unwrap();
    let (service, params) = slow_service(&dir, Duration::from_secs(2));

    let generated = service
        .generate_proof(
            context(),
            params,
            None,
            &GenerationOptions::new().with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(generated.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_resolves_in_flight_requests() {
    let dir = TempDir::new().unwrap();
    let (service, params) = slow_service(&dir, Duration::from_secs(60));
    let token = CancellationToken::new();
    let options = GenerationOptions::new().with_cancellation(token.clone());
    let targets = vec![context(), context(), context()];

    let cancel = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    };
    let (results, ()) = tokio::join!(
        service.generate_for_targets(targets, params, None, &options),
        cancel
    );

    assert_eq!(results.len(), 3);
    for result in results {
        assert!(result.unwrap_err().is_cancelled());
    }
    assert_eq!(service.generation_logs_since_last_success().unwrap().len(), 3);
}

#[tokio::test]
async fn test_predefined_proofs() {
    let dir = TempDir::new().unwrap();
    let service =
        LlmService::new(PredefinedProofsBackend::new(), EventBus::default(), config(&dir, "predefined")).unwrap();
    let user = PredefinedProofsUserModelParams {
        base: UserModelParams::new("tactics").with_choices(7),
        ..PredefinedProofsUserModelParams::new("tactics", vec!["auto.".to_string(), "lia.".to_string()])
    };
    let params = service.resolve_parameters_or_err(&user).unwrap();
    assert_eq!(params.base.default_choices, 2);

    let generated = service
        .generate_proof(context(), Arc::clone(&params), None, &GenerationOptions::default())
        .await
        .unwrap();
    let proofs: Vec<&str> = generated.iter().map(|p| p.proof()).collect();
    assert_eq!(proofs, vec!["auto.", "lia."]);
    assert!(!generated[0].can_be_fixed());

    let err = service
        .generate_proof(context(), Arc::clone(&params), Some(3), &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GenerationFailed(_)));
    assert_eq!(service.generation_logs_since_last_success().unwrap().len(), 1);

    let err = service
        .generate_from_chat(Vec::new(), &params, 1, &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));

    let err = generated[0]
        .fix_proof("Error", None, &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}
