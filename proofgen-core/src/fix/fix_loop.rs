//! Generate, check, fix until a valid proof is found or rounds run out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::chain::{BenchmarkedProof, ProofFixChain, ProofRef, RoundOutcome};
use super::checker::ProofChecker;
use crate::backends::LlmBackend;
use crate::config::FixLoopConfig;
use crate::error::{Error, Result};
use crate::llm::ProofGenerationContext;
use crate::params::ResolvedModelParams;
use crate::service::{
    ErrorsHandlingMode, FailureSummary, GeneratedProof, GenerationOptions, LlmService,
};

/// Why a chain stopped growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainTermination {
    ValidProofFound,
    /// No non-valid proof of the last round may be fixed any more
    RoundsExhausted,
    /// The caller declined the next round
    Declined,
    GenerationFailed,
    Cancelled,
    /// The checker did not answer in time
    CheckTimedOut,
}

/// Chain built for one target and the reason it ended.
#[derive(Debug)]
pub struct FixLoopOutcome<B: LlmBackend> {
    pub chain: ProofFixChain<B>,
    pub termination: ChainTermination,
}

impl<B: LlmBackend> FixLoopOutcome<B> {
    /// First valid proof, if any.
    pub fn valid_proof(&self) -> Option<&BenchmarkedProof<B>> {
        self.chain.valid_proofs().next()
    }
}

/// Drives the fix rounds of one target.
///
/// Rounds run strictly one after another. Generation failures end the
/// chain and are kept in it as failed rounds; configuration and checker
/// errors are returned.
pub struct FixLoop<B: LlmBackend> {
    service: LlmService<B>,
    checker: Arc<dyn ProofChecker>,
    config: FixLoopConfig,
}

impl<B: LlmBackend> FixLoop<B> {
    pub fn new(service: LlmService<B>, checker: Arc<dyn ProofChecker>, config: FixLoopConfig) -> Self {
        Self {
            service,
            checker,
            config,
        }
    }

    pub fn config(&self) -> &FixLoopConfig {
        &self.config
    }

    /// Run the loop. `should_continue` is asked before every fix round.
    #[instrument(skip_all, fields(service = %self.service.name(), model_id = %params.model_id()))]
    pub async fn run<F>(
        &self,
        context: Arc<ProofGenerationContext>,
        params: Arc<B::Params>,
        options: &GenerationOptions,
        mut should_continue: F,
    ) -> Result<FixLoopOutcome<B>>
    where
        F: FnMut(&ProofFixChain<B>) -> bool + Send,
    {
        let options = GenerationOptions {
            errors_handling_mode: ErrorsHandlingMode::RethrowErrors,
            ..options.clone()
        };
        let mut chain = ProofFixChain::new();
        let finish = |chain: ProofFixChain<B>, termination: ChainTermination| -> Result<FixLoopOutcome<B>> {
            debug!(?termination, "fix loop finished");
            Ok(FixLoopOutcome { chain, termination })
        };

        if options.is_cancelled() {
            return finish(chain, ChainTermination::Cancelled);
        }
        let first = self
            .service
            .generate_proof(Arc::clone(&context), params, self.config.initial_choices, &options)
            .await;
        match round_outcome(first)? {
            (outcome, None) => {
                chain.start(outcome)?;
            }
            (outcome, Some(termination)) => {
                chain.start(outcome)?;
                return finish(chain, termination);
            }
        }

        loop {
            if !self.check_last_round(&context, &mut chain).await? {
                return finish(chain, ChainTermination::CheckTimedOut);
            }
            if chain.valid_proofs().next().is_some() {
                info!(rounds = chain.len(), "valid proof found");
                return finish(chain, ChainTermination::ValidProofFound);
            }

            let Some((from, proof, diagnostic)) = fixable_proof(&chain) else {
                return finish(chain, ChainTermination::RoundsExhausted);
            };
            if !should_continue(&chain) {
                return finish(chain, ChainTermination::Declined);
            }
            if options.is_cancelled() {
                return finish(chain, ChainTermination::Cancelled);
            }

            debug!(round = from.round + 1, fixed_proof = %proof.proof_id(), "starting fix round");
            let fixed = proof
                .fix_proof(&diagnostic, self.config.fix_choices, &options)
                .await;
            let (outcome, termination) = round_outcome(fixed)?;
            chain.link_next_round(from, outcome)?;
            if let Some(termination) = termination {
                return finish(chain, termination);
            }
        }
    }

    /// Check every proof of the last round. Returns false if the checker
    /// timed out.
    async fn check_last_round(
        &self,
        context: &ProofGenerationContext,
        chain: &mut ProofFixChain<B>,
    ) -> Result<bool> {
        let Some(round) = chain.last_round_mut() else {
            return Ok(true);
        };
        let proofs: Vec<String> = round
            .proofs()
            .iter()
            .map(|p| p.proof.proof().to_string())
            .collect();
        if proofs.is_empty() {
            return Ok(true);
        }

        let check = self.checker.check_proofs(context, &proofs);
        let results = match self.config.check_timeout {
            Some(limit) => match tokio::time::timeout(limit, check).await {
                Ok(results) => results?,
                Err(_) => {
                    debug!(timeout_ms = limit.as_millis() as u64, "proof check timed out");
                    return Ok(false);
                }
            },
            None => check.await?,
        };
        if results.len() != proofs.len() {
            return Err(Error::internal(format!(
                "checker returned {} results for {} proofs",
                results.len(),
                proofs.len()
            )));
        }

        for (proof, result) in round.proofs_mut().iter_mut().zip(results) {
            proof.mark_checked(result)?;
        }
        Ok(true)
    }
}

/// First non-valid proof of the last round that may be fixed.
fn fixable_proof<B: LlmBackend>(chain: &ProofFixChain<B>) -> Option<(ProofRef, GeneratedProof<B>, String)> {
    let round = chain.last_round()?;
    round.proofs().iter().enumerate().find_map(|(index, proof)| {
        if !proof.can_be_fixed() {
            return None;
        }
        let diagnostic = proof.diagnostic()?.to_string();
        Some((
            ProofRef {
                round: round.round_number,
                index,
            },
            proof.proof.clone(),
            diagnostic,
        ))
    })
}

/// Turn a generation result into a round outcome, with the termination it
/// implies. Errors other than generation failures are returned.
fn round_outcome<B: LlmBackend>(
    result: Result<Vec<GeneratedProof<B>>>,
) -> Result<(RoundOutcome<B>, Option<ChainTermination>)> {
    match result {
        Ok(proofs) => Ok((
            RoundOutcome::Succeeded {
                proofs: proofs.into_iter().map(BenchmarkedProof::new).collect(),
            },
            None,
        )),
        Err(error @ Error::GenerationFailed(_)) => {
            let termination = if error.is_cancelled() {
                ChainTermination::Cancelled
            } else {
                ChainTermination::GenerationFailed
            };
            Ok((
                RoundOutcome::Failed {
                    error: FailureSummary::from(&error),
                },
                Some(termination),
            ))
        }
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockBackend, MockModelParams, MockUserModelParams};
    use crate::config::ServiceConfig;
    use crate::error::BackendError;
    use crate::fix::ProofCheckResult;
    use crate::params::{UserModelParams, UserMultiroundProfile};
    use crate::service::{EventBus, EventCounts};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Accepts only the listed proofs.
    struct AcceptingChecker {
        accepted: Vec<String>,
        calls: Mutex<usize>,
    }

    impl AcceptingChecker {
        fn new(accepted: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                accepted: accepted.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl ProofChecker for AcceptingChecker {
        async fn check_proofs(
            &self,
            _context: &ProofGenerationContext,
            proofs: &[String],
        ) -> Result<Vec<ProofCheckResult>> {
            *self.calls.lock().unwrap() += 1;
            Ok(proofs
                .iter()
                .map(|p| {
                    if self.accepted.contains(p) {
                        ProofCheckResult::valid(p)
                    } else {
                        ProofCheckResult::non_valid(p, format!("`{p}` failed"))
                    }
                })
                .collect())
        }
    }

    struct SlowChecker;

    #[async_trait]
    impl ProofChecker for SlowChecker {
        async fn check_proofs(
            &self,
            _context: &ProofGenerationContext,
            _proofs: &[String],
        ) -> Result<Vec<ProofCheckResult>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    struct SilentChecker;

    #[async_trait]
    impl ProofChecker for SilentChecker {
        async fn check_proofs(
            &self,
            _context: &ProofGenerationContext,
            proofs: &[String],
        ) -> Result<Vec<ProofCheckResult>> {
            Ok(proofs
                .iter()
                .map(|p| ProofCheckResult {
                    proof: p.clone(),
                    is_valid: false,
                    diagnostic: None,
                })
                .collect())
        }
    }

    fn setup(dir: &TempDir, max_rounds: i64) -> (LlmService<MockBackend>, Arc<MockModelParams>) {
        let config = ServiceConfig::new().with_generations_log_path(dir.path().join("mock.log"));
        let service = LlmService::new(MockBackend::new(), EventBus::new(64), config).unwrap();
        let user = MockUserModelParams {
            base: UserModelParams::new("mock")
                .with_max_tokens_to_generate(50)
                .with_tokens_limit(4000)
                .with_multiround_profile(UserMultiroundProfile {
                    max_rounds_number: Some(max_rounds),
                    proof_fix_choices: Some(1),
                    proof_fix_prompt: Some(MockBackend::PROOF_FIX_PROMPT.to_string()),
                    max_previous_proof_versions_number: Some(3),
                }),
            ..MockUserModelParams::new("mock", vec!["auto.".to_string(), "lia.".to_string()])
        };
        let params = service.resolve_parameters_or_err(&user).unwrap();
        (service, params)
    }

    fn context() -> Arc<ProofGenerationContext> {
        Arc::new(ProofGenerationContext::new("Theorem t : True."))
    }

    #[tokio::test]
    async fn test_valid_proof_in_first_round() {
        let dir = TempDir::new().unwrap();
        let (service, params) = setup(&dir, 3);
        let fix_loop = FixLoop::new(service, AcceptingChecker::new(&["lia."]), FixLoopConfig::new());

        let outcome = fix_loop
            .run(context(), params, &GenerationOptions::default(), |_| true)
            .await
            .unwrap();
        assert_eq!(outcome.termination, ChainTermination::ValidProofFound);
        assert_eq!(outcome.chain.len(), 1);
        assert_eq!(outcome.valid_proof().unwrap().proof.proof(), "lia.");
    }

    #[tokio::test]
    async fn test_fix_round_finds_valid_proof() {
        let dir = TempDir::new().unwrap();
        let (service, params) = setup(&dir, 3);
        let fix_loop = FixLoop::new(
            service,
            AcceptingChecker::new(&[MockBackend::FIXED_PROOF]),
            FixLoopConfig::new(),
        );

        let outcome = fix_loop
            .run(context(), params, &GenerationOptions::default(), |_| true)
            .await
            .unwrap();
        assert_eq!(outcome.termination, ChainTermination::ValidProofFound);
        assert_eq!(outcome.chain.len(), 2);

        let first = outcome.chain.round(1).unwrap();
        assert_eq!(first.proofs()[0].next_round(), Some(2));
        assert_eq!(first.proofs()[1].next_round(), None);
        let second = outcome.chain.round(2).unwrap();
        assert_eq!(second.fixed_from, Some(ProofRef { round: 1, index: 0 }));
        assert_eq!(second.proofs()[0].proof.version_number(), 2);
    }

    #[tokio::test]
    async fn test_chain_is_bounded_by_max_rounds() {
        let dir = TempDir::new().unwrap();
        let (service, params) = setup(&dir, 3);
        let mut events = service.events().track();
        let fix_loop = FixLoop::new(service, AcceptingChecker::new(&[]), FixLoopConfig::new());

        let outcome = fix_loop
            .run(context(), params, &GenerationOptions::default(), |_| true)
            .await
            .unwrap();
        assert_eq!(outcome.termination, ChainTermination::RoundsExhausted);
        assert_eq!(outcome.chain.len(), 3);
        assert_eq!(events.counts(), EventCounts { succeeded: 3, failed: 0 });
    }

    #[tokio::test]
    async fn test_caller_declines() {
        let dir = TempDir::new().unwrap();
        let (service, params) = setup(&dir, 5);
        let fix_loop = FixLoop::new(service, AcceptingChecker::new(&[]), FixLoopConfig::new());

        let outcome = fix_loop
            .run(context(), params, &GenerationOptions::default(), |chain| chain.len() < 2)
            .await
            .unwrap();
        assert_eq!(outcome.termination, ChainTermination::Declined);
        assert_eq!(outcome.chain.len(), 2);
    }

    #[tokio::test]
    async fn test_generation_failure_ends_chain() {
        let dir = TempDir::new().unwrap();
        let (service, params) = setup(&dir, 3);
        service
            .backend()
            .throw_error_on_next_generation(BackendError::Other("overloaded".to_string()), 0);
        let fix_loop = FixLoop::new(service, AcceptingChecker::new(&[]), FixLoopConfig::new());

        let outcome = fix_loop
            .run(
                context(),
                params,
                &GenerationOptions::new().swallowing_errors(),
                |_| true,
            )
            .await
            .unwrap();
        assert_eq!(outcome.termination, ChainTermination::GenerationFailed);
        assert_eq!(outcome.chain.len(), 1);
        let RoundOutcome::Failed { error } = &outcome.chain.round(1).unwrap().outcome else {
            panic!("expected a failed round");
        };
        assert_eq!(error.cause_kind.as_deref(), Some("BackendError"));
    }

    #[tokio::test]
    async fn test_non_valid_result_without_diagnostic() {
        let dir = TempDir::new().unwrap();
        let (service, params) = setup(&dir, 3);
        let fix_loop = FixLoop::new(service, Arc::new(SilentChecker), FixLoopConfig::new());

        let err = fix_loop
            .run(context(), params, &GenerationOptions::default(), |_| true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_timeout() {
        let dir = TempDir::new().unwrap();
        let (service, params) = setup(&dir, 3);
        let fix_loop = FixLoop::new(
            service,
            Arc::new(SlowChecker),
            FixLoopConfig::new().with_check_timeout(Duration::from_secs(1)),
        );

        let outcome = fix_loop
            .run(context(), params, &GenerationOptions::default(), |_| true)
            .await
            .unwrap();
        assert_eq!(outcome.termination, ChainTermination::CheckTimedOut);
        assert_eq!(outcome.chain.len(), 1);
    }

    #[tokio::test]
    async fn test_fix_choices_override() {
        let dir = TempDir::new().unwrap();
        let (service, params) = setup(&dir, 2);
        let fix_loop = FixLoop::new(
            service,
            AcceptingChecker::new(&[]),
            FixLoopConfig::new().with_initial_choices(1).with_fix_choices(3),
        );

        let outcome = fix_loop
            .run(context(), params, &GenerationOptions::default(), |_| true)
            .await
            .unwrap();
        assert_eq!(outcome.chain.round(1).unwrap().proofs().len(), 1);
        assert_eq!(outcome.chain.round(2).unwrap().proofs().len(), 3);
        assert_eq!(outcome.termination, ChainTermination::RoundsExhausted);
    }
}
