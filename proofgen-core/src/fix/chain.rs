//! Checked proofs and the chain of fix rounds.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::checker::ProofCheckResult;
use crate::backends::LlmBackend;
use crate::error::{Error, Result};
use crate::service::{FailureSummary, GeneratedProof};

/// Validation state of a generated proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProofStatus {
    NonValidated,
    Valid,
    NonValid {
        diagnostic: String,
        /// Round produced by fixing this proof
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_round: Option<usize>,
    },
}

/// A generated proof together with its validation state.
pub struct BenchmarkedProof<B: LlmBackend> {
    pub proof: GeneratedProof<B>,
    status: ProofStatus,
}

impl<B: LlmBackend> BenchmarkedProof<B> {
    pub fn new(proof: GeneratedProof<B>) -> Self {
        Self {
            proof,
            status: ProofStatus::NonValidated,
        }
    }

    pub fn status(&self) -> &ProofStatus {
        &self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == ProofStatus::Valid
    }

    /// Diagnostic of a non-valid proof.
    pub fn diagnostic(&self) -> Option<&str> {
        match &self.status {
            ProofStatus::NonValid { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }

    /// Round this proof was fixed into, if any.
    pub fn next_round(&self) -> Option<usize> {
        match &self.status {
            ProofStatus::NonValid { next_round, .. } => *next_round,
            _ => None,
        }
    }

    /// Record the checker's verdict. A proof is checked once.
    pub fn mark_checked(&mut self, result: ProofCheckResult) -> Result<()> {
        if self.status != ProofStatus::NonValidated {
            return Err(Error::internal(format!(
                "proof {} is already validated",
                self.proof.proof_id()
            )));
        }
        self.status = if result.is_valid {
            ProofStatus::Valid
        } else {
            let diagnostic = result.diagnostic.ok_or_else(|| {
                Error::internal(format!(
                    "checker reported proof {} as non-valid without a diagnostic",
                    self.proof.proof_id()
                ))
            })?;
            ProofStatus::NonValid {
                diagnostic,
                next_round: None,
            }
        };
        Ok(())
    }

    /// Whether a fix round may start from this proof.
    pub fn can_be_fixed(&self) -> bool {
        matches!(self.status, ProofStatus::NonValid { next_round: None, .. }) && self.proof.can_be_fixed()
    }

    fn link_next_round(&mut self, round: usize) -> Result<()> {
        let proof_id = self.proof.proof_id();
        match &mut self.status {
            ProofStatus::NonValid { next_round, .. } => match next_round {
                Some(existing) => Err(Error::internal(format!(
                    "proof {} is already linked to round {}",
                    proof_id, existing
                ))),
                None => {
                    *next_round = Some(round);
                    Ok(())
                }
            },
            other => Err(Error::internal(format!(
                "only non-valid proofs can be fixed, proof {} is {:?}",
                proof_id, other
            ))),
        }
    }
}

impl<B: LlmBackend> fmt::Debug for BenchmarkedProof<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchmarkedProof")
            .field("proof", &self.proof)
            .field("status", &self.status)
            .finish()
    }
}

/// Position of a proof inside a chain; rounds are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRef {
    pub round: usize,
    pub index: usize,
}

/// What a round's generation request produced.
pub enum RoundOutcome<B: LlmBackend> {
    Succeeded { proofs: Vec<BenchmarkedProof<B>> },
    Failed { error: FailureSummary },
}

impl<B: LlmBackend> fmt::Debug for RoundOutcome<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { proofs } => f.debug_struct("Succeeded").field("proofs", proofs).finish(),
            Self::Failed { error } => f.debug_struct("Failed").field("error", error).finish(),
        }
    }
}

/// One generation round of a chain.
#[derive(Debug)]
pub struct FixRound<B: LlmBackend> {
    pub round_number: usize,
    /// Proof this round fixes; `None` for the first round
    pub fixed_from: Option<ProofRef>,
    pub outcome: RoundOutcome<B>,
}

impl<B: LlmBackend> FixRound<B> {
    pub fn proofs(&self) -> &[BenchmarkedProof<B>] {
        match &self.outcome {
            RoundOutcome::Succeeded { proofs } => proofs,
            RoundOutcome::Failed { .. } => &[],
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RoundOutcome::Succeeded { .. })
    }

    pub(crate) fn proofs_mut(&mut self) -> &mut [BenchmarkedProof<B>] {
        match &mut self.outcome {
            RoundOutcome::Succeeded { proofs } => proofs,
            RoundOutcome::Failed { .. } => &mut [],
        }
    }
}

/// Append-only chain of rounds for one target.
///
/// Every round after the first fixes one non-valid proof of the round
/// right before it, so the chain only ever grows forward.
#[derive(Debug)]
pub struct ProofFixChain<B: LlmBackend> {
    rounds: Vec<FixRound<B>>,
}

impl<B: LlmBackend> Default for ProofFixChain<B> {
    fn default() -> Self {
        Self { rounds: Vec::new() }
    }
}

impl<B: LlmBackend> ProofFixChain<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rounds(&self) -> &[FixRound<B>] {
        &self.rounds
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn last_round(&self) -> Option<&FixRound<B>> {
        self.rounds.last()
    }

    /// Round by its 1-based number.
    pub fn round(&self, round_number: usize) -> Option<&FixRound<B>> {
        round_number.checked_sub(1).and_then(|i| self.rounds.get(i))
    }

    pub fn proof(&self, at: ProofRef) -> Option<&BenchmarkedProof<B>> {
        self.round(at.round).and_then(|round| round.proofs().get(at.index))
    }

    /// Every valid proof, in round order.
    pub fn valid_proofs(&self) -> impl Iterator<Item = &BenchmarkedProof<B>> {
        self.rounds
            .iter()
            .flat_map(|round| round.proofs())
            .filter(|proof| proof.is_valid())
    }

    /// Record the first round. Returns its number.
    pub fn start(&mut self, outcome: RoundOutcome<B>) -> Result<usize> {
        if !self.rounds.is_empty() {
            return Err(Error::internal("fix chain is already started"));
        }
        self.rounds.push(FixRound {
            round_number: 1,
            fixed_from: None,
            outcome,
        });
        Ok(1)
    }

    /// Append the round produced by fixing the proof at `from`, which must
    /// be an unlinked non-valid proof of the last round. Returns the new
    /// round's number.
    pub fn link_next_round(&mut self, from: ProofRef, outcome: RoundOutcome<B>) -> Result<usize> {
        let next = self.rounds.len() + 1;
        if from.round + 1 != next {
            return Err(Error::internal(format!(
                "round {} can only fix proofs of round {}, got round {}",
                next,
                next - 1,
                from.round
            )));
        }
        let proof = self
            .rounds
            .last_mut()
            .and_then(|round| round.proofs_mut().get_mut(from.index))
            .ok_or_else(|| Error::internal(format!("no proof at {:?}", from)))?;
        proof.link_next_round(next)?;
        self.rounds.push(FixRound {
            round_number: next,
            fixed_from: Some(from),
            outcome,
        });
        Ok(next)
    }

    pub(crate) fn last_round_mut(&mut self) -> Option<&mut FixRound<B>> {
        self.rounds.last_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockBackend, MockModelParams, MockUserModelParams};
    use crate::config::ServiceConfig;
    use crate::llm::{GeneratedRawContentItem, GenerationTokens, ProofGenerationContext};
    use crate::params::{UserModelParams, UserMultiroundProfile};
    use crate::service::{EventBus, LlmService};
    use crate::error::BackendError;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        service: LlmService<MockBackend>,
        params: Arc<MockModelParams>,
        context: Arc<ProofGenerationContext>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = ServiceConfig::new().with_generations_log_path(dir.path().join("mock.log"));
            let service = LlmService::new(MockBackend::new(), EventBus::new(8), config).unwrap();
            let user = MockUserModelParams {
                base: UserModelParams::new("mock")
                    .with_max_tokens_to_generate(50)
                    .with_tokens_limit(4000)
                    .with_multiround_profile(UserMultiroundProfile {
                        max_rounds_number: Some(3),
                        proof_fix_choices: Some(1),
                        proof_fix_prompt: Some(MockBackend::PROOF_FIX_PROMPT.to_string()),
                        max_previous_proof_versions_number: Some(3),
                    }),
                ..MockUserModelParams::new("mock", vec!["auto.".to_string()])
            };
            let params = service.resolve_parameters_or_err(&user).unwrap();
            Self {
                _dir: dir,
                service,
                params,
                context: Arc::new(ProofGenerationContext::new("Theorem t : True.")),
            }
        }

        fn proof(&self, text: &str) -> BenchmarkedProof<MockBackend> {
            BenchmarkedProof::new(GeneratedProof::new(
                self.service.clone(),
                GeneratedRawContentItem {
                    content: text.to_string(),
                    tokens_spent: GenerationTokens::default(),
                },
                Arc::clone(&self.context),
                Arc::clone(&self.params),
                Vec::new(),
            ))
        }

        fn non_valid(&self, text: &str) -> BenchmarkedProof<MockBackend> {
            let mut proof = self.proof(text);
            proof
                .mark_checked(ProofCheckResult::non_valid(text, format!("`{text}` failed")))
                .unwrap();
            proof
        }

        fn valid(&self, text: &str) -> BenchmarkedProof<MockBackend> {
            let mut proof = self.proof(text);
            proof.mark_checked(ProofCheckResult::valid(text)).unwrap();
            proof
        }
    }

    fn succeeded(proofs: Vec<BenchmarkedProof<MockBackend>>) -> RoundOutcome<MockBackend> {
        RoundOutcome::Succeeded { proofs }
    }

    fn failed() -> RoundOutcome<MockBackend> {
        RoundOutcome::Failed {
            error: FailureSummary::from(&Error::generation_failed(BackendError::Other(
                "overloaded".to_string(),
            ))),
        }
    }

    fn at(round: usize, index: usize) -> ProofRef {
        ProofRef { round, index }
    }

    #[test]
    fn test_mark_checked() {
        let fixture = Fixture::new();
        let mut proof = fixture.proof("auto.");
        assert_eq!(proof.status(), &ProofStatus::NonValidated);
        assert!(!proof.can_be_fixed());

        proof
            .mark_checked(ProofCheckResult::non_valid("auto.", "Error: no progress"))
            .unwrap();
        assert_eq!(proof.diagnostic(), Some("Error: no progress"));
        assert!(proof.can_be_fixed());

        let err = proof.mark_checked(ProofCheckResult::valid("auto.")).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(!proof.is_valid());
        assert_eq!(proof.diagnostic(), Some("Error: no progress"));
    }

    #[test]
    fn test_non_valid_verdict_needs_diagnostic() {
        let fixture = Fixture::new();
        let mut proof = fixture.proof("auto.");
        let err = proof
            .mark_checked(ProofCheckResult {
                proof: "auto.".to_string(),
                is_valid: false,
                diagnostic: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(proof.status(), &ProofStatus::NonValidated);
    }

    #[test]
    fn test_chain_starts_once() {
        let fixture = Fixture::new();
        let mut chain = ProofFixChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.start(succeeded(vec![fixture.proof("auto.")])).unwrap(), 1);

        let err = chain.start(failed()).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(chain.len(), 1);
        assert!(chain.last_round().unwrap().is_success());
    }

    #[test]
    fn test_link_next_round() {
        let fixture = Fixture::new();
        let mut chain = ProofFixChain::new();
        chain
            .start(succeeded(vec![fixture.non_valid("auto."), fixture.non_valid("lia.")]))
            .unwrap();

        let next = chain
            .link_next_round(at(1, 1), succeeded(vec![fixture.valid("intros; lia.")]))
            .unwrap();
        assert_eq!(next, 2);

        let fixed = chain.proof(at(1, 1)).unwrap();
        assert_eq!(fixed.next_round(), Some(2));
        assert!(!fixed.can_be_fixed());
        assert!(chain.proof(at(1, 0)).unwrap().can_be_fixed());

        let second = chain.round(2).unwrap();
        assert_eq!(second.round_number, 2);
        assert_eq!(second.fixed_from, Some(at(1, 1)));
        let valid: Vec<&str> = chain.valid_proofs().map(|p| p.proof.proof()).collect();
        assert_eq!(valid, vec!["intros; lia."]);
        assert!(chain.round(0).is_none());
        assert!(chain.round(3).is_none());
    }

    #[test]
    fn test_only_the_last_round_can_be_fixed() {
        let fixture = Fixture::new();
        let mut chain = ProofFixChain::new();
        chain
            .start(succeeded(vec![fixture.non_valid("auto."), fixture.non_valid("lia.")]))
            .unwrap();
        chain
            .link_next_round(at(1, 0), succeeded(vec![fixture.non_valid("trivial.")]))
            .unwrap();

        let earlier = chain.link_next_round(at(1, 1), succeeded(Vec::new())).unwrap_err();
        assert!(matches!(earlier, Error::Internal(_)));
        let ahead = chain.link_next_round(at(3, 0), succeeded(Vec::new())).unwrap_err();
        assert!(matches!(ahead, Error::Internal(_)));

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.proof(at(1, 1)).unwrap().next_round(), None);
    }

    #[test]
    fn test_proof_is_linked_once() {
        let fixture = Fixture::new();
        let mut proof = fixture.non_valid("auto.");
        proof.link_next_round(2).unwrap();

        let err = proof.link_next_round(3).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(proof.next_round(), Some(2));
    }

    #[test]
    fn test_only_non_valid_proofs_can_be_linked() {
        let fixture = Fixture::new();
        let mut chain = ProofFixChain::new();
        chain
            .start(succeeded(vec![fixture.valid("auto."), fixture.proof("lia.")]))
            .unwrap();

        for index in 0..2 {
            let err = chain
                .link_next_round(at(1, index), succeeded(Vec::new()))
                .unwrap_err();
            assert!(matches!(err, Error::Internal(_)));
        }
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_missing_proof_cannot_be_linked() {
        let fixture = Fixture::new();
        let mut chain = ProofFixChain::new();
        chain.start(succeeded(vec![fixture.non_valid("auto.")])).unwrap();
        let err = chain.link_next_round(at(1, 5), succeeded(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        let mut failed_chain = ProofFixChain::<MockBackend>::new();
        failed_chain.start(failed()).unwrap();
        assert!(failed_chain.round(1).unwrap().proofs().is_empty());
        let err = failed_chain
            .link_next_round(at(1, 0), succeeded(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        let mut empty = ProofFixChain::<MockBackend>::new();
        assert!(empty.link_next_round(at(0, 0), failed()).is_err());
        assert!(empty.is_empty());
    }
}
