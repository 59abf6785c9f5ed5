//! Proof checker seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::ProofGenerationContext;

/// Verdict on one proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofCheckResult {
    pub proof: String,
    pub is_valid: bool,
    /// Checker message; required for non-valid proofs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ProofCheckResult {
    pub fn valid(proof: impl Into<String>) -> Self {
        Self {
            proof: proof.into(),
            is_valid: true,
            diagnostic: None,
        }
    }

    pub fn non_valid(proof: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            proof: proof.into(),
            is_valid: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// External proof checker.
#[async_trait]
pub trait ProofChecker: Send + Sync {
    /// Check `proofs` of `context.completion_target`, returning one result
    /// per proof in the same order.
    async fn check_proofs(
        &self,
        context: &ProofGenerationContext,
        proofs: &[String],
    ) -> Result<Vec<ProofCheckResult>>;
}
