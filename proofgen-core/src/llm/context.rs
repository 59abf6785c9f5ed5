//! Input of a proof generation request.

use serde::{Deserialize, Serialize};

/// A theorem from the surrounding document, offered to the model as an
/// example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TheoremSummary {
    pub name: String,
    pub statement: String,
    /// Proof text, if the theorem is proven
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    /// Line where the statement starts
    pub line: u32,
}

impl TheoremSummary {
    pub fn new(name: impl Into<String>, statement: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            statement: statement.into(),
            proof: None,
            line,
        }
    }

    pub fn with_proof(mut self, proof: impl Into<String>) -> Self {
        self.proof = Some(proof.into());
        self
    }
}

/// Goal to prove and ranked supporting theorems, most relevant first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofGenerationContext {
    pub completion_target: String,
    pub context_theorems: Vec<TheoremSummary>,
}

impl ProofGenerationContext {
    pub fn new(completion_target: impl Into<String>) -> Self {
        Self {
            completion_target: completion_target.into(),
            context_theorems: Vec::new(),
        }
    }

    pub fn with_theorems(mut self, theorems: Vec<TheoremSummary>) -> Self {
        self.context_theorems = theorems;
        self
    }
}

/// Rank theorems by distance to the completion line: theorems above it,
/// closest first, then theorems below it, closest first. Theorems on the
/// completion line itself are dropped.
pub fn rank_by_distance(theorems: &[TheoremSummary], completion_line: u32) -> Vec<TheoremSummary> {
    let mut before: Vec<&TheoremSummary> =
        theorems.iter().filter(|t| t.line < completion_line).collect();
    before.sort_by(|a, b| b.line.cmp(&a.line));

    let mut after: Vec<&TheoremSummary> =
        theorems.iter().filter(|t| t.line > completion_line).collect();
    after.sort_by_key(|t| t.line);

    before.into_iter().chain(after).cloned().collect()
}
