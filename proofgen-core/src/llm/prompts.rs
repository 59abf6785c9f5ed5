//! Chats for proof generation and proof fixing, fitted into the token
//! budget of the model.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chat::{estimate_chat_tokens, AnalyzedChat, Chat, ChatMessage};
use super::context::{ProofGenerationContext, TheoremSummary};
use crate::error::{Error, Result};
use crate::params::{ModelParams, DIAGNOSTIC_PLACEHOLDER};

/// One attempt in a fix chain: the proof and, once checked, why it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofVersion {
    pub proof: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ProofVersion {
    pub fn new(proof: impl Into<String>) -> Self {
        Self {
            proof: proof.into(),
            diagnostic: None,
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}

/// Substitute `diagnostic` into a fix prompt.
pub fn render_fix_prompt(prompt: &str, diagnostic: &str) -> String {
    prompt.replace(DIAGNOSTIC_PLACEHOLDER, diagnostic)
}

/// Chat asking for a proof of `context.completion_target`.
pub fn build_proof_generation_chat(
    context: &ProofGenerationContext,
    params: &ModelParams,
) -> Result<AnalyzedChat> {
    let system = vec![ChatMessage::system(&params.system_prompt)];
    let target = vec![ChatMessage::user(&context.completion_target)];
    fit_chat(system, &context.context_theorems, target, params)
}

/// Chat asking to fix the last of `versions`, which must carry a
/// diagnostic. At most `maxPreviousProofVersionsNumber` versions are
/// included; the oldest are dropped first, also when the budget is tight.
pub fn build_proof_fix_chat(
    context: &ProofGenerationContext,
    versions: &[ProofVersion],
    params: &ModelParams,
) -> Result<AnalyzedChat> {
    let profile = &params.multiround_profile;
    let Some(last) = versions.last() else {
        return Err(Error::internal("proof fix chat requires at least one proof version"));
    };
    if last.diagnostic.is_none() {
        return Err(Error::internal("the proof version being fixed has no diagnostic"));
    }

    let keep = profile.max_previous_proof_versions_number.max(1).min(versions.len());
    let mut included = &versions[versions.len() - keep..];

    loop {
        let system = vec![ChatMessage::system(&params.system_prompt)];
        let mut tail = vec![ChatMessage::user(&context.completion_target)];
        for version in included {
            tail.push(ChatMessage::assistant(&version.proof));
            let diagnostic = version.diagnostic.as_deref().unwrap_or_default();
            tail.push(ChatMessage::user(render_fix_prompt(
                &profile.proof_fix_prompt,
                diagnostic,
            )));
        }

        match fit_chat(system, &context.context_theorems, tail, params) {
            Err(Error::Configuration(_)) if included.len() > 1 => {
                debug!(
                    versions = included.len(),
                    "fix chat does not fit, dropping the oldest proof version"
                );
                included = &included[1..];
            }
            result => return result,
        }
    }
}

/// Assemble `head`, as many context theorems as fit, then `tail`. `head`
/// and `tail` are mandatory.
fn fit_chat(
    head: Chat,
    theorems: &[TheoremSummary],
    tail: Chat,
    params: &ModelParams,
) -> Result<AnalyzedChat> {
    let budget = params
        .tokens_limit
        .saturating_sub(params.max_tokens_to_generate);
    let mandatory = estimate_chat_tokens(&head).saturating_add(estimate_chat_tokens(&tail));
    if mandatory > budget {
        return Err(Error::configuration(format!(
            "`tokensLimit` of model \"{}\" is too small: the chat needs at least {} tokens, \
             but only {} remain after reserving {} tokens to generate",
            params.model_id, mandatory, budget, params.max_tokens_to_generate
        )));
    }

    let mut used = mandatory;
    let mut chat = head;
    for theorem in theorems
        .iter()
        .filter(|t| t.proof.is_some())
        .take(params.max_context_theorems_number)
    {
        let pair = theorem_messages(theorem);
        let cost = estimate_chat_tokens(&pair);
        if used.saturating_add(cost) > budget {
            break;
        }
        used += cost;
        chat.extend(pair);
    }
    chat.extend(tail);

    Ok(AnalyzedChat::new(chat, params.max_tokens_to_generate))
}

fn theorem_messages(theorem: &TheoremSummary) -> Chat {
    vec![
        ChatMessage::user(&theorem.statement),
        ChatMessage::assistant(theorem.proof.as_deref().unwrap_or_default()),
    ]
}
