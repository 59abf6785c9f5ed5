//! A generated proof that knows how to ask for its own fix.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::{GenerationOptions, LlmService};
use crate::backends::LlmBackend;
use crate::error::{Error, Result};
use crate::llm::{
    build_proof_fix_chat, GeneratedRawContentItem, GenerationTokens, ProofGenerationContext,
    ProofVersion,
};
use crate::params::ResolvedModelParams;

/// One proof produced by an [`LlmService`], together with the versions it
/// was derived from.
pub struct GeneratedProof<B: LlmBackend> {
    service: LlmService<B>,
    proof_id: Uuid,
    raw: GeneratedRawContentItem,
    context: Arc<ProofGenerationContext>,
    params: Arc<B::Params>,
    /// Earlier versions, each with the diagnostic that rejected it
    previous_versions: Vec<ProofVersion>,
}

impl<B: LlmBackend> GeneratedProof<B> {
    pub(crate) fn new(
        service: LlmService<B>,
        raw: GeneratedRawContentItem,
        context: Arc<ProofGenerationContext>,
        params: Arc<B::Params>,
        previous_versions: Vec<ProofVersion>,
    ) -> Self {
        Self {
            service,
            proof_id: Uuid::new_v4(),
            raw,
            context,
            params,
            previous_versions,
        }
    }

    /// Proof text.
    pub fn proof(&self) -> &str {
        &self.raw.content
    }

    pub fn proof_id(&self) -> Uuid {
        self.proof_id
    }

    pub fn tokens_spent(&self) -> GenerationTokens {
        self.raw.tokens_spent
    }

    pub fn context(&self) -> &ProofGenerationContext {
        &self.context
    }

    pub fn params(&self) -> &B::Params {
        &self.params
    }

    pub fn previous_versions(&self) -> &[ProofVersion] {
        &self.previous_versions
    }

    /// 1 for a freshly generated proof, +1 per fix.
    pub fn version_number(&self) -> usize {
        self.previous_versions.len() + 1
    }

    /// Whether another version may be requested.
    pub fn can_be_fixed(&self) -> bool {
        self.service.backend().supports_chat()
            && self.version_number() < self.params.multiround_profile().max_rounds_number
    }

    /// Ask the model to fix this proof given the checker's `diagnostic`.
    ///
    /// `choices` defaults to `defaultProofFixChoices`. Every returned proof
    /// is one version newer than this one.
    pub async fn fix_proof(
        &self,
        diagnostic: &str,
        choices: Option<usize>,
        options: &GenerationOptions,
    ) -> Result<Vec<GeneratedProof<B>>> {
        let profile = self.params.multiround_profile();
        if !self.service.backend().supports_chat() {
            return Err(Error::configuration(format!(
                "`{}` does not support proof fixing",
                self.service.name()
            )));
        }
        if self.version_number() >= profile.max_rounds_number {
            return Err(Error::configuration(format!(
                "next version could not be generated: version {} >= max rounds number {}",
                self.version_number(),
                profile.max_rounds_number
            )));
        }
        let choices = choices.unwrap_or(profile.default_proof_fix_choices);
        self.service.validate_choices(&self.params, choices)?;

        let mut versions = self.previous_versions.clone();
        versions.push(ProofVersion::new(self.proof()).with_diagnostic(diagnostic));
        let chat = build_proof_fix_chat(&self.context, &versions, self.params.base())?;

        let generated = self
            .service
            .generate_wrapped(None, chat, &self.params, choices, options)
            .await?;
        Ok(generated
            .items
            .into_iter()
            .map(|item| {
                GeneratedProof::new(
                    self.service.clone(),
                    item,
                    Arc::clone(&self.context),
                    Arc::clone(&self.params),
                    versions.clone(),
                )
            })
            .collect())
    }
}

impl<B: LlmBackend> Clone for GeneratedProof<B> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            proof_id: self.proof_id,
            raw: self.raw.clone(),
            context: Arc::clone(&self.context),
            params: Arc::clone(&self.params),
            previous_versions: self.previous_versions.clone(),
        }
    }
}

impl<B: LlmBackend> fmt::Debug for GeneratedProof<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedProof")
            .field("proof_id", &self.proof_id)
            .field("proof", &self.raw.content)
            .field("version_number", &self.version_number())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockBackend, MockUserModelParams};
    use crate::config::ServiceConfig;
    use crate::params::{UserModelParams, UserMultiroundProfile};
    use crate::service::EventBus;
    use tempfile::TempDir;

    fn setup(dir: &TempDir, max_rounds: i64) -> (LlmService<MockBackend>, Arc<<MockBackend as LlmBackend>::Params>) {
        let config = ServiceConfig::new().with_generations_log_path(dir.path().join("mock.log"));
        let service = LlmService::new(MockBackend::new(), EventBus::new(16), config).unwrap();
        let user = MockUserModelParams {
            base: UserModelParams::new("mock")
                .with_max_tokens_to_generate(50)
                .with_tokens_limit(2000)
                .with_multiround_profile(UserMultiroundProfile {
                    max_rounds_number: Some(max_rounds),
                    proof_fix_choices: Some(2),
                    proof_fix_prompt: Some(MockBackend::PROOF_FIX_PROMPT.to_string()),
                    max_previous_proof_versions_number: Some(10),
                }),
            ..MockUserModelParams::new("mock", vec!["auto.".to_string(), "lia.".to_string()])
        };
        let params = service.resolve_parameters_or_err(&user).unwrap();
        (service, params)
    }

    #[tokio::test]
    async fn test_fix_proof_produces_next_version() {
        let dir = TempDir::new().unwrap();
        let (service, params) = setup(&dir, 3);
        let context = Arc::new(ProofGenerationContext::new("Theorem t : True."));
        let options = GenerationOptions::default();

        let first = service
            .generate_proof(context, params, Some(1), &options)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(first.version_number(), 1);
        assert!(first.can_be_fixed());

        let fixed = first.fix_proof("Error: no goals", None, &options).await.unwrap();
        assert_eq!(fixed.len(), 2);
        assert!(fixed.iter().all(|p| p.proof() == MockBackend::FIXED_PROOF));
        assert_eq!(fixed[0].version_number(), 2);
        assert_eq!(
            fixed[0].previous_versions()[0].diagnostic.as_deref(),
            Some("Error: no goals")
        );
        assert_ne!(fixed[0].proof_id(), fixed[1].proof_id());
    }

    #[tokio::test]
    async fn test_fix_beyond_max_rounds() {
        let dir = TempDir::new().unwrap();
        let (service, params) = setup(&dir, 2);
        let context = Arc::new(ProofGenerationContext::new("Theorem t : True."));
        let options = GenerationOptions::default();
        let mut events = service.events().track();

        let first = service
            .generate_proof(context, params, Some(1), &options)
            .await
            .unwrap()
            .remove(0);
        let second = first.fix_proof("bad", Some(1), &options).await.unwrap().remove(0);
        assert!(!second.can_be_fixed());

        let err = second.fix_proof("still bad", Some(1), &options).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("version 2 >= max rounds number 2"));
        assert_eq!(events.counts().succeeded, 2);
        assert_eq!(events.counts().failed, 0);
    }
}
