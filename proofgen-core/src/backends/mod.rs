//! Backend capability interface and its implementations.
//!
//! A backend knows how to resolve its own parameters (by composing a
//! schema on top of the basic one) and how to turn a chat into raw
//! generated content. Everything else (events, telemetry, timeouts,
//! error policy) lives in [`LlmService`](crate::service::LlmService).

mod http;
mod lm_studio;
mod mock;
mod openai;
mod predefined;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::BackendError;
use crate::llm::{AnalyzedChat, GeneratedRawContent, ProofGenerationContext};
use crate::params::{ParamsSchema, ResolvedModelParams};

pub use http::{ChatCompletions, ChatCompletionsClient, ChatCompletionsRequest, HttpClientConfig};
pub use lm_studio::{LmStudioBackend, LmStudioModelParams, LmStudioUserModelParams};
pub use mock::{MockBackend, MockModelParams, MockUserModelParams};
pub use openai::{known_model_limits, OpenAiBackend, OpenAiModelParams, OpenAiUserModelParams};
pub use predefined::{
    PredefinedProofsBackend, PredefinedProofsModelParams, PredefinedProofsUserModelParams,
};

/// Generation capability of one LLM provider.
#[async_trait]
pub trait LlmBackend: Send + Sync + 'static {
    /// Raw user configuration for this backend.
    type UserParams: Serialize + Debug + Clone + Send + Sync + 'static;
    /// Resolved parameters for this backend.
    type Params: ResolvedModelParams;

    /// Name shown in messages and logs, e.g. "OpenAiService".
    fn name(&self) -> &str;

    /// Schema resolving [`Self::UserParams`] into [`Self::Params`].
    fn params_schema(&self) -> ParamsSchema;

    /// Largest number of choices a single request may ask for.
    fn max_choices(&self, _params: &Self::Params) -> Option<usize> {
        None
    }

    /// Whether the backend consumes chats. Backends that do not cannot be
    /// asked to generate from a chat nor to fix proofs.
    fn supports_chat(&self) -> bool {
        true
    }

    /// Whether the backend talks to a remote service over the network.
    fn is_remote(&self) -> bool {
        false
    }

    /// Generate `choices` items from a prepared chat.
    async fn generate_from_chat(
        &self,
        chat: &AnalyzedChat,
        params: &Self::Params,
        choices: usize,
    ) -> std::result::Result<GeneratedRawContent, BackendError>;

    /// Generate `choices` proofs for a context. `chat` is the chat built
    /// from `context`; backends that need the structured context override
    /// this.
    async fn generate_from_context(
        &self,
        _context: &ProofGenerationContext,
        chat: &AnalyzedChat,
        params: &Self::Params,
        choices: usize,
    ) -> std::result::Result<GeneratedRawContent, BackendError> {
        self.generate_from_chat(chat, params, choices).await
    }
}
