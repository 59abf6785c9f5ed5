//! Chats, generation contexts and token accounting.
//!
//! ## Example
//!
//! ```rust
//! use proofgen_core::llm::{build_proof_generation_chat, ProofGenerationContext, TheoremSummary};
//! use proofgen_core::params::{basic_model_params_schema, ModelParams, UserModelParams};
//!
//! let params: ModelParams = basic_model_params_schema()
//!     .resolve_params(
//!         &UserModelParams::new("gpt")
//!             .with_choices(1)
//!             .with_max_tokens_to_generate(100)
//!             .with_tokens_limit(2000),
//!     )
//!     .into_result("gpt")
//!     .unwrap();
//!
//! let context = ProofGenerationContext::new("Theorem t : 1 + 1 = 2.").with_theorems(vec![
//!     TheoremSummary::new("t0", "Lemma t0 : 0 = 0.", 3).with_proof("Proof. reflexivity. Qed."),
//! ]);
//! let chat = build_proof_generation_chat(&context, &params).unwrap();
//! assert_eq!(chat.chat.len(), 4);
//! ```

mod chat;
mod context;
mod prompts;

pub use chat::{
    estimate_chat_tokens, estimate_tokens, AnalyzedChat, Chat, ChatMessage, ChatRole,
    EstimatedTokens, GeneratedRawContent, GeneratedRawContentItem, GenerationTokens,
};
pub use context::{rank_by_distance, ProofGenerationContext, TheoremSummary};
pub use prompts::{build_proof_fix_chat, build_proof_generation_chat, render_fix_prompt, ProofVersion};
