//! Chat messages, token accounting and raw generation output.

use serde::{Deserialize, Serialize};

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    /// Estimated token count of the message content.
    pub fn estimated_tokens(&self) -> u32 {
        estimate_tokens(&self.content)
    }
}

/// Ordered conversation sent to a backend.
pub type Chat = Vec<ChatMessage>;

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// Estimated token count of a whole chat.
pub fn estimate_chat_tokens(chat: &[ChatMessage]) -> u32 {
    chat.iter()
        .map(ChatMessage::estimated_tokens)
        .fold(0u32, u32::saturating_add)
}

/// Token budget of a chat that is about to be sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatedTokens {
    pub messages_tokens: u32,
    pub max_tokens_to_generate: u32,
    pub max_tokens_in_total: u32,
}

/// Chat together with its token estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedChat {
    pub chat: Chat,
    pub estimated_tokens: EstimatedTokens,
}

impl AnalyzedChat {
    /// Analyze `chat` against a generation budget.
    pub fn new(chat: Chat, max_tokens_to_generate: u32) -> Self {
        let messages_tokens = estimate_chat_tokens(&chat);
        Self {
            chat,
            estimated_tokens: EstimatedTokens {
                messages_tokens,
                max_tokens_to_generate,
                max_tokens_in_total: messages_tokens.saturating_add(max_tokens_to_generate),
            },
        }
    }
}

/// Tokens spent on a generation, possibly estimated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTokens {
    pub prompt_tokens: u32,
    pub generated_tokens: u32,
    pub tokens_spent_in_total: u32,
}

impl GenerationTokens {
    pub fn new(prompt_tokens: u32, generated_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            generated_tokens,
            tokens_spent_in_total: prompt_tokens.saturating_add(generated_tokens),
        }
    }

    /// Sum of two token counts.
    pub fn merge(&self, other: &GenerationTokens) -> Self {
        Self::new(
            self.prompt_tokens.saturating_add(other.prompt_tokens),
            self.generated_tokens.saturating_add(other.generated_tokens),
        )
    }
}

/// One raw item produced by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedRawContentItem {
    pub content: String,
    pub tokens_spent: GenerationTokens,
}

/// Everything a backend produced for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedRawContent {
    pub items: Vec<GeneratedRawContentItem>,
    pub tokens_spent_in_total: GenerationTokens,
}

impl GeneratedRawContent {
    /// Aggregate raw outputs, estimating per-item tokens.
    ///
    /// The prompt cost is attributed to the first item only so per-item
    /// values sum up to the request total. Backends that know the real
    /// totals pass them in `reported_total`.
    pub fn aggregate(
        contents: Vec<String>,
        prompt_tokens: u32,
        reported_total: Option<GenerationTokens>,
    ) -> Self {
        let items: Vec<GeneratedRawContentItem> = contents
            .into_iter()
            .enumerate()
            .map(|(i, content)| {
                let prompt = if i == 0 { prompt_tokens } else { 0 };
                let generated = estimate_tokens(&content);
                GeneratedRawContentItem {
                    content,
                    tokens_spent: GenerationTokens::new(prompt, generated),
                }
            })
            .collect();
        let estimated_total = items
            .iter()
            .fold(GenerationTokens::default(), |acc, item| acc.merge(&item.tokens_spent));
        Self {
            items,
            tokens_spent_in_total: reported_total.unwrap_or(estimated_total),
        }
    }

    /// Raw contents in generation order.
    pub fn contents(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.content.as_str()).collect()
    }
}
