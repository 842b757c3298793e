// Streaming events and chat message types shared by every provider.

use serde::{Deserialize, Serialize};

/// Events emitted by a streaming chat task.
///
/// Every variant carries the generation the task was started with so the
/// consumer can drop events from cancelled turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmEvent {
    /// One incremental chunk of text.
    Token { text: String, generation: u64 },
    /// The stream finished; `full_text` is the concatenation of all tokens.
    Complete { full_text: String, generation: u64 },
    /// The stream failed. Any partial text should be discarded.
    Error { message: String, generation: u64 },
}

impl LlmEvent {
    pub fn generation(&self) -> u64 {
        match self {
            LlmEvent::Token { generation, .. }
            | LlmEvent::Complete { generation, .. }
            | LlmEvent::Error { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
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
}

/// A provider-neutral chat request. The system prompt is kept separate from
/// the turn list; providers place it where their API expects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    /// Overrides the provider's configured model for this request.
    pub model: Option<String>,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// The turn list with the system prompt as a leading `system` message.
    pub fn messages_with_system(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if !self.system.is_empty() {
            out.push(ChatMessage {
                role: ChatRole::System,
                content: self.system.clone(),
            });
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}
