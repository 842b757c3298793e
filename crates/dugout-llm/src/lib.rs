// Coaching advisor: provider settings, streaming chat clients, prompts and
// the chat session state machine.

pub mod client;
pub mod event;
pub mod prompt;
pub mod session;
pub mod settings;

pub use client::{AdvisoryClient, AdvisoryError, ChatProvider};
pub use event::{ChatMessage, ChatRequest, ChatRole, LlmEvent};
