// Conversation state for the streaming advisor chat.
//
// A turn is pending from `begin` until a terminal event for its generation
// arrives. Only a `Complete` for the current generation commits the user
// message and the reply to history; cancelled or failed turns leave history
// exactly as it was.

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::{ChatMessage, LlmEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Idle,
    Streaming,
    Complete,
    Error,
}

/// What applying an event did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    Token(String),
    Completed(String),
    Failed(String),
    /// The event belonged to a cancelled or finished turn and was dropped.
    Stale,
}

#[derive(Debug)]
struct PendingTurn {
    user: ChatMessage,
    partial: String,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct ChatSession {
    history: Vec<ChatMessage>,
    generation: u64,
    pending: Option<PendingTurn>,
    status: ChatStatus,
    last_error: Option<String>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            generation: 0,
            pending: None,
            status: ChatStatus::Idle,
            last_error: None,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Reply text received so far for the pending turn.
    pub fn partial(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.partial.as_str())
    }

    pub fn is_streaming(&self) -> bool {
        self.pending.is_some()
    }

    /// Start a new turn, cancelling any pending one. Returns the generation
    /// to tag the stream with and the messages to send (history plus the new
    /// user message).
    pub fn begin(&mut self, content: impl Into<String>) -> (u64, Vec<ChatMessage>) {
        self.cancel();
        self.generation += 1;

        let user = ChatMessage::user(content);
        let mut messages = self.history.clone();
        messages.push(user.clone());

        self.pending = Some(PendingTurn {
            user,
            partial: String::new(),
            task: None,
        });
        self.status = ChatStatus::Streaming;
        self.last_error = None;
        debug!(generation = self.generation, "chat turn started");
        (self.generation, messages)
    }

    /// Remember the task streaming the current turn so `cancel` can abort it.
    /// A handle for any other generation is aborted immediately.
    pub fn attach_task(&mut self, generation: u64, handle: JoinHandle<()>) {
        match self.pending.as_mut() {
            Some(turn) if generation == self.generation => {
                if let Some(old) = turn.task.replace(handle) {
                    old.abort();
                }
            }
            _ => handle.abort(),
        }
    }

    /// Fold one streaming event into the session.
    pub fn apply(&mut self, event: LlmEvent) -> ChatUpdate {
        let event_generation = event.generation();
        if event_generation != self.generation || self.pending.is_none() {
            debug!(
                "Discarding stale chat event (event gen: {}, current gen: {})",
                event_generation, self.generation
            );
            return ChatUpdate::Stale;
        }

        match event {
            LlmEvent::Token { text, .. } => {
                if let Some(turn) = self.pending.as_mut() {
                    turn.partial.push_str(&text);
                }
                ChatUpdate::Token(text)
            }
            LlmEvent::Complete { full_text, .. } => {
                if let Some(turn) = self.pending.take() {
                    self.history.push(turn.user);
                    self.history.push(ChatMessage::assistant(full_text.clone()));
                }
                self.status = ChatStatus::Complete;
                ChatUpdate::Completed(full_text)
            }
            LlmEvent::Error { message, .. } => {
                warn!("chat turn failed: {message}");
                self.pending = None;
                self.status = ChatStatus::Error;
                self.last_error = Some(message.clone());
                ChatUpdate::Failed(message)
            }
        }
    }

    /// Drop the pending turn and its partial reply. Returns whether anything
    /// was pending. The generation moves on so late events are stale.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(turn) => {
                if let Some(task) = turn.task {
                    task.abort();
                }
                self.generation += 1;
                self.status = ChatStatus::Idle;
                info!("Cancelled pending chat turn");
                true
            }
            None => false,
        }
    }

    /// Cancel the pending turn only if it is still the one started at
    /// `generation`. A finished or superseded turn is left alone.
    pub fn cancel_if(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            debug!(
                "Ignoring cancel for old chat turn (gen: {}, current gen: {})",
                generation, self.generation
            );
            return false;
        }
        self.cancel()
    }

    /// Cancel any pending turn and forget the conversation.
    pub fn clear(&mut self) {
        self.cancel();
        self.history.clear();
        self.status = ChatStatus::Idle;
        self.last_error = None;
    }
}
