//! Streaming LLM client abstraction.
//!
//! The session orchestrator talks to the language model through the
//! [`LlmBackend`] trait: one call opens a token stream for a turn, delivered
//! over a channel so the consumer never runs inside adapter callbacks.
//! Cancelling the supplied token tears the underlying request down.

mod baseten;
mod persona;

pub use baseten::{BasetenChat, BasetenConfig};
pub use persona::Persona;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Speaker of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation history, also the wire shape used by the
/// feedback endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Error types for LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("provider returned status {status}: {body}")]
    BadStatus { status: u16, body: String },
    #[error("malformed stream payload: {0}")]
    Protocol(String),
    #[error("empty completion")]
    EmptyCompletion,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::RequestFailed(err.to_string())
    }
}

/// Items of the per-turn token stream. The channel closing after `Done`
/// marks a clean end of stream; `Error` means the turn must be abandoned.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    Token(String),
    Done,
    Error(String),
}

/// Streaming chat backend. `history` already contains the latest user
/// transcript as its final entry; the implementation prepends the persona
/// system prompt.
#[async_trait]
pub trait LlmBackend: Send + Sync + 'static {
    async fn stream_reply(
        &self,
        persona: Persona,
        history: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<LlmEvent>, LlmError>;
}
