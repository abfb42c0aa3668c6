//! Streaming speech recognition abstraction.
//!
//! An [`AsrBackend`] opens one recognizer connection per session and hands
//! back an [`AsrHandle`]: a bounded uplink for microphone PCM frames plus a
//! channel of recognizer events. The orchestrator never runs inside adapter
//! callbacks; everything is published through the handle's event channel.

mod fennec;

pub use fennec::{DEFAULT_STREAM_URL, DEFAULT_TOKEN_URL, FennecAsr, FennecAsrConfig, VadSettings};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Voice-activity classification reported alongside speech probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadState {
    Speech,
    Silence,
    Noise,
}

/// Utterance boundary markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtterancePhase {
    Begin,
    End,
}

/// Events published by a recognizer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum AsrEvent {
    /// A final transcript for one user utterance.
    Final { text: String },
    /// Voice-activity passthrough for the client UI.
    Vad { state: VadState, prob: f32 },
    /// Utterance boundary passthrough; `Begin` also drives barge-in.
    Utterance { phase: UtterancePhase },
    /// Streaming error reported by the provider after a successful open.
    Error { message: String },
    /// The provider closed the connection.
    Closed,
}

/// Error types for ASR operations
#[derive(Debug, thiserror::Error)]
pub enum AsrError {
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("recognizer did not become ready in time")]
    HandshakeTimeout,
    #[error("provider error: {0}")]
    ProviderError(String),
}

/// Live recognizer connection. Dropping the handle (or cancelling the token
/// passed to [`AsrBackend::open`]) closes the connection.
pub struct AsrHandle {
    /// Bounded microphone uplink; callers use `try_send` and drop on
    /// overflow so a stalled provider never blocks the audio path.
    pub frames: mpsc::Sender<Bytes>,
    /// Recognizer event stream.
    pub events: mpsc::Receiver<AsrEvent>,
}

/// Factory for recognizer connections, one per session.
#[async_trait]
pub trait AsrBackend: Send + Sync + 'static {
    async fn open(&self, cancel: CancellationToken) -> Result<AsrHandle, AsrError>;
}
