//! Streaming speech synthesis abstraction.
//!
//! One [`TtsBackend::synthesize`] call covers one segment: the returned
//! channel yields PCM16 chunks and closes when the segment is fully
//! synthesized. Mid-stream failures arrive as an `Err` item; the caller
//! skips the remainder of the segment and moves on.

mod inworld;

pub use inworld::{InworldTts, InworldTtsConfig};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Error types for TTS operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("provider returned status {status}: {body}")]
    BadStatus { status: u16, body: String },
    #[error("malformed stream payload: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for TtsError {
    fn from(err: reqwest::Error) -> Self {
        TtsError::RequestFailed(err.to_string())
    }
}

/// Streaming synthesizer; at most one in-flight stream per turn.
#[async_trait]
pub trait TtsBackend: Send + Sync + 'static {
    async fn synthesize(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<Bytes, TtsError>>, TtsError>;
}
