//! WebSocket wire messages.
//!
//! Both directions use internally tagged JSON; unknown inbound types fail
//! decoding and are ignored by the connection loop. Binary frames carry raw
//! PCM16 in both directions and never pass through these types.

use serde::{Deserialize, Serialize};

use crate::core::asr::{UtterancePhase, VadState};
use crate::core::llm::Persona;

/// Messages a client may send as JSON text frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message of a session; selects the prospect persona.
    Start {
        #[serde(default)]
        persona: Persona,
    },
    /// User-initiated hangup.
    Stop,
    /// The client finished playing the closing phrase after a hangup.
    FinalAudioComplete,
}

/// Connection lifecycle states reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Connected,
    Initializing,
    Ready,
    Error,
}

/// Events the server sends as JSON text frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Status { message: StatusKind },
    AsrFinal { text: String },
    LlmToken { text: String },
    SegmentDone { is_final: bool },
    TurnDone,
    /// The agent is ending the call; no further input is accepted.
    Hangup,
    /// Last frame of every session.
    Done,
    /// Drop any client-buffered playback (after the client-side fade).
    Clear,
    /// Voice-activity passthrough from the recognizer.
    Vad { state: VadState, prob: f32 },
    Utterance { phase: UtterancePhase },
}
