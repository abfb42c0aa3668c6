//! Channel messages feeding the session supervisor.
//!
//! Everything that used to be a shared mutable flag (hangup requested,
//! final segment seen) travels as a message into the supervisor's select
//! loop instead; the turn slot is mutated from exactly one task.

/// Control-plane events from the transport layer and the mic pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlEvent {
    /// Client `stop` or an internal request to shut the session down.
    Stop,
    /// Client drained the closing phrase after a hangup.
    FinalAudioComplete,
    /// No microphone audio for the dead-man interval.
    MicIdle,
}

/// Turn pipeline states, reported to the supervisor as they change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Transcribed,
    LlmStreaming,
    SegmentSynthesizing,
    PlaybackDraining,
    Done,
    Cancelled,
}

/// Events published by a turn pipeline task.
#[derive(Debug)]
pub(crate) enum TurnEvent {
    State { turn_id: u64, state: TurnState },
    /// The segmenter saw the hangup sentinel; the supervisor must stop
    /// accepting input while the closing segment synthesizes.
    HangupDetected { turn_id: u64 },
    Finished { turn_id: u64, outcome: TurnOutcome },
}

/// Terminal result of one turn.
#[derive(Debug)]
pub(crate) enum TurnOutcome {
    /// Turn ran to completion; `assistant` is the trimmed reply text
    /// (possibly empty for a silent hangup) and `hangup` marks a
    /// sentinel-terminated call.
    Completed { assistant: String, hangup: bool },
    /// LLM failure mid-turn; `turn_done` was emitted, nothing committed.
    Failed,
    /// Barge-in or shutdown; nothing further was emitted or committed.
    Cancelled,
}
