//! Per-turn pipeline: one LLM stream feeding the segmenter, segments
//! feeding one TTS stream at a time.
//!
//! The pipeline runs as two tasks joined at a segment channel. The main
//! task consumes LLM tokens, forwards cleared text to the client, and
//! queues segments; the synthesis task consumes segments strictly in order
//! with at most one TTS request in flight, so audio for segment N is fully
//! forwarded before segment N+1 starts. Cancellation stops both tasks
//! within one outstanding I/O and suppresses every further outbound frame.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::llm::{ChatMessage, LlmBackend, LlmEvent, Persona};
use crate::core::session::events::{TurnEvent, TurnOutcome, TurnState};
use crate::core::session::segmenter::{Segment, SegmentExtractor};
use crate::core::tts::TtsBackend;
use crate::transport::{GatewaySender, ServerEvent};

/// Queue depth between segmentation and synthesis; segments are sentence
/// sized, so a short queue is plenty.
const SEGMENT_QUEUE: usize = 32;

/// Supervisor-side view of the live turn.
pub(crate) struct TurnHandle {
    pub id: u64,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
    pub state: TurnState,
}

pub(crate) struct TurnContext {
    pub id: u64,
    pub persona: Persona,
    pub history: Vec<ChatMessage>,
    pub llm: Arc<dyn LlmBackend>,
    pub tts: Arc<dyn TtsBackend>,
    pub gateway: GatewaySender,
    pub events: mpsc::Sender<TurnEvent>,
    pub cancel: CancellationToken,
}

pub(crate) fn spawn(ctx: TurnContext) -> TurnHandle {
    let id = ctx.id;
    let cancel = ctx.cancel.clone();
    let task = tokio::spawn(run(ctx));
    TurnHandle {
        id,
        cancel,
        task,
        state: TurnState::Transcribed,
    }
}

async fn run(ctx: TurnContext) {
    let TurnContext {
        id,
        persona,
        history,
        llm,
        tts,
        gateway,
        events,
        cancel,
    } = ctx;

    let report = |state: TurnState| {
        let events = events.clone();
        async move {
            let _ = events.send(TurnEvent::State { turn_id: id, state }).await;
        }
    };

    let llm_cancel = cancel.child_token();
    let mut tokens = match llm.stream_reply(persona, &history, llm_cancel.clone()).await {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(turn = id, "failed to open llm stream: {e}");
            gateway.event(ServerEvent::TurnDone).await;
            let _ = events
                .send(TurnEvent::Finished {
                    turn_id: id,
                    outcome: TurnOutcome::Failed,
                })
                .await;
            return;
        }
    };
    report(TurnState::LlmStreaming).await;

    let (segment_tx, segment_rx) = mpsc::channel::<Segment>(SEGMENT_QUEUE);
    let synth_cancel = cancel.child_token();
    let synth = tokio::spawn(synthesize_segments(
        segment_rx,
        tts,
        gateway.clone(),
        synth_cancel.clone(),
        id,
    ));

    let mut segmenter = SegmentExtractor::new();
    let mut draft = String::new();
    let mut hangup = false;
    let mut failed = false;
    let mut synthesizing = false;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(turn = id, "llm streaming cancelled");
                drop(segment_tx);
                let _ = synth.await;
                finish(&events, id, TurnState::Cancelled, TurnOutcome::Cancelled).await;
                return;
            }
            event = tokens.recv() => event,
        };

        match event {
            Some(LlmEvent::Token(token)) => {
                let out = segmenter.push(&token);
                if !out.cleared.is_empty() {
                    draft.push_str(&out.cleared);
                    gateway
                        .event(ServerEvent::LlmToken { text: out.cleared })
                        .await;
                }
                for segment in out.segments {
                    if !synthesizing {
                        synthesizing = true;
                        report(TurnState::SegmentSynthesizing).await;
                    }
                    if segment_tx.send(segment).await.is_err() {
                        break;
                    }
                }
                if out.hangup {
                    hangup = true;
                    info!(turn = id, "hangup sentinel detected");
                    let _ = events.send(TurnEvent::HangupDetected { turn_id: id }).await;
                    // Nothing past the sentinel is wanted.
                    llm_cancel.cancel();
                    break;
                }
            }
            Some(LlmEvent::Done) | None => {
                let (cleared, residual) = segmenter.finish();
                if !cleared.is_empty() {
                    draft.push_str(&cleared);
                    gateway.event(ServerEvent::LlmToken { text: cleared }).await;
                }
                if let Some(segment) = residual {
                    if !synthesizing {
                        report(TurnState::SegmentSynthesizing).await;
                    }
                    let _ = segment_tx.send(segment).await;
                }
                break;
            }
            Some(LlmEvent::Error(message)) => {
                warn!(turn = id, "llm stream failed mid-turn: {message}");
                failed = true;
                break;
            }
        }
    }
    drop(segment_tx);

    if failed {
        // Skip queued segments; already-sent audio cannot be recalled.
        synth_cancel.cancel();
        let _ = synth.await;
        gateway.event(ServerEvent::TurnDone).await;
        finish(&events, id, TurnState::Done, TurnOutcome::Failed).await;
        return;
    }

    // Wait for all queued segments to synthesize and signal completion.
    let _ = synth.await;
    if cancel.is_cancelled() {
        finish(&events, id, TurnState::Cancelled, TurnOutcome::Cancelled).await;
        return;
    }

    report(TurnState::PlaybackDraining).await;
    gateway.event(ServerEvent::TurnDone).await;
    finish(
        &events,
        id,
        TurnState::Done,
        TurnOutcome::Completed {
            assistant: draft.trim().to_string(),
            hangup,
        },
    )
    .await;
}

async fn finish(events: &mpsc::Sender<TurnEvent>, id: u64, state: TurnState, outcome: TurnOutcome) {
    let _ = events.send(TurnEvent::State { turn_id: id, state }).await;
    let _ = events
        .send(TurnEvent::Finished {
            turn_id: id,
            outcome,
        })
        .await;
}

/// Consumes segments strictly in order, one TTS stream at a time, and emits
/// `segment_done` after each. On cancellation it returns immediately
/// without emitting anything further.
async fn synthesize_segments(
    mut segments: mpsc::Receiver<Segment>,
    tts: Arc<dyn TtsBackend>,
    gateway: GatewaySender,
    cancel: CancellationToken,
    turn_id: u64,
) {
    loop {
        let segment = tokio::select! {
            _ = cancel.cancelled() => return,
            segment = segments.recv() => segment,
        };
        let Some(segment) = segment else { return };

        let text = segment.text.trim();
        if !text.is_empty() {
            match tts.synthesize(text, cancel.child_token()).await {
                Ok(mut audio) => loop {
                    let chunk = tokio::select! {
                        _ = cancel.cancelled() => return,
                        chunk = audio.recv() => chunk,
                    };
                    match chunk {
                        Some(Ok(pcm)) => gateway.audio(pcm).await,
                        Some(Err(e)) => {
                            // Remaining audio for this segment is skipped;
                            // the text stays in the committed reply.
                            warn!(turn = turn_id, "tts stream failed mid-segment: {e}");
                            break;
                        }
                        None => break,
                    }
                },
                Err(e) => warn!(turn = turn_id, "tts request failed: {e}"),
            }
        }
        if cancel.is_cancelled() {
            return;
        }
        gateway
            .event(ServerEvent::SegmentDone {
                is_final: segment.is_final,
            })
            .await;
    }
}
