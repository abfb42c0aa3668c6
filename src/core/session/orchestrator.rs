//! Per-connection session orchestrator.
//!
//! A [`Session`] is the handle the transport layer talks to; all turn-slot
//! state lives on one supervisor task. Adapter readers, the mic pump, and
//! turn pipelines publish events into the supervisor over channels — the
//! supervisor is the only task that touches the turn slot, the history
//! store, and the hangup machinery.
//!
//! Lifecycle: `start` opens the recognizer and spawns the supervisor; ASR
//! finals dispatch turns; a new final (or an utterance-begin while playback
//! drains) barges in on the live turn; the `[HANGUP]` sentinel closes the
//! call after the final segment drains client-side; `stop` is always
//! non-blocking and idempotent. Every exit path emits exactly one `done`
//! as the last frame and releases the external connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::asr::{AsrBackend, AsrEvent, AsrHandle, UtterancePhase};
use crate::core::llm::{LlmBackend, Persona};
use crate::core::session::events::{ControlEvent, TurnEvent, TurnOutcome, TurnState};
use crate::core::session::history::{HISTORY_LIMIT, HistoryStore};
use crate::core::session::mic::{MIC_QUEUE_FRAMES, MicQueue};
use crate::core::session::turn::{self, TurnContext, TurnHandle};
use crate::core::tts::TtsBackend;
use crate::transport::{GatewaySender, ServerEvent, StatusKind};

/// Tunables for one session; defaults match the deployed service.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Microphone ingest queue depth in frames.
    pub mic_queue_frames: usize,
    /// How long the client gets to drain the closing phrase after `hangup`.
    pub hangup_drain: Duration,
    /// Dead-man interval: no mic audio for this long ends the session.
    pub asr_idle: Duration,
    /// Conversation history cap in entries.
    pub history_limit: usize,
    /// Identical consecutive finals inside this window are dropped.
    pub final_debounce: Duration,
    /// How long a cancelled turn may take to wind down before being aborted.
    pub turn_cancel_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mic_queue_frames: MIC_QUEUE_FRAMES,
            hangup_drain: Duration::from_secs(6),
            asr_idle: Duration::from_secs(20),
            history_limit: HISTORY_LIMIT,
            final_debounce: Duration::from_millis(220),
            turn_cancel_grace: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session already started")]
    AlreadyStarted,
}

/// Control channel depth; control events are rare.
const CONTROL_BUFFER: usize = 16;

/// Turn event channel depth.
const TURN_EVENT_BUFFER: usize = 32;

/// Per-connection orchestrator handle.
pub struct Session {
    config: SessionConfig,
    gateway: GatewaySender,
    asr: Arc<dyn AsrBackend>,
    llm: Arc<dyn LlmBackend>,
    tts: Arc<dyn TtsBackend>,
    control_tx: mpsc::Sender<ControlEvent>,
    control_rx: Mutex<Option<mpsc::Receiver<ControlEvent>>>,
    mic: Arc<MicQueue>,
    /// Gate for inbound audio: closed until ASR is ready and again once a
    /// hangup is in flight or the session winds down.
    mic_open: Arc<AtomicBool>,
    started: AtomicBool,
    stopped: AtomicBool,
    /// Cancels every adapter stream scoped to this session.
    cancel: CancellationToken,
    /// Fires when the supervisor has fully torn down (or `abort` ran).
    finished: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        gateway: GatewaySender,
        asr: Arc<dyn AsrBackend>,
        llm: Arc<dyn LlmBackend>,
        tts: Arc<dyn TtsBackend>,
    ) -> Arc<Self> {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
        let mic = Arc::new(MicQueue::new(config.mic_queue_frames));
        Arc::new(Self {
            config,
            gateway,
            asr,
            llm,
            tts,
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            mic,
            mic_open: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            supervisor: Mutex::new(None),
        })
    }

    /// Begin the session with the given persona. A second call fails.
    pub fn start(&self, persona: Persona) -> Result<(), SessionError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::AlreadyStarted);
        }
        let control_rx = self
            .control_rx
            .lock()
            .take()
            .ok_or(SessionError::AlreadyStarted)?;

        info!(%persona, "starting session");
        let supervisor = Supervisor {
            config: self.config.clone(),
            gateway: self.gateway.clone(),
            llm: self.llm.clone(),
            tts: self.tts.clone(),
            persona,
            history: HistoryStore::new(self.config.history_limit),
            live: None,
            turn_seq: 0,
            hangup_requested: false,
            hangup_deadline: None,
            last_final: None,
            playback_may_drain: false,
            mic: self.mic.clone(),
            mic_open: self.mic_open.clone(),
            control_tx: self.control_tx.clone(),
            cancel: self.cancel.clone(),
            finished: self.finished.clone(),
        };
        let asr = self.asr.clone();
        let handle = tokio::spawn(supervisor.run(asr, control_rx));
        *self.supervisor.lock() = Some(handle);
        Ok(())
    }

    /// Feed one microphone frame. Never blocks; silently dropped while the
    /// session is not accepting audio.
    pub fn feed_audio(&self, frame: Bytes) {
        if self.mic_open.load(Ordering::Acquire) {
            self.mic.push(frame);
        }
    }

    /// Request shutdown. Non-blocking and idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("session stop requested");
        let _ = self.control_tx.try_send(ControlEvent::Stop);
    }

    /// Client confirmation that the closing phrase finished playing.
    pub fn final_audio_complete(&self) {
        let _ = self.control_tx.try_send(ControlEvent::FinalAudioComplete);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Resolves once the supervisor has torn down and `done` is on the wire.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Token mirror of [`Session::finished`] for wiring into other tasks.
    pub fn finished_token(&self) -> CancellationToken {
        self.finished.clone()
    }

    /// Hard-stop backstop for transport teardown: cancels all adapter work
    /// and guarantees `finished` fires even if the session never started.
    pub fn abort(&self) {
        self.stopped.store(true, Ordering::Release);
        self.mic_open.store(false, Ordering::Release);
        self.mic.close();
        self.cancel.cancel();
        self.finished.cancel();
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
    }
}

/// The single task allowed to mutate the turn slot.
struct Supervisor {
    config: SessionConfig,
    gateway: GatewaySender,
    llm: Arc<dyn LlmBackend>,
    tts: Arc<dyn TtsBackend>,
    persona: Persona,
    history: HistoryStore,
    live: Option<TurnHandle>,
    turn_seq: u64,
    hangup_requested: bool,
    hangup_deadline: Option<Instant>,
    last_final: Option<(String, Instant)>,
    /// A completed turn's audio may still be queued client-side; an
    /// utterance-begin in that window gets a bare `clear`.
    playback_may_drain: bool,
    mic: Arc<MicQueue>,
    mic_open: Arc<AtomicBool>,
    control_tx: mpsc::Sender<ControlEvent>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl Supervisor {
    async fn run(mut self, asr: Arc<dyn AsrBackend>, mut control_rx: mpsc::Receiver<ControlEvent>) {
        self.gateway
            .event(ServerEvent::Status {
                message: StatusKind::Initializing,
            })
            .await;

        let AsrHandle {
            frames,
            events: mut asr_rx,
        } = match asr.open(self.cancel.child_token()).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("failed to open recognizer: {e}");
                self.gateway
                    .event(ServerEvent::Status {
                        message: StatusKind::Error,
                    })
                    .await;
                self.teardown().await;
                return;
            }
        };

        self.mic_open.store(true, Ordering::Release);
        tokio::spawn(pump_mic(
            self.mic.clone(),
            frames,
            self.control_tx.clone(),
            self.config.asr_idle,
            self.cancel.child_token(),
        ));

        self.gateway
            .event(ServerEvent::Status {
                message: StatusKind::Ready,
            })
            .await;

        let (turn_tx, mut turn_rx) = mpsc::channel::<TurnEvent>(TURN_EVENT_BUFFER);

        loop {
            // A disabled branch still evaluates its future; park the timer
            // far out when no hangup drain is pending.
            let drain_deadline = self
                .hangup_deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            tokio::select! {
                event = control_rx.recv() => match event {
                    Some(ControlEvent::Stop) | None => {
                        self.cancel_live_turn().await;
                        break;
                    }
                    Some(ControlEvent::FinalAudioComplete) => {
                        if self.hangup_requested {
                            info!("client confirmed final audio playback");
                            break;
                        }
                        debug!("ignoring final_audio_complete outside hangup");
                    }
                    Some(ControlEvent::MicIdle) => {
                        warn!("no audio activity for {:?}; ending session", self.config.asr_idle);
                        break;
                    }
                },
                event = asr_rx.recv() => match event {
                    Some(AsrEvent::Final { text }) => self.on_final(text, &turn_tx).await,
                    Some(AsrEvent::Vad { state, prob }) => {
                        self.gateway.event(ServerEvent::Vad { state, prob }).await;
                    }
                    Some(AsrEvent::Utterance { phase }) => {
                        self.gateway.event(ServerEvent::Utterance { phase }).await;
                        if phase == UtterancePhase::Begin {
                            self.on_utterance_begin().await;
                        }
                    }
                    Some(AsrEvent::Error { message }) => {
                        error!("recognizer error: {message}");
                        self.gateway
                            .event(ServerEvent::Status { message: StatusKind::Error })
                            .await;
                        break;
                    }
                    Some(AsrEvent::Closed) | None => {
                        if !self.hangup_requested {
                            warn!("recognizer stream closed unexpectedly");
                            self.gateway
                                .event(ServerEvent::Status { message: StatusKind::Error })
                                .await;
                        }
                        break;
                    }
                },
                event = turn_rx.recv() => {
                    // Never `None`: the supervisor keeps a sender alive in
                    // every spawned turn context until the loop exits.
                    if let Some(event) = event {
                        self.on_turn_event(event).await;
                    }
                },
                _ = sleep_until(drain_deadline), if self.hangup_deadline.is_some() => {
                    warn!("hangup drain timed out; forcing done");
                    break;
                }
            }
        }

        self.teardown().await;
    }

    /// Dispatch one final transcript: barge in on any live turn, record the
    /// user entry, and spawn the next pipeline.
    async fn on_final(&mut self, text: String, turn_tx: &mpsc::Sender<TurnEvent>) {
        if self.hangup_requested {
            debug!("ignoring transcript after hangup: {text:?}");
            return;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        let now = Instant::now();
        let duplicate = self.last_final.as_ref().is_some_and(|(last, at)| {
            last == trimmed && now.duration_since(*at) < self.config.final_debounce
        });
        self.last_final = Some((trimmed.to_string(), now));
        if duplicate {
            debug!("debounced duplicate transcript");
            return;
        }

        if self.live.is_some() {
            self.barge_in().await;
        }

        self.history.push_user(trimmed);
        self.gateway
            .event(ServerEvent::AsrFinal {
                text: trimmed.to_string(),
            })
            .await;

        self.turn_seq += 1;
        let ctx = TurnContext {
            id: self.turn_seq,
            persona: self.persona,
            history: self.history.snapshot(),
            llm: self.llm.clone(),
            tts: self.tts.clone(),
            gateway: self.gateway.clone(),
            events: turn_tx.clone(),
            cancel: self.cancel.child_token(),
        };
        debug!(turn = self.turn_seq, "dispatching turn");
        self.live = Some(turn::spawn(ctx));
        self.playback_may_drain = false;
    }

    async fn on_utterance_begin(&mut self) {
        if self.hangup_requested {
            return;
        }
        match &self.live {
            Some(turn) if turn.state == TurnState::PlaybackDraining => {
                info!(turn = turn.id, "utterance begin during playback drain");
                self.barge_in().await;
            }
            Some(_) => {}
            None => {
                if self.playback_may_drain {
                    // The last turn's audio may still be queued client-side.
                    self.gateway.event(ServerEvent::Clear).await;
                    self.playback_may_drain = false;
                }
            }
        }
    }

    async fn on_turn_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::State { turn_id, state } => {
                if let Some(turn) = self.live.as_mut()
                    && turn.id == turn_id
                {
                    debug!(turn = turn_id, ?state, "turn state");
                    turn.state = state;
                }
            }
            TurnEvent::HangupDetected { turn_id } => {
                if self.live.as_ref().is_some_and(|t| t.id == turn_id) {
                    info!(turn = turn_id, "hangup requested; closing input");
                    self.hangup_requested = true;
                    self.mic_open.store(false, Ordering::Release);
                }
            }
            TurnEvent::Finished { turn_id, outcome } => {
                if !self.live.as_ref().is_some_and(|t| t.id == turn_id) {
                    // A barged turn reporting in after replacement.
                    debug!(turn = turn_id, "ignoring stale turn outcome");
                    return;
                }
                self.live = None;
                match outcome {
                    TurnOutcome::Completed { assistant, hangup } => {
                        if !assistant.is_empty() {
                            self.history.commit_assistant(&assistant);
                        }
                        self.playback_may_drain = true;
                        if hangup {
                            self.gateway.event(ServerEvent::Hangup).await;
                            self.hangup_deadline =
                                Some(Instant::now() + self.config.hangup_drain);
                            info!(turn = turn_id, "hangup emitted; awaiting client drain");
                        }
                    }
                    TurnOutcome::Failed => {
                        debug!(turn = turn_id, "turn failed; awaiting next utterance");
                    }
                    TurnOutcome::Cancelled => {}
                }
            }
        }
    }

    /// Cancel the live turn and tell the client to drop queued playback.
    async fn barge_in(&mut self) {
        self.cancel_live_turn().await;
        self.gateway.event(ServerEvent::Clear).await;
        self.playback_may_drain = false;
    }

    /// Cancel the live turn and wait until no task of it touches the
    /// cancelled streams any more; must complete before a new turn opens
    /// its LLM/TTS streams.
    async fn cancel_live_turn(&mut self) {
        let Some(mut turn) = self.live.take() else {
            return;
        };
        info!(turn = turn.id, "cancelling live turn");
        turn.cancel.cancel();
        if timeout(self.config.turn_cancel_grace, &mut turn.task)
            .await
            .is_err()
        {
            warn!(turn = turn.id, "turn did not wind down in time; aborting");
            turn.task.abort();
        }
    }

    /// Close every external connection and emit the final `done`. Runs on
    /// every exit path, including errors.
    async fn teardown(&mut self) {
        self.mic_open.store(false, Ordering::Release);
        self.mic.close();
        self.cancel.cancel();
        self.cancel_live_turn().await;
        self.gateway.event(ServerEvent::Done).await;
        self.finished.cancel();
        info!("session finished");
    }
}

/// Forwards mic frames to the recognizer uplink and enforces the idle
/// dead-man. Frames are dropped (with a count) when the uplink is congested
/// past its watermark; drops never block the producer.
async fn pump_mic(
    mic: Arc<MicQueue>,
    uplink: mpsc::Sender<Bytes>,
    control_tx: mpsc::Sender<ControlEvent>,
    idle: Duration,
    cancel: CancellationToken,
) {
    let mut uplink_drops: u64 = 0;
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = timeout(idle, mic.pop()) => match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => {
                    let _ = control_tx.try_send(ControlEvent::MicIdle);
                    break;
                }
            },
        };
        match uplink.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                uplink_drops += 1;
                if uplink_drops.is_power_of_two() {
                    warn!("recognizer uplink congested; dropped {uplink_drops} frames");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
    if mic.dropped() > 0 || uplink_drops > 0 {
        debug!(
            ingest_drops = mic.dropped(),
            uplink_drops, "mic pump finished"
        );
    }
}
