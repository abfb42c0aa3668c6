//! End-to-end session scenarios against mock recognizer, chat, and
//! synthesizer backends: plain turns, barge-in, hangup (confirmed and
//! timed out), user stop, recognizer failure, and the per-turn error
//! recovery paths.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use coldcall::core::asr::{AsrBackend, AsrError, AsrEvent, AsrHandle, UtterancePhase};
use coldcall::core::llm::{ChatMessage, LlmBackend, LlmError, LlmEvent, Persona, Role};
use coldcall::core::session::{Session, SessionConfig};
use coldcall::core::tts::{TtsBackend, TtsError};
use coldcall::transport::{GatewaySender, OutboundFrame, ServerEvent, StatusKind};

// ---------------------------------------------------------------------------
// Mock backends

struct MockAsr {
    handle: Mutex<Option<AsrHandle>>,
    fail_open: bool,
}

#[async_trait]
impl AsrBackend for MockAsr {
    async fn open(&self, _cancel: CancellationToken) -> Result<AsrHandle, AsrError> {
        if self.fail_open {
            return Err(AsrError::ConnectionFailed("mock refused".to_string()));
        }
        Ok(self.handle.lock().take().expect("recognizer opened twice"))
    }
}

/// One scripted reply item; `Hold` keeps the stream open until cancelled.
#[derive(Clone)]
enum Reply {
    Token(&'static str),
    Done,
    Error(&'static str),
    Hold,
}

struct ScriptedLlm {
    scripts: Mutex<VecDeque<Vec<Reply>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    fn new(scripts: Vec<Vec<Reply>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn stream_reply(
        &self,
        _persona: Persona,
        history: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<LlmEvent>, LlmError> {
        self.calls.lock().push(history.to_vec());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![Reply::Done]);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for item in script {
                match item {
                    Reply::Token(text) => {
                        if tx.send(LlmEvent::Token(text.to_string())).await.is_err() {
                            return;
                        }
                    }
                    Reply::Done => {
                        let _ = tx.send(LlmEvent::Done).await;
                        return;
                    }
                    Reply::Error(message) => {
                        let _ = tx.send(LlmEvent::Error(message.to_string())).await;
                        return;
                    }
                    Reply::Hold => {
                        cancel.cancelled().await;
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

#[derive(Clone, Copy)]
enum Synth {
    /// Two chunks derived from the text, then a clean close.
    Normal,
    /// One chunk, then the stream stays open until cancelled.
    HoldAfterFirstChunk,
    /// One chunk, then a mid-stream error.
    ErrorAfterFirstChunk,
}

struct MockTts {
    scripts: Mutex<VecDeque<Synth>>,
    spoken: Mutex<Vec<String>>,
}

impl MockTts {
    fn new(scripts: Vec<Synth>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            spoken: Mutex::new(Vec::new()),
        })
    }

    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }
}

#[async_trait]
impl TtsBackend for MockTts {
    async fn synthesize(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<Bytes, TtsError>>, TtsError> {
        self.spoken.lock().push(text.to_string());
        let mode = self.scripts.lock().pop_front().unwrap_or(Synth::Normal);
        let first = Bytes::from(format!("pcm[{text}]#1"));
        let second = Bytes::from(format!("pcm[{text}]#2"));
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            match mode {
                Synth::Normal => {
                    let _ = tx.send(Ok(first)).await;
                    let _ = tx.send(Ok(second)).await;
                }
                Synth::HoldAfterFirstChunk => {
                    let _ = tx.send(Ok(first)).await;
                    cancel.cancelled().await;
                }
                Synth::ErrorAfterFirstChunk => {
                    let _ = tx.send(Ok(first)).await;
                    let _ = tx
                        .send(Err(TtsError::RequestFailed("mock tts died".to_string())))
                        .await;
                }
            }
        });
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Harness

struct Harness {
    session: Arc<Session>,
    out_rx: mpsc::Receiver<OutboundFrame>,
    asr_tx: mpsc::Sender<AsrEvent>,
    llm: Arc<ScriptedLlm>,
    tts: Arc<MockTts>,
    // Keeps the recognizer uplink alive for the mic pump.
    _frame_rx: mpsc::Receiver<Bytes>,
}

fn harness_with(
    config: SessionConfig,
    llm_scripts: Vec<Vec<Reply>>,
    tts_scripts: Vec<Synth>,
    fail_asr_open: bool,
) -> Harness {
    let (frame_tx, frame_rx) = mpsc::channel(32);
    let (asr_tx, asr_rx) = mpsc::channel(64);
    let asr = Arc::new(MockAsr {
        handle: Mutex::new(Some(AsrHandle {
            frames: frame_tx,
            events: asr_rx,
        })),
        fail_open: fail_asr_open,
    });
    let llm = ScriptedLlm::new(llm_scripts);
    let tts = MockTts::new(tts_scripts);
    let (gateway, out_rx) = GatewaySender::channel(1024);
    let session = Session::new(config, gateway, asr, llm.clone(), tts.clone());
    Harness {
        session,
        out_rx,
        asr_tx,
        llm,
        tts,
        _frame_rx: frame_rx,
    }
}

fn harness(llm_scripts: Vec<Vec<Reply>>, tts_scripts: Vec<Synth>) -> Harness {
    harness_with(SessionConfig::default(), llm_scripts, tts_scripts, false)
}

impl Harness {
    async fn send_final(&self, text: &str) {
        self.asr_tx
            .send(AsrEvent::Final {
                text: text.to_string(),
            })
            .await
            .unwrap();
    }

    async fn next_frame(&mut self) -> OutboundFrame {
        timeout(Duration::from_secs(10), self.out_rx.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("outbound channel closed")
    }

    async fn next_event(&mut self) -> ServerEvent {
        match self.next_frame().await {
            OutboundFrame::Event(event) => event,
            OutboundFrame::Audio(chunk) => panic!("expected event, got audio frame {chunk:?}"),
        }
    }

    async fn expect_status(&mut self, expected: StatusKind) {
        match self.next_event().await {
            ServerEvent::Status { message } if message == expected => {}
            other => panic!("expected status {expected:?}, got {other:?}"),
        }
    }

    async fn expect_ready(&mut self) {
        self.expect_status(StatusKind::Initializing).await;
        self.expect_status(StatusKind::Ready).await;
    }

    /// Collect llm_token text until the next non-token frame, which is
    /// returned alongside the concatenation.
    async fn collect_tokens(&mut self) -> (String, OutboundFrame) {
        let mut text = String::new();
        loop {
            match self.next_frame().await {
                OutboundFrame::Event(ServerEvent::LlmToken { text: t }) => text.push_str(&t),
                other => return (text, other),
            }
        }
    }

    /// Drain audio frames until the next event.
    async fn collect_audio(&mut self, mut first: OutboundFrame) -> (Vec<Bytes>, ServerEvent) {
        let mut chunks = Vec::new();
        loop {
            match first {
                OutboundFrame::Audio(chunk) => chunks.push(chunk),
                OutboundFrame::Event(event) => return (chunks, event),
            }
            first = self.next_frame().await;
        }
    }

    async fn expect_done_and_silence(mut self) {
        loop {
            match self.next_event().await {
                ServerEvent::Done => break,
                // Stray passthrough events before done are fine here.
                _ => continue,
            }
        }
        self.session.finished().await;
        // `done` is the last frame: nothing further may arrive.
        tokio::task::yield_now().await;
        assert!(
            self.out_rx.try_recv().is_err(),
            "frames were emitted after done"
        );
    }
}

// ---------------------------------------------------------------------------
// Scenarios

#[tokio::test]
async fn s1_plain_turn() {
    let mut h = harness(
        vec![
            vec![
                Reply::Token("Yeah, "),
                Reply::Token("this is "),
                Reply::Token("Joe."),
                Reply::Done,
            ],
            vec![Reply::Token("Sure."), Reply::Done],
        ],
        vec![],
    );
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.send_final("Hi, is this Joe?").await;
    assert_eq!(
        h.next_event().await,
        ServerEvent::AsrFinal {
            text: "Hi, is this Joe?".to_string()
        }
    );

    let (tokens, next) = h.collect_tokens().await;
    assert_eq!(tokens, "Yeah, this is Joe.");

    let (chunks, event) = h.collect_audio(next).await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(&chunks[0][..], b"pcm[Yeah, this is Joe.]#1".as_slice());
    assert_eq!(event, ServerEvent::SegmentDone { is_final: false });
    assert_eq!(h.next_event().await, ServerEvent::TurnDone);

    // History after the turn: the committed pair shows up in the next
    // turn's prompt.
    h.send_final("Great, got a minute?").await;
    assert_eq!(
        h.next_event().await,
        ServerEvent::AsrFinal {
            text: "Great, got a minute?".to_string()
        }
    );
    let (_, next) = h.collect_tokens().await;
    let (_, event) = h.collect_audio(next).await;
    assert_eq!(event, ServerEvent::SegmentDone { is_final: false });
    assert_eq!(h.next_event().await, ServerEvent::TurnDone);

    let calls = h.llm.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[1],
        vec![
            ChatMessage::user("Hi, is this Joe?"),
            ChatMessage::assistant("Yeah, this is Joe."),
            ChatMessage::user("Great, got a minute?"),
        ]
    );

    h.session.stop();
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn s2_barge_in_cancels_turn_and_discards_draft() {
    let mut h = harness(
        vec![
            vec![
                Reply::Token("Let me tell you about our data platform."),
                Reply::Done,
            ],
            vec![Reply::Token("Okay, okay!"), Reply::Done],
        ],
        // Turn 1's synthesis stalls mid-stream so the barge-in lands while
        // audio is in flight.
        vec![Synth::HoldAfterFirstChunk, Synth::Normal],
    );
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.send_final("Tell me about your product").await;
    assert!(matches!(h.next_event().await, ServerEvent::AsrFinal { .. }));
    let (tokens, next) = h.collect_tokens().await;
    assert_eq!(tokens, "Let me tell you about our data platform.");
    // First (and only) audio chunk of the doomed turn.
    assert_eq!(
        next,
        OutboundFrame::Audio(Bytes::from(
            "pcm[Let me tell you about our data platform.]#1"
        ))
    );

    // User interrupts.
    h.send_final("Stop, I'm busy.").await;
    assert_eq!(h.next_event().await, ServerEvent::Clear);
    assert_eq!(
        h.next_event().await,
        ServerEvent::AsrFinal {
            text: "Stop, I'm busy.".to_string()
        }
    );

    // The new turn proceeds; no audio from the cancelled turn may appear.
    let (tokens, next) = h.collect_tokens().await;
    assert_eq!(tokens, "Okay, okay!");
    let (chunks, event) = h.collect_audio(next).await;
    assert!(
        chunks
            .iter()
            .all(|c| c.starts_with(b"pcm[Okay, okay!]".as_slice())),
        "cancelled turn's audio leaked: {chunks:?}"
    );
    assert_eq!(event, ServerEvent::SegmentDone { is_final: false });
    assert_eq!(h.next_event().await, ServerEvent::TurnDone);

    // The partial assistant draft never reached history: the second LLM
    // call sees only user content.
    let calls = h.llm.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].iter().all(|m| m.role == Role::User));

    h.session.stop();
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn s3_hangup_with_client_confirmation() {
    let mut h = harness(
        vec![vec![
            Reply::Token("Not interested, bye "),
            Reply::Token("[HAN"),
            Reply::Token("GUP]"),
            Reply::Hold,
        ]],
        vec![],
    );
    h.session.start(Persona::B).unwrap();
    h.expect_ready().await;

    h.send_final("Can I pitch you something?").await;
    assert!(matches!(h.next_event().await, ServerEvent::AsrFinal { .. }));

    // Tokens stop at the sentinel; none of its characters are forwarded.
    let (tokens, next) = h.collect_tokens().await;
    assert_eq!(tokens, "Not interested, bye ");

    let (chunks, event) = h.collect_audio(next).await;
    assert!(!chunks.is_empty());
    assert!(chunks[0].starts_with(b"pcm[Not interested, bye]".as_slice()));
    assert_eq!(event, ServerEvent::SegmentDone { is_final: true });
    assert_eq!(h.next_event().await, ServerEvent::TurnDone);
    assert_eq!(h.next_event().await, ServerEvent::Hangup);

    // Transcripts after hangup are ignored: no asr_final, no new turn.
    h.send_final("Wait, one more thing").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.out_rx.try_recv().is_err());
    assert_eq!(h.llm.calls().len(), 1);

    h.session.final_audio_complete();
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn s3b_hangup_as_entire_output_is_a_silent_final_segment() {
    let mut h = harness(vec![vec![Reply::Token("[HANGUP]"), Reply::Hold]], vec![]);
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.send_final("Hello?").await;
    assert!(matches!(h.next_event().await, ServerEvent::AsrFinal { .. }));

    // No llm_token and no audio: straight to the final segment marker.
    assert_eq!(
        h.next_event().await,
        ServerEvent::SegmentDone { is_final: true }
    );
    assert_eq!(h.next_event().await, ServerEvent::TurnDone);
    assert_eq!(h.next_event().await, ServerEvent::Hangup);
    // Nothing was synthesized for the empty closing.
    assert!(h.tts.spoken().is_empty());

    h.session.final_audio_complete();
    h.expect_done_and_silence().await;
}

#[tokio::test(start_paused = true)]
async fn s4_hangup_timeout_forces_done() {
    let config = SessionConfig {
        // Keep the dead-man far beyond the drain timer under paused time.
        asr_idle: Duration::from_secs(300),
        ..Default::default()
    };
    let mut h = harness_with(
        config,
        vec![vec![Reply::Token("Goodbye [HANGUP]"), Reply::Hold]],
        vec![],
        false,
    );
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.send_final("Hello?").await;
    assert!(matches!(h.next_event().await, ServerEvent::AsrFinal { .. }));
    let (tokens, next) = h.collect_tokens().await;
    assert_eq!(tokens, "Goodbye ");
    let (_, event) = h.collect_audio(next).await;
    assert_eq!(event, ServerEvent::SegmentDone { is_final: true });
    assert_eq!(h.next_event().await, ServerEvent::TurnDone);
    assert_eq!(h.next_event().await, ServerEvent::Hangup);

    // No final_audio_complete ever arrives; the 6 s drain timer fires.
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn s5_user_stop_mid_response() {
    let mut h = harness(
        vec![vec![Reply::Token("So the thing about our platform"), Reply::Hold]],
        vec![],
    );
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.send_final("Go ahead").await;
    assert!(matches!(h.next_event().await, ServerEvent::AsrFinal { .. }));
    assert!(matches!(h.next_event().await, ServerEvent::LlmToken { .. }));

    h.session.stop();
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn s6_asr_open_failure() {
    let mut h = harness_with(SessionConfig::default(), vec![], vec![], true);
    h.session.start(Persona::A).unwrap();

    h.expect_status(StatusKind::Initializing).await;
    h.expect_status(StatusKind::Error).await;
    h.expect_done_and_silence().await;
}

// ---------------------------------------------------------------------------
// Error recovery and idempotence

#[tokio::test]
async fn llm_error_mid_turn_recovers_without_commit() {
    let mut h = harness(
        vec![
            vec![Reply::Token("Hal"), Reply::Error("boom")],
            vec![Reply::Token("Fresh start."), Reply::Done],
        ],
        vec![],
    );
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.send_final("First question").await;
    assert!(matches!(h.next_event().await, ServerEvent::AsrFinal { .. }));
    let (tokens, next) = h.collect_tokens().await;
    assert_eq!(tokens, "Hal");
    // No audio for the failed turn, straight to turn_done.
    assert_eq!(next, OutboundFrame::Event(ServerEvent::TurnDone));
    assert!(h.tts.spoken().is_empty());

    // The session survives and nothing was committed.
    h.send_final("Second question").await;
    assert!(matches!(h.next_event().await, ServerEvent::AsrFinal { .. }));
    let (tokens, next) = h.collect_tokens().await;
    assert_eq!(tokens, "Fresh start.");
    let (_, event) = h.collect_audio(next).await;
    assert_eq!(event, ServerEvent::SegmentDone { is_final: false });
    assert_eq!(h.next_event().await, ServerEvent::TurnDone);

    let calls = h.llm.calls();
    assert!(calls[1].iter().all(|m| m.role == Role::User));

    h.session.stop();
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn tts_error_mid_segment_still_signals_segment_done() {
    let mut h = harness(
        // Two pushes, two segments: the extractor cuts at the rightmost
        // boundary per push.
        vec![vec![Reply::Token("One."), Reply::Token(" Two."), Reply::Done]],
        vec![Synth::ErrorAfterFirstChunk, Synth::Normal],
    );
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.send_final("Count for me").await;
    assert!(matches!(h.next_event().await, ServerEvent::AsrFinal { .. }));
    let (_, next) = h.collect_tokens().await;

    // Segment one dies mid-stream but still completes the protocol.
    let (chunks, event) = h.collect_audio(next).await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(event, ServerEvent::SegmentDone { is_final: false });

    // Segment two synthesizes normally.
    let next = h.next_frame().await;
    let (chunks, event) = h.collect_audio(next).await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(event, ServerEvent::SegmentDone { is_final: false });
    assert_eq!(h.next_event().await, ServerEvent::TurnDone);

    h.session.stop();
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn whitespace_finals_do_not_start_turns() {
    let mut h = harness(vec![], vec![]);
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.send_final("   ").await;
    h.send_final("\n\t").await;
    // Nothing happened: no asr_final, no LLM call.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.out_rx.try_recv().is_err());
    assert!(h.llm.calls().is_empty());

    h.session.stop();
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let mut h = harness(vec![], vec![]);
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.session.stop();
    h.session.stop();
    h.session.stop();

    // Exactly one done, nothing after.
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn second_start_is_rejected() {
    let h = harness(vec![], vec![]);
    h.session.start(Persona::A).unwrap();
    assert!(h.session.start(Persona::B).is_err());
}

#[tokio::test]
async fn vad_and_utterance_events_pass_through() {
    let mut h = harness(vec![], vec![]);
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.asr_tx
        .send(AsrEvent::Vad {
            state: coldcall::core::asr::VadState::Speech,
            prob: 0.9,
        })
        .await
        .unwrap();
    h.asr_tx
        .send(AsrEvent::Utterance {
            phase: UtterancePhase::Begin,
        })
        .await
        .unwrap();

    assert!(matches!(h.next_event().await, ServerEvent::Vad { .. }));
    assert_eq!(
        h.next_event().await,
        ServerEvent::Utterance {
            phase: UtterancePhase::Begin
        }
    );

    h.session.stop();
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn utterance_begin_after_completed_turn_clears_client_playback() {
    let mut h = harness(
        vec![vec![Reply::Token("Short answer."), Reply::Done]],
        vec![],
    );
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.send_final("Quick one?").await;
    assert!(matches!(h.next_event().await, ServerEvent::AsrFinal { .. }));
    let (_, next) = h.collect_tokens().await;
    let (_, event) = h.collect_audio(next).await;
    assert_eq!(event, ServerEvent::SegmentDone { is_final: false });
    assert_eq!(h.next_event().await, ServerEvent::TurnDone);

    // The client may still be draining that audio; speaking again cuts it.
    h.asr_tx
        .send(AsrEvent::Utterance {
            phase: UtterancePhase::Begin,
        })
        .await
        .unwrap();
    assert_eq!(
        h.next_event().await,
        ServerEvent::Utterance {
            phase: UtterancePhase::Begin
        }
    );
    assert_eq!(h.next_event().await, ServerEvent::Clear);

    h.session.stop();
    h.expect_done_and_silence().await;
}

#[tokio::test]
async fn asr_stream_error_ends_session_with_status_error() {
    let mut h = harness(vec![], vec![]);
    h.session.start(Persona::A).unwrap();
    h.expect_ready().await;

    h.asr_tx
        .send(AsrEvent::Error {
            message: "rate limited".to_string(),
        })
        .await
        .unwrap();

    h.expect_status(StatusKind::Error).await;
    h.expect_done_and_silence().await;
}
