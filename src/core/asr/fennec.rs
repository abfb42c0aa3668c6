//! Fennec streaming ASR client.
//!
//! Auth flow: POST the API key to the token service for a short-lived
//! streaming JWT, then connect the WebSocket with `?streaming_token=<JWT>`
//! (no API-key header on the socket itself). After the `start` config frame
//! the server answers with `ready`; only then may PCM flow. `eos` followed
//! by a close frame ends the stream.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{AsrBackend, AsrError, AsrEvent, AsrHandle, UtterancePhase, VadState};

pub const DEFAULT_STREAM_URL: &str = "wss://api.fennec-asr.com/api/v1/transcribe/stream";
pub const DEFAULT_TOKEN_URL: &str =
    "https://api.fennec-asr.com/api/v1/transcribe/streaming-token";

/// How long to wait for the server `ready` frame after sending `start`.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Uplink channel depth; overflow drops frames at the sender.
const UPLINK_BUFFER_FRAMES: usize = 32;

/// Event channel depth between the reader task and the orchestrator.
const EVENT_BUFFER: usize = 64;

/// Recognizer-side VAD tuning, serialized verbatim into the `start` frame.
#[derive(Debug, Clone, Serialize)]
pub struct VadSettings {
    pub threshold: f32,
    pub min_silence_ms: u32,
    pub speech_pad_ms: u32,
    pub final_silence_s: f32,
    pub start_trigger_ms: u32,
    pub min_voiced_ms: u32,
    pub min_chars: u32,
    pub min_words: u32,
    pub amp_extend: u32,
    pub force_decode_ms: u32,
    /// Request the VAD/utterance event stream alongside transcripts.
    pub events: bool,
    pub event_hz: u8,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            min_silence_ms: 50,
            speech_pad_ms: 350,
            final_silence_s: 0.05,
            start_trigger_ms: 150,
            min_voiced_ms: 100,
            min_chars: 1,
            min_words: 1,
            amp_extend: 600,
            force_decode_ms: 0,
            events: true,
            event_hz: 8,
        }
    }
}

/// Configuration for the Fennec ASR client.
#[derive(Debug, Clone)]
pub struct FennecAsrConfig {
    pub api_key: String,
    pub stream_url: String,
    pub token_url: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub vad: VadSettings,
}

impl Default for FennecAsrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            sample_rate: 16_000,
            channels: 1,
            vad: VadSettings::default(),
        }
    }
}

/// Fennec WebSocket recognizer.
pub struct FennecAsr {
    config: FennecAsrConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// One message from the recognizer; fields are populated per `type`.
#[derive(Debug, Deserialize)]
struct FennecMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
    state: Option<VadState>,
    prob: Option<f32>,
    phase: Option<UtterancePhase>,
    error: Option<String>,
}

impl FennecAsr {
    pub fn new(config: FennecAsrConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Exchange the API key for a short-lived streaming token.
    async fn fetch_streaming_token(&self) -> Result<String, AsrError> {
        if self.config.api_key.is_empty() {
            return Err(AsrError::TokenExchange("missing API key".to_string()));
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .header("X-API-Key", &self.config.api_key)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| AsrError::TokenExchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AsrError::TokenExchange(format!("status {status}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AsrError::TokenExchange(e.to_string()))?;
        body.token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AsrError::TokenExchange("token endpoint returned no token".to_string()))
    }

    fn stream_url_with_token(&self, token: &str) -> Result<String, AsrError> {
        let mut url = Url::parse(&self.config.stream_url)
            .map_err(|e| AsrError::ConnectionFailed(format!("invalid stream url: {e}")))?;
        url.query_pairs_mut().append_pair("streaming_token", token);
        Ok(url.to_string())
    }

    fn start_frame(&self) -> String {
        json!({
            "type": "start",
            "sample_rate": self.config.sample_rate,
            "channels": self.config.channels,
            "single_utterance": false,
            "vad": self.config.vad,
        })
        .to_string()
    }
}

#[async_trait]
impl AsrBackend for FennecAsr {
    async fn open(&self, cancel: CancellationToken) -> Result<AsrHandle, AsrError> {
        let token = self.fetch_streaming_token().await?;
        let url = self.stream_url_with_token(&token)?;
        info!("connecting recognizer stream");

        let (socket, _) = connect_async(&url)
            .await
            .map_err(|e| AsrError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        sink.send(Message::Text(self.start_frame().into()))
            .await
            .map_err(|e| AsrError::ConnectionFailed(e.to_string()))?;

        // Block until the server handshake completes; PCM sent earlier is lost.
        timeout(READY_TIMEOUT, async {
            while let Some(msg) = stream.next().await {
                let msg = msg.map_err(|e| AsrError::ConnectionFailed(e.to_string()))?;
                if let Message::Text(text) = msg
                    && let Ok(parsed) = serde_json::from_str::<FennecMessage>(&text)
                    && parsed.kind.as_deref() == Some("ready")
                {
                    return Ok(());
                }
            }
            Err(AsrError::ConnectionFailed(
                "recognizer closed before ready".to_string(),
            ))
        })
        .await
        .map_err(|_| AsrError::HandshakeTimeout)??;
        info!("recognizer ready");

        let (frame_tx, mut frame_rx) = mpsc::channel::<Bytes>(UPLINK_BUFFER_FRAMES);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        // Uplink writer: forwards PCM until cancelled, then signs off with eos.
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = frame_rx.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = sink.send(Message::Binary(frame)).await {
                                warn!("recognizer uplink send failed: {e}");
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            let _ = sink.send(Message::Text(r#"{"type":"eos"}"#.into())).await;
            let _ = sink.close().await;
            debug!("recognizer uplink closed");
        });

        // Reader: parses transcripts and VAD passthrough into events.
        let reader_cancel = cancel;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_stream_message(&text)
                                && event_tx.send(event).await.is_err()
                            {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            let _ = event_tx.send(AsrEvent::Closed).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("recognizer stream error: {e}");
                            let _ = event_tx
                                .send(AsrEvent::Error { message: e.to_string() })
                                .await;
                            break;
                        }
                    }
                }
            }
            debug!("recognizer reader finished");
        });

        Ok(AsrHandle {
            frames: frame_tx,
            events: event_rx,
        })
    }
}

fn parse_stream_message(text: &str) -> Option<AsrEvent> {
    let parsed: FennecMessage = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("skipping unparseable recognizer message: {e}");
            return None;
        }
    };

    if let Some(error) = parsed.error {
        return Some(AsrEvent::Error { message: error });
    }

    match parsed.kind.as_deref() {
        Some("vad") => {
            let state = parsed.state?;
            Some(AsrEvent::Vad {
                state,
                prob: parsed.prob.unwrap_or(0.0),
            })
        }
        Some("utterance") => parsed.phase.map(|phase| AsrEvent::Utterance { phase }),
        Some("ready") => None,
        Some("complete_thought") | Some("corrected_transcript") | Some("final_transcript")
        | None => {
            let text = parsed.text?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(AsrEvent::Final {
                    text: trimmed.to_string(),
                })
            }
        }
        Some(other) => {
            debug!("ignoring recognizer message type {other:?}");
            None
        }
    }
}
