//! Inworld streaming TTS client.
//!
//! `POST /tts/v1/voice:stream` answers with newline-delimited JSON; each
//! line carries a base64 `result.audioContent` holding a complete LINEAR16
//! WAV whose 44-byte header is stripped before the raw PCM is forwarded.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{TtsBackend, TtsError};

pub const DEFAULT_SYNTH_URL: &str = "https://api.inworld.ai/tts/v1/voice:stream";

/// Per-line WAV container header length; the payload after it is raw PCM.
const WAV_HEADER_LEN: usize = 44;

/// Audio chunk channel depth; chunks are forwarded as fast as they decode.
const AUDIO_CHANNEL_SIZE: usize = 32;

/// Configuration for the Inworld TTS client.
#[derive(Debug, Clone)]
pub struct InworldTtsConfig {
    /// Pre-encoded `user:secret` pair for the Basic authorization header.
    pub api_key_basic_b64: String,
    pub model_id: String,
    pub voice_id: String,
    pub sample_rate: u32,
    pub synth_url: String,
}

impl Default for InworldTtsConfig {
    fn default() -> Self {
        Self {
            api_key_basic_b64: String::new(),
            model_id: "inworld-tts-1".to_string(),
            voice_id: "Olivia".to_string(),
            sample_rate: 48_000,
            synth_url: DEFAULT_SYNTH_URL.to_string(),
        }
    }
}

/// Inworld streaming synthesizer.
pub struct InworldTts {
    config: InworldTtsConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    result: Option<StreamResult>,
}

#[derive(Debug, Deserialize)]
struct StreamResult {
    #[serde(rename = "audioContent")]
    audio_content: Option<String>,
}

impl InworldTts {
    pub fn new(config: InworldTtsConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl TtsBackend for InworldTts {
    async fn synthesize(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<Bytes, TtsError>>, TtsError> {
        let (chunk_tx, chunk_rx) = mpsc::channel(AUDIO_CHANNEL_SIZE);
        if text.trim().is_empty() {
            return Ok(chunk_rx);
        }

        let payload = json!({
            "text": text,
            "voiceId": self.config.voice_id,
            "modelId": self.config.model_id,
            "temperature": 0.85,
            "audio_config": {
                "audio_encoding": "LINEAR16",
                "sample_rate_hertz": self.config.sample_rate,
            },
        });

        let response = self
            .http
            .post(&self.config.synth_url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", self.config.api_key_basic_b64),
            )
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let snippet = String::from_utf8_lossy(&body[..body.len().min(256)]).into_owned();
            return Err(TtsError::BadStatus {
                status: status.as_u16(),
                body: snippet,
            });
        }

        tokio::spawn(read_audio_stream(response, chunk_tx, cancel));
        Ok(chunk_rx)
    }
}

/// Decodes newline-delimited JSON audio chunks until the body ends,
/// cancellation, or a transport error.
async fn read_audio_stream(
    response: reqwest::Response,
    chunk_tx: mpsc::Sender<Result<Bytes, TtsError>>,
    cancel: CancellationToken,
) {
    let mut body = response.bytes_stream();
    let mut pending: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("tts stream cancelled");
                return;
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    pending.extend_from_slice(&bytes);
                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        if let Some(pcm) = decode_audio_line(&line)
                            && chunk_tx.send(Ok(pcm)).await.is_err()
                        {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("tts stream transport error: {e}");
                    let _ = chunk_tx
                        .send(Err(TtsError::RequestFailed(e.to_string())))
                        .await;
                    return;
                }
                None => return,
            }
        }
    }
}

/// Parses one JSON line into raw PCM, stripping the WAV container header.
fn decode_audio_line(line: &[u8]) -> Option<Bytes> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    let parsed: StreamLine = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("skipping unparseable tts line: {e}");
            return None;
        }
    };
    let audio_b64 = parsed.result?.audio_content?;
    let wav = match BASE64.decode(audio_b64) {
        Ok(wav) => wav,
        Err(e) => {
            debug!("skipping undecodable tts chunk: {e}");
            return None;
        }
    };
    if wav.len() <= WAV_HEADER_LEN {
        return None;
    }
    Some(Bytes::copy_from_slice(&wav[WAV_HEADER_LEN..]))
}
