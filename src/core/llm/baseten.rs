//! Baseten chat client (OpenAI-compatible `/chat/completions`).
//!
//! Streaming replies arrive as server-sent events; each `data:` line carries
//! a JSON chunk with a `choices[0].delta.content` fragment, terminated by a
//! literal `[DONE]` line. The reader task parses the body incrementally and
//! publishes [`LlmEvent`]s; dropping the receiver or cancelling the token
//! aborts the underlying HTTP stream.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ChatMessage, LlmBackend, LlmError, LlmEvent, Persona};

/// Channel buffer for token delivery; tokens are small and consumed fast.
const TOKEN_CHANNEL_SIZE: usize = 64;

/// Configuration for the Baseten chat client.
#[derive(Debug, Clone)]
pub struct BasetenConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// OpenAI-compatible streaming chat client.
#[derive(Clone)]
pub struct BasetenChat {
    config: BasetenConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl BasetenChat {
    pub fn new(config: BasetenConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Single-shot completion used by the feedback evaluator.
    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1,
            "max_tokens": 500,
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            return Err(LlmError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        let completion: Completion = response
            .json()
            .await
            .map_err(|e| LlmError::Protocol(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyCompletion)
    }
}

#[async_trait]
impl LlmBackend for BasetenChat {
    async fn stream_reply(
        &self,
        persona: Persona,
        history: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<LlmEvent>, LlmError> {
        let mut messages = vec![json!({"role": "system", "content": persona.system_prompt()})];
        messages.extend(
            history
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content})),
        );

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
            "top_p": 1,
            "max_tokens": 256,
            "temperature": 0.2,
            "presence_penalty": 0,
            "frequency_penalty": 0,
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            return Err(LlmError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        let (token_tx, token_rx) = mpsc::channel(TOKEN_CHANNEL_SIZE);
        tokio::spawn(read_token_stream(response, token_tx, cancel));
        Ok(token_rx)
    }
}

/// Reads the SSE body line by line and publishes tokens until `[DONE]`,
/// cancellation, or a transport error.
async fn read_token_stream(
    response: reqwest::Response,
    token_tx: mpsc::Sender<LlmEvent>,
    cancel: CancellationToken,
) {
    let mut body = response.bytes_stream();
    let mut pending: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("llm token stream cancelled");
                return;
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    pending.extend_from_slice(&bytes);
                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        match parse_sse_line(&line) {
                            SseLine::Token(token) => {
                                if token_tx.send(LlmEvent::Token(token)).await.is_err() {
                                    return;
                                }
                            }
                            SseLine::Done => {
                                let _ = token_tx.send(LlmEvent::Done).await;
                                return;
                            }
                            SseLine::Skip => {}
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("llm stream transport error: {e}");
                    let _ = token_tx.send(LlmEvent::Error(e.to_string())).await;
                    return;
                }
                None => {
                    // Stream ended without an explicit [DONE]; treat as clean.
                    let _ = token_tx.send(LlmEvent::Done).await;
                    return;
                }
            }
        }
    }
}

enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &[u8]) -> SseLine {
    let Ok(text) = std::str::from_utf8(line) else {
        return SseLine::Skip;
    };
    let Some(data) = text.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
            Some(content) if !content.is_empty() => SseLine::Token(content),
            _ => SseLine::Skip,
        },
        Err(e) => {
            debug!("skipping unparseable sse line: {e}");
            SseLine::Skip
        }
    }
}

async fn read_error_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            let snippet = &bytes[..bytes.len().min(256)];
            String::from_utf8_lossy(snippet).into_owned()
        }
        Err(_) => String::from("<unreadable body>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::post};

    fn sse_body(tokens: &[&str]) -> String {
        let mut body = String::new();
        for token in tokens {
            let chunk = json!({"choices": [{"delta": {"content": token}}]});
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn serve_once(body: String) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let body = body.clone();
                async move {
                    (
                        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                        body,
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    fn client(base_url: String) -> BasetenChat {
        BasetenChat::new(
            BasetenConfig {
                api_key: "test-key".to_string(),
                base_url,
                model: "test-model".to_string(),
            },
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn streams_tokens_until_done() {
        let base = serve_once(sse_body(&["Yeah, ", "this is ", "Joe."])).await;
        let chat = client(base);

        let history = vec![ChatMessage::user("Hi, is this Joe?")];
        let mut rx = chat
            .stream_reply(Persona::A, &history, CancellationToken::new())
            .await
            .unwrap();

        let mut collected = String::new();
        loop {
            match rx.recv().await {
                Some(LlmEvent::Token(t)) => collected.push_str(&t),
                Some(LlmEvent::Done) => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(collected, "Yeah, this is Joe.");
    }

    #[tokio::test]
    async fn bad_status_is_reported() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "no") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let chat = client(format!("http://{addr}/v1"));
        let err = chat
            .stream_reply(Persona::A, &[], CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            LlmError::BadStatus { status, .. } => assert_eq!(status, 401),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sse_line_parsing() {
        assert!(matches!(parse_sse_line(b"data: [DONE]\n"), SseLine::Done));
        assert!(matches!(parse_sse_line(b"\n"), SseLine::Skip));
        assert!(matches!(parse_sse_line(b": keep-alive\n"), SseLine::Skip));
        let line = br#"data: {"choices":[{"delta":{"content":"hi"}}]}"#;
        match parse_sse_line(line) {
            SseLine::Token(t) => assert_eq!(t, "hi"),
            _ => panic!("expected token"),
        }
    }
}
