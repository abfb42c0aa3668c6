//! Axum WebSocket handler for `/ws/agent`.
//!
//! One connection owns one [`Session`]. The socket splits into a writer
//! task (the outbound gateway) and this inbound loop, which demultiplexes
//! frames: JSON text decodes into [`ClientMessage`] (malformed or unknown
//! messages are logged and ignored), binary frames are microphone PCM fed
//! to the session. The loop ends when the client disconnects or the
//! session finishes; teardown always releases the session's external
//! connections.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::asr::FennecAsr;
use crate::core::llm::BasetenChat;
use crate::core::session::{Session, SessionConfig};
use crate::core::tts::InworldTts;
use crate::state::AppState;
use crate::transport::{
    ClientMessage, GatewaySender, OUTBOUND_BUFFER_FRAMES, ServerEvent, StatusKind, gateway,
};

/// Grace period for the session to finish cleanly after the socket closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// WebSocket voice agent handler: upgrades the HTTP connection and runs
/// the per-call session.
pub async fn ws_agent_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("voice agent connection upgrade requested");
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state))
}

async fn handle_agent_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = uuid::Uuid::new_v4();
    info!(%session_id, "voice agent connection established");

    let (sender, mut receiver) = socket.split();
    let (gateway_tx, outbound_rx) = GatewaySender::channel(OUTBOUND_BUFFER_FRAMES);

    let session = Session::new(
        SessionConfig::default(),
        gateway_tx.clone(),
        Arc::new(FennecAsr::new(state.config.asr_config(), state.http.clone())),
        Arc::new(BasetenChat::new(state.config.llm_config(), state.http.clone())),
        Arc::new(InworldTts::new(state.config.tts_config(), state.http.clone())),
    );

    let writer = {
        let session = session.clone();
        gateway::spawn_writer(sender, outbound_rx, session.finished_token(), move || {
            warn!(%session_id, "socket write failed; stopping session");
            session.stop();
        })
    };

    gateway_tx
        .event(ServerEvent::Status {
            message: StatusKind::Connected,
        })
        .await;

    loop {
        tokio::select! {
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Start { persona }) => {
                            if let Err(e) = session.start(persona) {
                                warn!(%session_id, "ignoring start: {e}");
                            }
                        }
                        Ok(ClientMessage::Stop) => {
                            if session.is_started() {
                                session.stop();
                            } else {
                                // Nothing running; answer and close directly.
                                gateway_tx.event(ServerEvent::Done).await;
                                break;
                            }
                        }
                        Ok(ClientMessage::FinalAudioComplete) => session.final_audio_complete(),
                        Err(e) => debug!(%session_id, "ignoring malformed client message: {e}"),
                    }
                }
                Some(Ok(Message::Binary(frame))) => session.feed_audio(frame),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!(%session_id, "connection closed by client");
                    break;
                }
                Some(Err(e)) => {
                    warn!(%session_id, "websocket error: {e}");
                    break;
                }
            },
            _ = session.finished() => break,
        }
    }

    // Give a started session a moment to emit `done` and release its
    // adapters, then hard-stop whatever is left.
    session.stop();
    if session.is_started() {
        let _ = timeout(SHUTDOWN_GRACE, session.finished()).await;
    }
    session.abort();
    let _ = writer.await;
    info!(%session_id, "voice agent connection terminated");
}
