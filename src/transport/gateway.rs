//! Outbound serialization point for one WebSocket connection.
//!
//! Every producer (supervisor, turn pipeline, VAD passthrough) holds a
//! [`GatewaySender`]; a single writer task owns the socket sink, so no two
//! tasks ever write to the socket concurrently and frame order on the wire
//! matches channel order. On a write failure the writer notifies the
//! session once and every later send becomes a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, stream::SplitSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::messages::ServerEvent;

/// Channel depth for outbound frames. Large enough that audio bursts never
/// stall the synthesis path on a healthy socket.
pub const OUTBOUND_BUFFER_FRAMES: usize = 1024;

/// One outbound frame: a JSON event or a binary audio chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Event(ServerEvent),
    Audio(Bytes),
}

/// Cloneable handle for publishing outbound frames.
#[derive(Clone)]
pub struct GatewaySender {
    frames: mpsc::Sender<OutboundFrame>,
    failed: Arc<AtomicBool>,
}

impl GatewaySender {
    /// Create a sender plus the receiver half consumed by the writer task
    /// (or by a test harness).
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (frames, rx) = mpsc::channel(buffer);
        (
            Self {
                frames,
                failed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub async fn event(&self, event: ServerEvent) {
        self.send(OutboundFrame::Event(event)).await;
    }

    pub async fn audio(&self, chunk: Bytes) {
        self.send(OutboundFrame::Audio(chunk)).await;
    }

    async fn send(&self, frame: OutboundFrame) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }
        if self.frames.send(frame).await.is_err() {
            // Writer is gone; drop everything from here on.
            if !self.failed.swap(true, Ordering::AcqRel) {
                debug!("outbound gateway closed; discarding further frames");
            }
        }
    }
}

/// Spawn the writer task owning the socket sink.
///
/// The task drains the frame channel until the session signals completion,
/// then flushes whatever is already queued and closes the socket. A write
/// error invokes `on_write_error` exactly once (expected to stop the
/// session) and stops writing.
pub fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<OutboundFrame>,
    finished: CancellationToken,
    on_write_error: impl FnOnce() + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut on_write_error = Some(on_write_error);
        loop {
            let frame = tokio::select! {
                frame = frames.recv() => frame,
                _ = finished.cancelled() => break,
            };
            let Some(frame) = frame else { break };
            if !write_frame(&mut sink, frame).await {
                if let Some(notify) = on_write_error.take() {
                    notify();
                }
                let _ = sink.close().await;
                return;
            }
        }

        // Session finished: flush frames already queued (`done` is in
        // there), then close the socket.
        while let Ok(frame) = frames.try_recv() {
            if !write_frame(&mut sink, frame).await {
                break;
            }
        }
        let _ = sink.close().await;
        debug!("outbound writer finished");
    })
}

async fn write_frame(sink: &mut SplitSink<WebSocket, Message>, frame: OutboundFrame) -> bool {
    let result = match frame {
        OutboundFrame::Event(event) => match serde_json::to_string(&event) {
            Ok(json) => sink.send(Message::Text(json.into())).await,
            Err(e) => {
                error!("failed to serialize outbound event: {e}");
                return true;
            }
        },
        OutboundFrame::Audio(chunk) => sink.send(Message::Binary(chunk)).await,
    };
    if let Err(e) = result {
        warn!("websocket write failed: {e}");
        return false;
    }
    true
}
