//! Bounded microphone ingest queue.
//!
//! Capacity is small on purpose: stale audio is worse than lost audio for a
//! live recognizer, so overflow discards the **oldest** frame. Producers
//! never block; the single consumer (the mic pump) awaits on a notify.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default queue depth in frames (~62 ms of PCM per frame).
pub const MIC_QUEUE_FRAMES: usize = 6;

pub struct MicQueue {
    frames: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl MicQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a frame without blocking, discarding the oldest on overflow.
    pub fn push(&self, frame: Bytes) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut frames = self.frames.lock();
            if frames.len() == self.capacity {
                frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Await the next frame; `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            {
                let mut frames = self.frames.lock();
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting frames and wake the consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
