//! Per-peer outbound queue and close signalling
//!
//! Every connection (and every bridge) holds one peer slot in its room.
//! Fan-out enqueues wire-encoded frames onto the peer's queue; a writer
//! task on the other end drains it. The queue is unbounded in message
//! count but budgeted in bytes: once a slow peer's backlog crosses the
//! budget the whole connection is closed rather than silently dropping
//! individual messages, because a gap in a CRDT update stream is worse
//! than a reconnect.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use weft_protocol::CloseReason;

/// Process-unique peer identifier
pub type PeerId = u64;

/// Byte budget for one peer's outbound backlog
pub const MAX_QUEUED_BYTES: usize = 8 * 1024 * 1024;

/// What kind of participant holds the peer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    /// A local WebSocket client
    Client,
    /// The room's outbound bridge
    Bridge,
}

/// One-shot close reason shared between room, reader, and writer
#[derive(Debug, Default)]
pub struct CloseSignal {
    reason: Mutex<Option<CloseReason>>,
    token: CancellationToken,
}

impl CloseSignal {
    /// Fire the signal; the first reason wins
    pub fn fire(&self, reason: CloseReason) {
        let mut slot = self.reason.lock().expect("close reason lock poisoned");
        if slot.is_none() {
            *slot = Some(reason);
            self.token.cancel();
        }
    }

    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason, once fired
    pub fn reason(&self) -> Option<CloseReason> {
        *self.reason.lock().expect("close reason lock poisoned")
    }

    /// Wait until the signal fires
    pub async fn fired(&self) -> CloseReason {
        self.token.cancelled().await;
        self.reason().unwrap_or(CloseReason::Normal)
    }
}

/// Sending side of a peer slot, held by the room
#[derive(Debug, Clone)]
pub struct PeerHandle {
    /// Peer identifier
    pub id: PeerId,
    /// Participant kind
    pub kind: PeerKind,
    frames: mpsc::UnboundedSender<Bytes>,
    queued: Arc<AtomicUsize>,
    close: Arc<CloseSignal>,
}

/// Receiving side of a peer slot, held by the writer task
#[derive(Debug)]
pub struct PeerRx {
    frames: mpsc::UnboundedReceiver<Bytes>,
    queued: Arc<AtomicUsize>,
    close: Arc<CloseSignal>,
}

/// Create a connected peer handle/receiver pair
pub fn peer_channel(id: PeerId, kind: PeerKind) -> (PeerHandle, PeerRx) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queued = Arc::new(AtomicUsize::new(0));
    let close = Arc::new(CloseSignal::default());
    (
        PeerHandle {
            id,
            kind,
            frames: tx,
            queued: Arc::clone(&queued),
            close: Arc::clone(&close),
        },
        PeerRx { frames: rx, queued, close },
    )
}

impl PeerHandle {
    /// Enqueue a frame for delivery
    ///
    /// Returns `false` if the peer is already closing or just blew its
    /// byte budget (in which case the close signal has been fired with
    /// `BackpressureExceeded`).
    pub fn enqueue(&self, frame: Bytes) -> bool {
        if self.close.is_fired() {
            return false;
        }
        let len = frame.len();
        let backlog = self.queued.fetch_add(len, Ordering::Relaxed) + len;
        if backlog > MAX_QUEUED_BYTES {
            self.queued.fetch_sub(len, Ordering::Relaxed);
            self.close.fire(CloseReason::BackpressureExceeded);
            return false;
        }
        self.frames.send(frame).is_ok()
    }

    /// Begin closing this peer
    pub fn close(&self, reason: CloseReason) {
        self.close.fire(reason);
    }

    /// Shared close signal
    pub fn close_signal(&self) -> Arc<CloseSignal> {
        Arc::clone(&self.close)
    }

    /// Current outbound backlog in bytes
    pub fn queued_bytes(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

impl PeerRx {
    /// Receive the next frame, accounting the backlog down
    pub async fn recv(&mut self) -> Option<Bytes> {
        let frame = self.frames.recv().await?;
        self.queued.fetch_sub(frame.len(), Ordering::Relaxed);
        Some(frame)
    }

    /// Shared close signal
    pub fn close_signal(&self) -> Arc<CloseSignal> {
        Arc::clone(&self.close)
    }

    /// Test helper: whether no frames are queued
    #[cfg(test)]
    pub fn frames_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Test helper: queued frame count
    #[cfg(test)]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_recv_accounting() {
        let (handle, mut rx) = peer_channel(1, PeerKind::Client);
        assert!(handle.enqueue(Bytes::from_static(b"abcd")));
        assert_eq!(handle.queued_bytes(), 4);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(handle.queued_bytes(), 0);
    }

    #[tokio::test]
    async fn test_backpressure_fires_close() {
        let (handle, _rx) = peer_channel(1, PeerKind::Client);
        let chunk = Bytes::from(vec![0u8; 1024 * 1024]);
        for _ in 0..8 {
            assert!(handle.enqueue(chunk.clone()));
        }
        // Ninth megabyte crosses the 8 MB budget
        assert!(!handle.enqueue(chunk.clone()));
        let signal = handle.close_signal();
        assert_eq!(signal.reason(), Some(CloseReason::BackpressureExceeded));
        // Subsequent enqueues are refused outright
        assert!(!handle.enqueue(Bytes::from_static(b"x")));
    }

    #[tokio::test]
    async fn test_first_close_reason_wins() {
        let signal = CloseSignal::default();
        signal.fire(CloseReason::Timeout);
        signal.fire(CloseReason::Normal);
        assert_eq!(signal.reason(), Some(CloseReason::Timeout));
        assert_eq!(signal.fired().await, CloseReason::Timeout);
    }
}
