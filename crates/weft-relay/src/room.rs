//! A single collaboration room
//!
//! All mutable room state — document, awareness map, peer set, auth
//! token slot, activity clock, flush schedule — sits behind one mutex.
//! Fan-out happens under that mutex: enqueueing onto a peer queue is a
//! non-blocking atomic-and-send, so holding the lock across the loop is
//! what gives per-origin FIFO ordering its guarantee. Cross-room
//! operations never contend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::watch;
use tracing::debug;

use weft_protocol::{CloseReason, DocState, Frame, SyncMessage};
use weft_store::FlushSchedule;

use crate::auth::{self, AuthDecision};
use crate::peer::{PeerHandle, PeerId, PeerKind};

/// Outcome of applying one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Update was new; it has been applied and fanned out
    Applied,
    /// Identical update seen before; nothing changed
    Duplicate,
    /// Update exceeded the registry's size cap and was dropped
    Oversized,
    /// Room was already destroyed; update dropped
    RoomGone,
}

/// What a successful join hands back to the connection
#[derive(Debug)]
pub struct JoinAccept {
    /// SyncStep1 frame carrying the full document state
    pub state_frame: Bytes,
    /// Current awareness entries, one frame per present client
    pub awareness_frames: Vec<Bytes>,
}

/// Why a join was refused by the room itself
pub type JoinReject = CloseReason;

#[derive(Debug)]
struct RoomState {
    doc: DocState,
    awareness: HashMap<u32, Bytes>,
    peers: HashMap<PeerId, PeerHandle>,
    auth_token: Option<Vec<u8>>,
    last_activity: Instant,
    flush: FlushSchedule,
    pending_destroy: bool,
    destroyed: bool,
}

/// One active room
#[derive(Debug)]
pub struct Room {
    name: String,
    state: Mutex<RoomState>,
    dirty_tx: watch::Sender<()>,
}

impl Room {
    /// Create a room, restored or empty
    pub fn new(
        name: String,
        doc: DocState,
        flush: FlushSchedule,
        dirty_tx: watch::Sender<()>,
    ) -> Self {
        Self {
            name,
            state: Mutex::new(RoomState {
                doc,
                awareness: HashMap::new(),
                peers: HashMap::new(),
                auth_token: None,
                last_activity: Instant::now(),
                flush,
                pending_destroy: false,
                destroyed: false,
            }),
            dirty_tx,
        }
    }

    /// Room name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RoomState> {
        self.state.lock().expect("room state lock poisoned")
    }

    /// Gate a client join, registering a first-presented token
    ///
    /// On success the peer is in the room and the returned frames are
    /// what the connection must deliver first: SyncStep1 with the full
    /// document state, then the current awareness entries.
    pub fn try_join(
        &self,
        supplied: Option<&[u8]>,
        peer: PeerHandle,
    ) -> Result<JoinAccept, JoinReject> {
        let mut state = self.lock();
        if state.destroyed {
            return Err(CloseReason::RoomClosed);
        }

        match auth::evaluate(state.auth_token.as_deref(), supplied) {
            AuthDecision::Allow => {}
            AuthDecision::AllowAndRegister => {
                // First writer claims the slot; only a real token registers.
                state.auth_token = supplied.map(|t| t.to_vec());
                debug!(room = %self.name, "auth token registered");
            }
            AuthDecision::Reject(reason) => return Err(reason),
        }

        state.last_activity = Instant::now();
        state.pending_destroy = false;
        state.peers.insert(peer.id, peer);

        let state_frame = Bytes::from(Frame::Sync(SyncMessage::Step1(state.doc.encode())).encode());
        let awareness_frames = state
            .awareness
            .iter()
            .map(|(&client_id, payload)| {
                Bytes::from(
                    Frame::Awareness {
                        client_id,
                        state: payload.to_vec(),
                    }
                    .encode(),
                )
            })
            .collect();

        Ok(JoinAccept {
            state_frame,
            awareness_frames,
        })
    }

    /// Attach the room's bridge peer; no auth, no sync preamble
    /// (the bridge syncs against the *remote* relay, not against us)
    pub fn add_bridge_peer(&self, peer: PeerHandle) -> bool {
        let mut state = self.lock();
        if state.destroyed {
            return false;
        }
        state.peers.insert(peer.id, peer);
        true
    }

    /// Apply one opaque update and fan it out to every other peer
    pub fn apply_update(&self, origin: PeerId, update: &[u8]) -> UpdateOutcome {
        let mut state = self.lock();
        if state.destroyed {
            return UpdateOutcome::RoomGone;
        }

        let now = Instant::now();
        state.last_activity = now;
        if !state.doc.apply(update) {
            return UpdateOutcome::Duplicate;
        }
        state.flush.mark_dirty(now);

        let frame = Bytes::from(Frame::Sync(SyncMessage::Update(update.to_vec())).encode());
        fanout(&state, Some(origin), &frame);
        drop(state);

        let _ = self.dirty_tx.send(());
        UpdateOutcome::Applied
    }

    /// Replace a client's awareness entry and relay it
    pub fn set_awareness(&self, origin: Option<PeerId>, client_id: u32, payload: &[u8]) {
        let mut state = self.lock();
        if state.destroyed {
            return;
        }
        state.last_activity = Instant::now();
        state
            .awareness
            .insert(client_id, Bytes::copy_from_slice(payload));

        let frame = Bytes::from(
            Frame::Awareness {
                client_id,
                state: payload.to_vec(),
            }
            .encode(),
        );
        fanout(&state, origin, &frame);
    }

    /// Erase a client's awareness entry and fan out the tombstone
    pub fn remove_awareness(&self, origin: Option<PeerId>, client_id: u32) {
        let mut state = self.lock();
        if state.destroyed {
            return;
        }
        if state.awareness.remove(&client_id).is_none() {
            return;
        }
        state.last_activity = Instant::now();

        let frame = Bytes::from(
            Frame::Awareness {
                client_id,
                state: Vec::new(),
            }
            .encode(),
        );
        fanout(&state, origin, &frame);
    }

    /// Full encoded document state
    pub fn encode_state(&self) -> Vec<u8> {
        self.lock().doc.encode()
    }

    /// Take a snapshot for flushing, clearing the dirty marks
    ///
    /// Returns `None` when nothing is dirty. Encoding happens under the
    /// lock but encryption and disk I/O happen at the caller, unlocked,
    /// so flushes cannot starve `apply_update`.
    pub fn begin_flush(&self) -> Option<Vec<u8>> {
        let mut state = self.lock();
        if !state.flush.is_dirty() {
            return None;
        }
        state.flush.flushed();
        Some(state.doc.encode())
    }

    /// Re-arm the flush schedule after a failed write so the next
    /// debounce retries
    pub fn flush_failed(&self) {
        self.lock().flush.mark_dirty(Instant::now());
        let _ = self.dirty_tx.send(());
    }

    /// Current flush deadline, if anything is dirty
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.lock().flush.deadline()
    }

    /// Whether unflushed updates exist
    pub fn is_dirty(&self) -> bool {
        self.lock().flush.is_dirty()
    }

    /// Remove a departing peer. Returns the number of client peers left.
    pub fn remove_peer(&self, id: PeerId) -> usize {
        let mut state = self.lock();
        state.peers.remove(&id);
        count_clients(&state)
    }

    /// Number of connected client peers (the bridge does not count
    /// toward liveness)
    pub fn client_count(&self) -> usize {
        count_clients(&self.lock())
    }

    /// Ask to destroy once the pending flush lands. Returns `true` if
    /// the room is clean and can be destroyed right now instead.
    pub fn request_destroy_when_clean(&self) -> bool {
        let mut state = self.lock();
        if state.flush.is_dirty() {
            state.pending_destroy = true;
            false
        } else {
            true
        }
    }

    /// Whether a deferred destroy is now actionable (flush landed, no
    /// clients returned in the meantime)
    pub fn take_pending_destroy(&self) -> bool {
        let mut state = self.lock();
        if state.pending_destroy && !state.flush.is_dirty() && count_clients(&state) == 0 {
            state.pending_destroy = false;
            return true;
        }
        false
    }

    /// Whether the stale sweep should destroy this room
    pub fn sweepable(&self, now: Instant, idle_timeout: Duration) -> bool {
        let state = self.lock();
        count_clients(&state) == 0 && now.duration_since(state.last_activity) > idle_timeout
    }

    /// Tear the room down: clear the auth slot and awareness map, and
    /// hand every peer back so the caller can close them outside the
    /// lock. Idempotent.
    pub fn mark_destroyed(&self) -> Vec<PeerHandle> {
        let mut state = self.lock();
        if state.destroyed {
            return Vec::new();
        }
        state.destroyed = true;
        state.auth_token = None;
        state.awareness.clear();
        state.peers.drain().map(|(_, peer)| peer).collect()
    }

    /// Registered auth token, for tests and diagnostics
    #[cfg(test)]
    pub fn registered_token(&self) -> Option<Vec<u8>> {
        self.lock().auth_token.clone()
    }
}

fn count_clients(state: &RoomState) -> usize {
    state
        .peers
        .values()
        .filter(|p| p.kind == PeerKind::Client)
        .count()
}

// Enqueue failures fire the peer's own close signal; the room never
// unregisters a peer here, the owning connection task does.
fn fanout(state: &RoomState, origin: Option<PeerId>, frame: &Bytes) {
    for peer in state.peers.values() {
        if origin != Some(peer.id) {
            peer.enqueue(frame.clone());
        }
    }
}
