//! Room registry
//!
//! Owns every active room: lazy creation with exactly-once restore from
//! the snapshot store, the per-room flusher task driving the debounced
//! flush, the stale sweep, and destruction. Destruction is the single
//! place where a room's auth slot is cleared — the sweep destroys
//! through the same path, so an idle room can never strand a stale
//! token that blocks future joiners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use weft_protocol::{validate_room_name, CloseReason, DocState};
use weft_store::{FlushSchedule, KeyRing, SnapshotStore};

use crate::error::JoinError;
use crate::peer::PeerId;
use crate::room::{Room, UpdateOutcome};

/// Registry tuning, derived from the daemon config
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Cap on simultaneously active rooms
    pub max_rooms: usize,
    /// Cap on a single update in bytes
    pub max_update_bytes: usize,
    /// Debounce window between the last update and a flush
    pub debounce: Duration,
    /// Ceiling between the first unflushed update and a forced flush
    pub ceiling: Duration,
    /// Inactivity span after which an empty room is swept
    pub idle_timeout: Duration,
}

struct RoomEntry {
    room: Arc<Room>,
    flusher: CancellationToken,
}

/// Process-wide room registry
pub struct RoomRegistry {
    settings: RegistrySettings,
    rooms: DashMap<String, RoomEntry>,
    store: Option<Arc<SnapshotStore>>,
    keys: Arc<KeyRing>,
    next_peer_id: AtomicU64,
}

impl RoomRegistry {
    /// Create a registry; `store` is `None` when persistence is disabled
    pub fn new(
        settings: RegistrySettings,
        store: Option<Arc<SnapshotStore>>,
        keys: Arc<KeyRing>,
    ) -> Self {
        Self {
            settings,
            rooms: DashMap::new(),
            store,
            keys,
            next_peer_id: AtomicU64::new(1),
        }
    }

    /// Allocate a process-unique peer id
    pub fn next_peer_id(&self) -> PeerId {
        self.next_peer_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Key ring shared with the sidecar channel
    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Look up an active room
    pub fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.get(name).map(|e| e.room.clone())
    }

    /// Number of active rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Fetch or lazily create a room, restoring persisted state the
    /// first time the name is seen this process. Idempotent per name.
    pub async fn join_or_create(self: &Arc<Self>, name: &str) -> Result<Arc<Room>, JoinError> {
        validate_room_name(name).map_err(|_| JoinError::BadName)?;

        if let Some(entry) = self.rooms.get(name) {
            return Ok(entry.room.clone());
        }
        // Checked before the entry lock; the worst case of the gap is
        // one room over the cap, which a relay can absorb.
        if self.rooms.len() >= self.settings.max_rooms {
            return Err(JoinError::AtCapacity);
        }

        // Restoration does file I/O, so it happens outside the map
        // lock; if two joins race, the entry API picks the winner and
        // the loser's restored copy is dropped.
        let doc = self.restore_doc(name).await;
        let (dirty_tx, dirty_rx) = watch::channel(());
        let room = Arc::new(Room::new(
            name.to_string(),
            doc,
            FlushSchedule::new(self.settings.debounce, self.settings.ceiling),
            dirty_tx,
        ));

        match self.rooms.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().room.clone()),
            Entry::Vacant(entry) => {
                let cancel = CancellationToken::new();
                entry.insert(RoomEntry {
                    room: Arc::clone(&room),
                    flusher: cancel.clone(),
                });
                tokio::spawn(flusher_task(
                    Arc::clone(self),
                    Arc::clone(&room),
                    dirty_rx,
                    cancel,
                ));
                info!(room = %name, "room created");
                Ok(room)
            }
        }
    }

    async fn restore_doc(&self, name: &str) -> DocState {
        let Some(store) = &self.store else {
            return DocState::new();
        };
        let Some(key) = self.keys.get(name) else {
            debug!(room = %name, "no key for room; starting empty");
            return DocState::new();
        };
        match store.read(name, &key).await {
            Ok(Some(plaintext)) => match DocState::decode(&plaintext) {
                Ok(doc) => {
                    info!(room = %name, updates = doc.update_count(), "room state restored");
                    doc
                }
                Err(e) => {
                    error!(room = %name, error = %e, "snapshot decodes but is corrupt; leaving room empty");
                    DocState::new()
                }
            },
            Ok(None) => DocState::new(),
            // Decrypt/read failure never deletes the file; an operator
            // with the right key can still recover it.
            Err(e) => {
                error!(room = %name, error = %e, "failed to restore snapshot; leaving room empty");
                DocState::new()
            }
        }
    }

    /// Apply an update through the registry's size gate
    ///
    /// Oversized updates are dropped and logged without disconnecting
    /// the origin; wire-level oversize is already a protocol violation
    /// at the connection layer, so this gate mostly guards the bridge
    /// and any future non-WebSocket feeds.
    pub fn apply_update(&self, room: &Room, origin: PeerId, update: &[u8]) -> UpdateOutcome {
        if update.len() > self.settings.max_update_bytes {
            warn!(
                room = %room.name(),
                origin,
                len = update.len(),
                max = self.settings.max_update_bytes,
                "oversized update rejected"
            );
            return UpdateOutcome::Oversized;
        }
        room.apply_update(origin, update)
    }

    /// Replace a client's awareness entry and relay it
    pub fn set_awareness(&self, room: &Room, origin: Option<PeerId>, client_id: u32, state: &[u8]) {
        room.set_awareness(origin, client_id, state);
    }

    /// Erase a client's awareness entry and fan out the tombstone
    pub fn remove_awareness(&self, room: &Room, origin: Option<PeerId>, client_id: u32) {
        room.remove_awareness(origin, client_id);
    }

    /// Flush a room's snapshot if dirty
    ///
    /// The snapshot is taken under the room lock; encryption and disk
    /// I/O run unlocked. Failure re-arms the schedule so the next
    /// debounce retries — updates are never dropped over persistence.
    pub async fn flush_room(&self, room: &Arc<Room>) {
        let Some(snapshot) = room.begin_flush() else {
            return;
        };
        let Some(store) = &self.store else {
            return;
        };
        let Some(key) = self.keys.get(room.name()) else {
            debug!(room = %room.name(), "no key; snapshot not persisted");
            return;
        };
        if let Err(e) = store.write(room.name(), &key, snapshot).await {
            error!(room = %room.name(), error = %e, "snapshot flush failed; will retry");
            room.flush_failed();
        }
    }

    /// A client connection closed; destroy the room if it was the last
    /// one and nothing is pending, or defer to the flusher if a flush
    /// is still owed
    pub async fn client_departed(&self, room: &Arc<Room>) {
        if room.client_count() > 0 {
            return;
        }
        if room.request_destroy_when_clean() {
            self.destroy_room(room).await;
        }
    }

    /// Destroy a room: final flush, close every peer with `RoomClosed`,
    /// clear the auth slot, remove from the registry. Idempotent, and a
    /// no-op when the name has already been re-registered by a newer
    /// room generation.
    pub async fn destroy_room(&self, room: &Arc<Room>) {
        let Some((_, entry)) = self
            .rooms
            .remove_if(room.name(), |_, entry| Arc::ptr_eq(&entry.room, room))
        else {
            return;
        };
        entry.flusher.cancel();
        self.flush_room(room).await;
        for peer in room.mark_destroyed() {
            peer.close(CloseReason::RoomClosed);
        }
        info!(room = %room.name(), "room destroyed");
    }

    /// Destroy whatever room currently holds a name
    pub async fn destroy_by_name(&self, name: &str) {
        if let Some(room) = self.get(name) {
            self.destroy_room(&room).await;
        }
    }

    /// Periodic stale-room sweep
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let stale: Vec<Arc<Room>> = registry
                            .rooms
                            .iter()
                            .filter(|e| e.value().room.sweepable(now, registry.settings.idle_timeout))
                            .map(|e| Arc::clone(&e.value().room))
                            .collect();
                        for room in stale {
                            info!(room = %room.name(), "destroying stale room");
                            registry.destroy_room(&room).await;
                        }
                    }
                }
            }
        })
    }

    /// Restore every persisted room whose key is known
    ///
    /// Called once at startup. Rooms come up idle and are swept later
    /// if nobody joins; their snapshots stay on disk either way.
    pub async fn restore_all(self: &Arc<Self>) {
        let Some(store) = &self.store else {
            return;
        };
        let rooms = match store.scan().await {
            Ok(rooms) => rooms,
            Err(e) => {
                error!(error = %e, "failed to scan persistence directory");
                return;
            }
        };
        for name in rooms {
            if self.keys.get(&name).is_none() {
                debug!(room = %name, "persisted room has no key yet; deferring restore");
                continue;
            }
            if let Err(e) = self.join_or_create(&name).await {
                warn!(room = %name, ?e, "skipping persisted room");
            }
        }
    }

    /// Destroy every room (final flushes included)
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|e| Arc::clone(&e.room)).collect();
        for room in rooms {
            self.destroy_room(&room).await;
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

/// Per-room flusher: waits for the debounce deadline, flushes, and
/// performs a deferred destroy once the last-client flush has landed
async fn flusher_task(
    registry: Arc<RoomRegistry>,
    room: Arc<Room>,
    mut dirty_rx: watch::Receiver<()>,
    cancel: CancellationToken,
) {
    loop {
        let deadline = room.flush_deadline();
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = dirty_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                // New dirty mark; recompute the deadline.
            }
            _ = sleep_until_opt(deadline) => {
                registry.flush_room(&room).await;
                if room.take_pending_destroy() {
                    registry.destroy_room(&room).await;
                    return;
                }
            }
        }
    }
}
