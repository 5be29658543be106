//! Bridge management
//!
//! Starts and stops one outbound bridge per bridged room and pumps
//! between the room's peer slot and the bridge task. The registry never
//! references bridges and bridges never reference the registry beyond
//! what flows through these channels; key deliveries arrive as events
//! from the sidecar channel.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use weft_crypto::RoomKey;
use weft_net::{
    spawn_bridge, BackoffPolicy, BridgeCommand, BridgeConfig, BridgeInbound, RoomLink,
    CONNECT_TIMEOUT,
};
use weft_protocol::is_bridged_by_default;

use crate::peer::{peer_channel, PeerId, PeerKind, PeerRx};
use crate::registry::RoomRegistry;
use crate::room::Room;

/// Outbound bridging settings, present only when a relay is configured
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Relay base URL (`ws://` or `wss://`)
    pub relay_base: String,
    /// Optional SOCKS5 proxy for relay connections
    pub proxy: Option<SocketAddr>,
    /// Updates above this size are dropped instead of forwarded
    pub max_update_bytes: usize,
}

struct BridgeEntry {
    commands: mpsc::UnboundedSender<BridgeCommand>,
}

/// Tracks the bridge task for every bridged room
pub struct BridgeManager {
    settings: Option<BridgeSettings>,
    entries: DashMap<String, BridgeEntry>,
}

impl BridgeManager {
    /// Create a manager; `None` settings disable bridging entirely
    pub fn new(settings: Option<BridgeSettings>) -> Self {
        Self {
            settings,
            entries: DashMap::new(),
        }
    }

    /// Whether a bridge is currently running for a room
    pub fn has_bridge(&self, room: &str) -> bool {
        self.entries.contains_key(room)
    }

    /// Start a bridge for a room if it should have one and does not yet
    ///
    /// The bridge is created lazily alongside the room; without a key
    /// it idles until the sidecar delivers one.
    pub fn ensure_bridge(
        self: &Arc<Self>,
        registry: &Arc<RoomRegistry>,
        room: &Arc<Room>,
    ) {
        let Some(settings) = &self.settings else {
            return;
        };
        if !is_bridged_by_default(room.name()) {
            return;
        }
        if self.entries.contains_key(room.name()) {
            return;
        }

        let peer_id = registry.next_peer_id();
        let (peer, peer_rx) = peer_channel(peer_id, PeerKind::Bridge);
        if !room.add_bridge_peer(peer) {
            return;
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = mpsc::channel(4);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        use dashmap::mapref::entry::Entry;
        match self.entries.entry(room.name().to_string()) {
            Entry::Occupied(_) => {
                // Raced with another join; the winner's bridge stands.
                room.remove_peer(peer_id);
                return;
            }
            Entry::Vacant(entry) => {
                entry.insert(BridgeEntry {
                    commands: cmd_tx.clone(),
                });
            }
        }

        let config = BridgeConfig {
            relay_base: settings.relay_base.clone(),
            room: room.name().to_string(),
            proxy: settings.proxy,
            connect_timeout: CONNECT_TIMEOUT,
            max_update_bytes: settings.max_update_bytes,
            backoff: BackoffPolicy::default(),
        };
        let link = RoomLink {
            outbound: out_rx,
            inbound: in_tx,
            state: state_tx,
        };
        let key = registry.keys().get(room.name());
        let (bridge_handle, _bridge_state) = spawn_bridge(config, key, link, cmd_rx);

        tokio::spawn(room_side_pump(
            Arc::clone(self),
            Arc::clone(registry),
            Arc::clone(room),
            peer_id,
            peer_rx,
            out_tx,
            in_rx,
            state_rx,
            cmd_tx,
            bridge_handle,
        ));
        info!(room = %room.name(), "bridge started");
    }

    /// React to a key delivery for a room
    ///
    /// An existing bridge gets the key (and reconnects itself if the
    /// implied token differs from the one it is connected with); a
    /// missing bridge for a bridgeable active room is started.
    pub fn on_key_delivered(
        self: &Arc<Self>,
        registry: &Arc<RoomRegistry>,
        room_name: &str,
        key: RoomKey,
    ) {
        if let Some(entry) = self.entries.get(room_name) {
            let _ = entry.commands.send(BridgeCommand::KeyUpdated(key));
            return;
        }
        if let Some(room) = registry.get(room_name) {
            self.ensure_bridge(registry, &room);
        } else {
            debug!(room = %room_name, "key stored; bridge will start when the room is joined");
        }
    }

    /// Ask every bridge to shut down
    pub fn shutdown(&self) {
        for entry in self.entries.iter() {
            let _ = entry.value().commands.send(BridgeCommand::Shutdown);
        }
    }
}

/// Room-side half of a bridge: forwards fan-out frames to the bridge
/// task, applies remote traffic into the room, and answers state
/// requests during the bridge's sync exchange
#[allow(clippy::too_many_arguments)]
async fn room_side_pump(
    manager: Arc<BridgeManager>,
    registry: Arc<RoomRegistry>,
    room: Arc<Room>,
    bridge_peer_id: PeerId,
    mut peer_rx: PeerRx,
    out_tx: mpsc::UnboundedSender<bytes::Bytes>,
    mut in_rx: mpsc::Receiver<BridgeInbound>,
    mut state_rx: mpsc::Receiver<tokio::sync::oneshot::Sender<Vec<u8>>>,
    cmd_tx: mpsc::UnboundedSender<BridgeCommand>,
    bridge_handle: tokio::task::JoinHandle<()>,
) {
    let close = peer_rx.close_signal();
    loop {
        tokio::select! {
            biased;
            reason = close.fired() => {
                debug!(room = %room.name(), ?reason, "bridge peer slot closed");
                break;
            }
            frame = peer_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if out_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = in_rx.recv() => {
                match inbound {
                    Some(BridgeInbound::Update(update)) => {
                        registry.apply_update(&room, bridge_peer_id, &update);
                    }
                    Some(BridgeInbound::Awareness { client_id, state }) => {
                        if state.is_empty() {
                            registry.remove_awareness(&room, Some(bridge_peer_id), client_id);
                        } else {
                            registry.set_awareness(&room, Some(bridge_peer_id), client_id, &state);
                        }
                    }
                    None => {
                        warn!(room = %room.name(), "bridge task ended");
                        break;
                    }
                }
            }
            request = state_rx.recv() => {
                match request {
                    Some(reply) => {
                        let _ = reply.send(room.encode_state());
                    }
                    None => break,
                }
            }
        }
    }

    let _ = cmd_tx.send(BridgeCommand::Shutdown);
    room.remove_peer(bridge_peer_id);
    // Only unregister our own generation; a newer bridge for the same
    // room name must not be evicted by this teardown.
    manager
        .entries
        .remove_if(room.name(), |_, entry| entry.commands.same_channel(&cmd_tx));
    let _ = bridge_handle.await;
    debug!(room = %room.name(), "bridge stopped");
}
