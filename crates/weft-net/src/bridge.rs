//! Outbound relay bridge
//!
//! One bridge per room that should be replicated to an external relay.
//! The bridge behaves as an ordinary protocol client against the remote
//! server: it completes the sync exchange, forwards local updates
//! outbound, and hands remote traffic back to the room.
//!
//! The bridge never owns room state. It talks to its room through the
//! typed channels in [`RoomLink`] and receives key deliveries and
//! lifecycle commands through a command channel; no object references
//! cross the boundary in either direction.
//!
//! Connection is gated on key availability: without a room key there is
//! no token, and the bridge waits instead of improvising one from any
//! process-wide secret. When a key arrives, the token it implies is
//! compared against the token of the live connection — not merely
//! against whether a connection exists — and a mismatch forces a
//! reconnect with the correct token.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use weft_crypto::{token_for_room, RoomKey};
use weft_protocol::frame::KIND_SYNC;
use weft_protocol::sync::{decode_update_batch, STEP_UPDATE};
use weft_protocol::{Frame, FrameLimits, SyncMessage, CLOSE_AUTH};

use crate::backoff::BackoffPolicy;
use crate::dial::{dial, WsSink, WsSource};

/// Default connect deadline for one attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Bridge configuration for one room
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Relay base URL, e.g. `wss://relay.example`
    pub relay_base: String,
    /// Room this bridge replicates
    pub room: String,
    /// Optional SOCKS5 proxy for the outbound connection
    pub proxy: Option<SocketAddr>,
    /// Deadline for a single connect attempt
    pub connect_timeout: Duration,
    /// Updates larger than this are dropped, not forwarded
    pub max_update_bytes: usize,
    /// Reconnect policy
    pub backoff: BackoffPolicy,
}

/// Channels tying a bridge to its room
#[derive(Debug)]
pub struct RoomLink {
    /// Wire-encoded frames the room fans out to this bridge
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
    /// Remote traffic to apply into the room
    pub inbound: mpsc::Sender<BridgeInbound>,
    /// Requests for the room's encoded document state
    pub state: mpsc::Sender<oneshot::Sender<Vec<u8>>>,
}

/// Remote traffic handed back to the room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeInbound {
    /// One opaque update from the remote relay
    Update(Vec<u8>),
    /// Presence state relayed from the remote side
    Awareness {
        /// Remote client's awareness id
        client_id: u32,
        /// Opaque presence payload; empty is the tombstone
        state: Vec<u8>,
    },
}

/// Lifecycle commands for a running bridge
#[derive(Debug)]
pub enum BridgeCommand {
    /// A (possibly new) key for this room was delivered
    KeyUpdated(RoomKey),
    /// Operator asked a paused or auth-rejected bridge to try again
    Resume,
    /// Tear the bridge down
    Shutdown,
}

/// Observable bridge connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No connection and no attempt in flight
    Disconnected,
    /// Connect attempt in flight
    Connecting,
    /// Live connection to the remote relay
    Connected,
    /// Retry budget exhausted; waiting for a key delivery or resume
    Paused,
    /// Remote rejected the token with close code 4403; terminal until
    /// a key delivery or explicit resume
    AuthRejected,
}

/// How one live connection ended
enum PumpExit {
    Disconnected,
    AuthRejected,
    KeyChanged,
    RoomGone,
    Shutdown,
}

/// Spawn a bridge task for one room
///
/// `key` may be `None`: the bridge then waits for a `KeyUpdated`
/// command before its first connection attempt.
pub fn spawn(
    config: BridgeConfig,
    key: Option<RoomKey>,
    link: RoomLink,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
) -> (tokio::task::JoinHandle<()>, watch::Receiver<BridgeState>) {
    let (state_tx, state_rx) = watch::channel(BridgeState::Disconnected);
    let bridge = Bridge {
        config,
        key,
        link,
        commands,
        state_tx,
        failures: 0,
    };
    (tokio::spawn(bridge.run()), state_rx)
}

struct Bridge {
    config: BridgeConfig,
    key: Option<RoomKey>,
    link: RoomLink,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    state_tx: watch::Sender<BridgeState>,
    failures: u32,
}

impl Bridge {
    fn set_state(&self, state: BridgeState) {
        let _ = self.state_tx.send(state);
    }

    async fn run(mut self) {
        loop {
            // Gate on key availability; never connect without a token.
            let Some(key) = self.key.clone() else {
                self.set_state(BridgeState::Disconnected);
                match self.commands.recv().await {
                    Some(BridgeCommand::KeyUpdated(key)) => {
                        self.key = Some(key);
                        continue;
                    }
                    Some(BridgeCommand::Resume) => continue,
                    Some(BridgeCommand::Shutdown) | None => return,
                }
            };

            let token = token_for_room(&key, &self.config.room);
            let url = format!(
                "{}/{}?auth={}",
                self.config.relay_base.trim_end_matches('/'),
                self.config.room,
                urlencoding::encode(&token),
            );

            self.set_state(BridgeState::Connecting);
            match dial(&url, self.config.proxy, self.config.connect_timeout).await {
                Ok((sink, source)) => {
                    info!(room = %self.config.room, "bridge connected");
                    self.failures = 0;
                    self.set_state(BridgeState::Connected);
                    match self.pump(sink, source, &token).await {
                        PumpExit::Shutdown | PumpExit::RoomGone => return,
                        PumpExit::KeyChanged => continue,
                        PumpExit::AuthRejected => {
                            warn!(room = %self.config.room, "relay rejected token; bridge halted");
                            self.set_state(BridgeState::AuthRejected);
                            if !self.wait_for_revival().await {
                                return;
                            }
                            continue;
                        }
                        PumpExit::Disconnected => {}
                    }
                }
                Err(e) => {
                    debug!(room = %self.config.room, error = %e, "bridge connect failed");
                }
            }

            // Unexpected close or failed connect: back off, or pause
            // once the retry budget is spent.
            self.failures += 1;
            if self.config.backoff.exhausted(self.failures) {
                warn!(
                    room = %self.config.room,
                    failures = self.failures,
                    "bridge retries exhausted; pausing"
                );
                self.set_state(BridgeState::Paused);
                if !self.wait_for_revival().await {
                    return;
                }
                continue;
            }

            let delay = self.config.backoff.delay(self.failures);
            debug!(room = %self.config.room, delay_ms = delay.as_millis() as u64, "bridge backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                cmd = self.commands.recv() => match cmd {
                    Some(BridgeCommand::KeyUpdated(key)) => {
                        self.key = Some(key);
                        self.failures = 0;
                    }
                    Some(BridgeCommand::Resume) => self.failures = 0,
                    Some(BridgeCommand::Shutdown) | None => return,
                },
            }
        }
    }

    /// Wait in a terminal-ish state for something that justifies a new
    /// attempt. Returns `false` when the bridge should exit instead.
    async fn wait_for_revival(&mut self) -> bool {
        loop {
            match self.commands.recv().await {
                Some(BridgeCommand::KeyUpdated(key)) => {
                    self.key = Some(key);
                    self.failures = 0;
                    return true;
                }
                Some(BridgeCommand::Resume) => {
                    if self.key.is_some() {
                        self.failures = 0;
                        return true;
                    }
                    // Nothing to resume with; keep waiting for a key.
                }
                Some(BridgeCommand::Shutdown) | None => return false,
            }
        }
    }

    /// Drive one live connection until it ends
    async fn pump(
        &mut self,
        mut sink: WsSink,
        mut source: WsSource,
        current_token: &str,
    ) -> PumpExit {
        let limits = FrameLimits {
            max_sync: self.config.max_update_bytes,
            ..FrameLimits::default()
        };

        loop {
            tokio::select! {
                incoming = source.next() => {
                    match incoming {
                        Some(Ok(Message::Binary(data))) => {
                            match Frame::decode(&data, &limits) {
                                Ok(frame) => {
                                    if let Some(exit) = self.handle_remote(frame, &mut sink).await {
                                        return exit;
                                    }
                                }
                                Err(e) => {
                                    warn!(room = %self.config.room, error = %e, "undecodable frame from relay");
                                    return PumpExit::Disconnected;
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            if code == Some(CLOSE_AUTH) {
                                return PumpExit::AuthRejected;
                            }
                            debug!(room = %self.config.room, ?code, "relay closed bridge connection");
                            return PumpExit::Disconnected;
                        }
                        // Transport-level ping/pong handled by tungstenite
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(room = %self.config.room, error = %e, "bridge transport error");
                            return PumpExit::Disconnected;
                        }
                        None => return PumpExit::Disconnected,
                    }
                }

                outgoing = self.link.outbound.recv() => {
                    match outgoing {
                        Some(frame) => {
                            if oversized_update(&frame, self.config.max_update_bytes) {
                                warn!(
                                    room = %self.config.room,
                                    len = frame.len(),
                                    "dropping oversized update instead of forwarding"
                                );
                                continue;
                            }
                            if sink.send(Message::binary(frame)).await.is_err() {
                                return PumpExit::Disconnected;
                            }
                        }
                        // Room destroyed; its peer slot dropped our sender.
                        None => return PumpExit::RoomGone,
                    }
                }

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(BridgeCommand::KeyUpdated(key)) => {
                            let new_token = token_for_room(&key, &self.config.room);
                            self.key = Some(key);
                            if new_token != current_token {
                                info!(room = %self.config.room, "room key changed; reconnecting bridge");
                                let _ = sink.send(Message::Close(None)).await;
                                return PumpExit::KeyChanged;
                            }
                        }
                        Some(BridgeCommand::Resume) => {}
                        Some(BridgeCommand::Shutdown) | None => {
                            let _ = sink.send(Message::Close(None)).await;
                            return PumpExit::Shutdown;
                        }
                    }
                }
            }
        }
    }

    /// React to one decoded frame from the remote relay.
    /// Returns `Some(exit)` if the connection must end.
    async fn handle_remote(&mut self, frame: Frame, sink: &mut WsSink) -> Option<PumpExit> {
        match frame {
            Frame::Sync(SyncMessage::Step1(state)) => {
                // Remote's full state; apply its updates, then answer
                // with everything we hold so the relay converges too.
                match decode_update_batch(&state) {
                    Ok(updates) => {
                        for update in updates {
                            if self
                                .link
                                .inbound
                                .send(BridgeInbound::Update(update))
                                .await
                                .is_err()
                            {
                                return Some(PumpExit::RoomGone);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(room = %self.config.room, error = %e, "bad state batch from relay");
                        return Some(PumpExit::Disconnected);
                    }
                }

                let (reply_tx, reply_rx) = oneshot::channel();
                if self.link.state.send(reply_tx).await.is_err() {
                    return Some(PumpExit::RoomGone);
                }
                let Ok(local_state) = reply_rx.await else {
                    return Some(PumpExit::RoomGone);
                };
                let step2 = Frame::Sync(SyncMessage::Step2(local_state)).encode();
                if sink.send(Message::binary(step2)).await.is_err() {
                    return Some(PumpExit::Disconnected);
                }
                None
            }
            Frame::Sync(SyncMessage::Step2(batch)) => match decode_update_batch(&batch) {
                Ok(updates) => {
                    for update in updates {
                        if self
                            .link
                            .inbound
                            .send(BridgeInbound::Update(update))
                            .await
                            .is_err()
                        {
                            return Some(PumpExit::RoomGone);
                        }
                    }
                    None
                }
                Err(e) => {
                    warn!(room = %self.config.room, error = %e, "bad update batch from relay");
                    Some(PumpExit::Disconnected)
                }
            },
            Frame::Sync(SyncMessage::Update(update)) => {
                if self
                    .link
                    .inbound
                    .send(BridgeInbound::Update(update))
                    .await
                    .is_err()
                {
                    return Some(PumpExit::RoomGone);
                }
                None
            }
            Frame::Awareness { client_id, state } => {
                if self
                    .link
                    .inbound
                    .send(BridgeInbound::Awareness { client_id, state })
                    .await
                    .is_err()
                {
                    return Some(PumpExit::RoomGone);
                }
                None
            }
            Frame::Ping => {
                if sink.send(Message::binary(Frame::Pong.encode())).await.is_err() {
                    return Some(PumpExit::Disconnected);
                }
                None
            }
            Frame::Pong => None,
        }
    }
}

/// Whether an already-encoded frame is a live update over the cap
fn oversized_update(frame: &[u8], max_update_bytes: usize) -> bool {
    frame.len() > 2 + max_update_bytes
        && frame.first() == Some(&KIND_SYNC)
        && frame.get(1) == Some(&STEP_UPDATE)
}
