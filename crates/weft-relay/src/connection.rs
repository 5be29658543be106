//! Per-connection state machine
//!
//! Each accepted WebSocket runs two tasks: this reader and a spawned
//! writer draining the peer's outbound queue. The connection moves
//! `upgrading → syncing → live → closing → closed`: the upgrade window
//! validates the room name and token, syncing ends when the client's
//! first SyncStep2 has been processed, and live traffic is updates,
//! awareness, and pings. Any single-connection failure closes only this
//! connection; siblings in the room are untouched.

use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, trace};

use weft_protocol::sync::decode_update_batch;
use weft_protocol::{validate_room_name, CloseReason, Frame, FrameLimits, SyncMessage};

use crate::auth;
use crate::error::JoinError;
use crate::peer::{peer_channel, PeerHandle, PeerKind, PeerRx};
use crate::room::Room;
use crate::server::AppState;

/// Deadline for auth and room join after the HTTP upgrade
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for the client's first SyncStep2
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between server pings
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Missing-pong span that counts as a dead connection
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// `?auth=` query parameter
#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    /// Join token, or absent/`null` for a tokenless attempt
    pub auth: Option<String>,
}

/// WebSocket upgrade handler for `/{room}`
pub async fn ws_handler(
    Path(room): Path<String>,
    Query(query): Query<AuthQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    // Registry cap is refused before a socket exists; every other
    // refusal happens post-upgrade so it can carry a close code.
    if state.registry.get(&room).is_none() && state.registry.room_count() >= state.max_rooms {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    // Comfortably above the update cap: oversized-but-parseable frames
    // must reach the codec so they close with ProtocolViolation rather
    // than dying as an opaque transport error.
    let max_message = state.max_update_bytes * 2 + 64 * 1024;
    ws.max_message_size(max_message)
        .on_upgrade(move |socket| handle_socket(socket, room, query.auth, state))
}

async fn handle_socket(socket: WebSocket, room_name: String, auth: Option<String>, state: AppState) {
    let (mut sink, stream) = socket.split();

    let setup = tokio::time::timeout(UPGRADE_TIMEOUT, async {
        validate_room_name(&room_name).map_err(|_| CloseReason::ProtocolViolation)?;
        let room = state
            .registry
            .join_or_create(&room_name)
            .await
            .map_err(|e| match e {
                JoinError::BadName => CloseReason::ProtocolViolation,
                JoinError::AtCapacity => CloseReason::RoomClosed,
            })?;

        let supplied = auth::normalize_supplied(auth.as_deref());
        let peer_id = state.registry.next_peer_id();
        let (peer, peer_rx) = peer_channel(peer_id, PeerKind::Client);
        let accept = room.try_join(supplied.as_deref(), peer.clone())?;
        Ok::<_, CloseReason>((room, peer, peer_rx, accept))
    })
    .await;

    let (room, peer, peer_rx, accept) = match setup {
        Ok(Ok(parts)) => parts,
        Ok(Err(reason)) => {
            debug!(room = %room_name, reason = reason.as_str(), "join refused");
            let _ = send_close(&mut sink, reason).await;
            return;
        }
        // Upgrade deadline blown before a room slot was taken; just
        // drop the transport.
        Err(_) => return,
    };

    state.bridges.ensure_bridge(&state.registry, &room);

    // Initial sync and awareness snapshot go through the queue so they
    // order before any concurrent fan-out.
    peer.enqueue(accept.state_frame);
    for frame in accept.awareness_frames {
        peer.enqueue(frame);
    }

    let close = peer.close_signal();
    let writer = tokio::spawn(writer_task(sink, peer_rx));

    let awareness_id = read_loop(stream, &state, &room, &peer).await;

    // Closing: the tombstone fans out synchronously, while this
    // connection still holds its room slot.
    if let Some(client_id) = awareness_id {
        state
            .registry
            .remove_awareness(&room, Some(peer.id), client_id);
    }
    room.remove_peer(peer.id);
    close.fire(CloseReason::Normal);
    let _ = writer.await;

    state.registry.client_departed(&room).await;
    debug!(room = %room.name(), peer = peer.id, "connection closed");
}

/// Reader half: decodes frames until the connection ends.
/// Returns the client's awareness id, if it ever announced one.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    room: &Room,
    peer: &PeerHandle,
) -> Option<u32> {
    let close = peer.close_signal();
    let limits = FrameLimits {
        max_sync: state.max_update_bytes,
        ..FrameLimits::default()
    };

    let mut awareness_id: Option<u32> = None;
    let mut synced = false;
    let mut last_pong = Instant::now();

    let start = tokio::time::Instant::now();
    let mut ping_timer = tokio::time::interval_at(start + PING_INTERVAL, PING_INTERVAL);
    let sync_deadline = tokio::time::sleep(SYNC_TIMEOUT);
    tokio::pin!(sync_deadline);

    loop {
        tokio::select! {
            biased;
            _ = close.fired() => break,

            _ = &mut sync_deadline, if !synced => {
                debug!(room = %room.name(), peer = peer.id, "initial sync deadline missed");
                close.fire(CloseReason::Timeout);
                break;
            }

            _ = ping_timer.tick() => {
                if last_pong.elapsed() > PONG_TIMEOUT {
                    close.fire(CloseReason::Timeout);
                    break;
                }
                peer.enqueue(Bytes::from(Frame::Ping.encode()));
            }

            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    let frame = match Frame::decode(&data, &limits) {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!(room = %room.name(), peer = peer.id, error = %e, "protocol violation");
                            close.fire(CloseReason::ProtocolViolation);
                            break;
                        }
                    };
                    match frame {
                        Frame::Sync(SyncMessage::Update(update)) => {
                            state.registry.apply_update(room, peer.id, &update);
                        }
                        Frame::Sync(SyncMessage::Step2(batch)) => {
                            match decode_update_batch(&batch) {
                                Ok(updates) => {
                                    // Receive order is apply order.
                                    for update in updates {
                                        state.registry.apply_update(room, peer.id, &update);
                                    }
                                    synced = true;
                                }
                                Err(e) => {
                                    debug!(room = %room.name(), peer = peer.id, error = %e, "bad sync batch");
                                    close.fire(CloseReason::ProtocolViolation);
                                    break;
                                }
                            }
                        }
                        Frame::Sync(SyncMessage::Step1(_)) => {
                            // A re-sync request; answer with everything we hold.
                            peer.enqueue(Bytes::from(
                                Frame::Sync(SyncMessage::Step2(room.encode_state())).encode(),
                            ));
                        }
                        Frame::Awareness { client_id, state: payload } => {
                            awareness_id.get_or_insert(client_id);
                            if payload.is_empty() {
                                state.registry.remove_awareness(room, Some(peer.id), client_id);
                            } else {
                                state.registry.set_awareness(room, Some(peer.id), client_id, &payload);
                            }
                        }
                        Frame::Ping => {
                            peer.enqueue(Bytes::from(Frame::Pong.encode()));
                        }
                        Frame::Pong => {
                            last_pong = Instant::now();
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Transport-level ping/pong is answered by the stack.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Text(_))) => {
                    close.fire(CloseReason::ProtocolViolation);
                    break;
                }
                Some(Err(e)) => {
                    trace!(room = %room.name(), peer = peer.id, error = %e, "transport error");
                    break;
                }
            }
        }
    }

    awareness_id
}

/// Writer half: drains the peer queue until the close signal fires,
/// then emits the close frame with the recorded reason
async fn writer_task(mut sink: SplitSink<WebSocket, Message>, mut rx: PeerRx) {
    let close = rx.close_signal();
    loop {
        tokio::select! {
            biased;
            reason = close.fired() => {
                let _ = send_close(&mut sink, reason).await;
                return;
            }
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Binary(frame)).await.is_err() {
                        close.fire(CloseReason::Normal);
                        return;
                    }
                }
                None => return,
            }
        }
    }
}

async fn send_close(
    sink: &mut SplitSink<WebSocket, Message>,
    reason: CloseReason,
) -> Result<(), axum::Error> {
    sink.send(Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: reason.as_str().into(),
    })))
    .await
}
