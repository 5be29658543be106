//! Sidecar key-delivery channel
//!
//! Local clients push room keys over a Unix domain socket as
//! newline-delimited JSON, one `{"room": <name>, "key": <base64>}`
//! object per line. On receipt the key lands in the ring and the bridge
//! manager is told: an existing bridge reconnects if its token changed,
//! a bridgeable room without one gets a bridge. Malformed lines are
//! logged and skipped; the channel never closes over one bad message.

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use weft_crypto::RoomKey;
use weft_protocol::validate_room_name;

use crate::bridges::BridgeManager;
use crate::registry::RoomRegistry;

/// One key delivery from the sidecar client
#[derive(Debug, Deserialize)]
struct KeyDelivery {
    room: String,
    key: String,
}

/// Listen for key deliveries until shutdown
pub async fn run(
    path: PathBuf,
    registry: Arc<RoomRegistry>,
    bridges: Arc<BridgeManager>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    // A previous run may have left its socket file behind.
    if path.exists() {
        let _ = std::fs::remove_file(&path);
    }
    let listener = UnixListener::bind(&path)?;
    info!(socket = %path.display(), "sidecar key channel listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = std::fs::remove_file(&path);
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    tokio::spawn(handle_conn(
                        stream,
                        Arc::clone(&registry),
                        Arc::clone(&bridges),
                    ));
                }
                Err(e) => warn!(error = %e, "sidecar accept failed"),
            }
        }
    }
}

async fn handle_conn(
    stream: UnixStream,
    registry: Arc<RoomRegistry>,
    bridges: Arc<BridgeManager>,
) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let delivery: KeyDelivery = match serde_json::from_str(&line) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(error = %e, "malformed sidecar message");
                continue;
            }
        };
        if validate_room_name(&delivery.room).is_err() {
            warn!("invalid room name in key delivery");
            continue;
        }
        let key = match RoomKey::from_base64(&delivery.key) {
            Ok(key) => key,
            Err(e) => {
                warn!(room = %delivery.room, error = %e, "undecodable key in delivery");
                continue;
            }
        };

        registry.keys().insert(&delivery.room, key.clone());
        info!(room = %delivery.room, "room key delivered");
        bridges.on_key_delivered(&registry, &delivery.room, key);
    }
}
