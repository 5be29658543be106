//! End-to-end scenarios against a live server
//!
//! Each test binds a relay on an ephemeral port and drives it with real
//! WebSocket clients. Timing-sensitive assertions poll with generous
//! deadlines instead of sleeping fixed amounts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use weft_crypto::{token_for_room, RoomKey};
use weft_protocol::{DocState, Frame, FrameLimits, SyncMessage};
use weft_relay::bridges::{BridgeManager, BridgeSettings};
use weft_relay::registry::{RegistrySettings, RoomRegistry};
use weft_relay::server::{self, AppState};
use weft_store::{KeyRing, SnapshotStore};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEADLINE: Duration = Duration::from_secs(5);
const MAX_UPDATE: usize = 64 * 1024;

struct TestRelay {
    addr: SocketAddr,
    registry: Arc<RoomRegistry>,
    bridges: Arc<BridgeManager>,
    shutdown: CancellationToken,
}

impl TestRelay {
    async fn start(
        keys: Arc<KeyRing>,
        store: Option<Arc<SnapshotStore>>,
        relay_base: Option<String>,
        idle_timeout: Duration,
    ) -> Self {
        let registry = Arc::new(RoomRegistry::new(
            RegistrySettings {
                max_rooms: 64,
                max_update_bytes: MAX_UPDATE,
                debounce: Duration::from_millis(30),
                ceiling: Duration::from_millis(300),
                idle_timeout,
            },
            store,
            keys,
        ));
        let bridges = Arc::new(BridgeManager::new(relay_base.map(|relay_base| {
            BridgeSettings {
                relay_base,
                proxy: None,
                max_update_bytes: MAX_UPDATE,
            }
        })));

        let shutdown = CancellationToken::new();
        registry.spawn_sweeper(Duration::from_millis(50), shutdown.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState {
            registry: Arc::clone(&registry),
            bridges: Arc::clone(&bridges),
            max_update_bytes: MAX_UPDATE,
            max_rooms: 64,
        };
        tokio::spawn(server::serve(listener, state, shutdown.clone()));

        Self {
            addr,
            registry,
            bridges,
            shutdown,
        }
    }

    fn url(&self, room: &str, auth: Option<&str>) -> String {
        match auth {
            Some(token) => format!(
                "ws://{}/{}?auth={}",
                self.addr,
                room,
                urlencoding::encode(token)
            ),
            None => format!("ws://{}/{}", self.addr, room),
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.bridges.shutdown();
        self.registry.shutdown().await;
    }
}

fn key(fill: u8) -> RoomKey {
    let mut raw = [0u8; 32];
    raw[31] = fill.max(1);
    RoomKey::from_bytes(raw).unwrap()
}

async fn connect(relay: &TestRelay, room: &str, auth: Option<&str>) -> Client {
    let (ws, _) = connect_async(relay.url(room, auth)).await.unwrap();
    ws
}

/// Read frames until one matches; fail on close or timeout
async fn expect_frame<F: Fn(&Frame) -> bool>(client: &mut Client, want: F) -> Frame {
    let limits = FrameLimits {
        max_sync: MAX_UPDATE,
        ..FrameLimits::default()
    };
    tokio::time::timeout(DEADLINE, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Binary(data))) => {
                    let frame = Frame::decode(&data, &limits).unwrap();
                    if want(&frame) {
                        return frame;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    panic!("connection closed while waiting for frame: {frame:?}")
                }
                Some(Ok(_)) => {}
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

/// Read until the server closes; return the close code
async fn expect_close(client: &mut Client) -> Option<u16> {
    tokio::time::timeout(DEADLINE, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(frame))) => {
                    return frame.map(|f| u16::from(f.code));
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("timed out waiting for close")
}

async fn send_frame(client: &mut Client, frame: Frame) {
    client
        .send(Message::binary(frame.encode()))
        .await
        .unwrap();
}

async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    let deadline = std::time::Instant::now() + DEADLINE;
    while !cond() {
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting until {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn step1_updates(frame: &Frame) -> Vec<Vec<u8>> {
    match frame {
        Frame::Sync(SyncMessage::Step1(state)) => {
            weft_protocol::sync::decode_update_batch(state).unwrap()
        }
        other => panic!("expected Step1, got {other:?}"),
    }
}

#[tokio::test]
async fn two_clients_shared_key_exchange_updates() {
    let relay = TestRelay::start(Arc::new(KeyRing::new()), None, None, Duration::from_secs(600)).await;
    let k = key(1);
    let token = token_for_room(&k, "doc-x");

    let mut a = connect(&relay, "doc-x", Some(&token)).await;
    expect_frame(&mut a, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;

    let mut b = connect(&relay, "doc-x", Some(&token)).await;
    expect_frame(&mut b, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;

    let mut other = connect(&relay, "doc-other", None).await;
    expect_frame(&mut other, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;

    send_frame(&mut a, Frame::Sync(SyncMessage::Update(vec![0xAA]))).await;
    let got = expect_frame(&mut b, |f| matches!(f, Frame::Sync(SyncMessage::Update(_)))).await;
    assert_eq!(got, Frame::Sync(SyncMessage::Update(vec![0xAA])));

    send_frame(&mut b, Frame::Sync(SyncMessage::Update(vec![0xBB]))).await;
    let got = expect_frame(&mut a, |f| matches!(f, Frame::Sync(SyncMessage::Update(_)))).await;
    assert_eq!(got, Frame::Sync(SyncMessage::Update(vec![0xBB])));

    // No cross-room leakage: a client in a different room saw nothing
    send_frame(&mut a, Frame::Sync(SyncMessage::Update(vec![0xCC]))).await;
    expect_frame(&mut b, |f| {
        matches!(f, Frame::Sync(SyncMessage::Update(u)) if u == &[0xCC])
    })
    .await;
    let quiet = tokio::time::timeout(Duration::from_millis(300), other.next()).await;
    assert!(quiet.is_err(), "doc-other received traffic: {quiet:?}");

    relay.stop().await;
}

#[tokio::test]
async fn attacker_with_wrong_key_rejected() {
    let relay = TestRelay::start(Arc::new(KeyRing::new()), None, None, Duration::from_secs(600)).await;
    let good = token_for_room(&key(1), "doc-x");
    let bad = token_for_room(&key(2), "doc-x");

    let mut a = connect(&relay, "doc-x", Some(&good)).await;
    expect_frame(&mut a, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;
    let mut b = connect(&relay, "doc-x", Some(&good)).await;
    expect_frame(&mut b, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;

    let mut c = connect(&relay, "doc-x", Some(&bad)).await;
    assert_eq!(expect_close(&mut c).await, Some(4403));

    // Tokenless joiners are also locked out once a token is registered
    let mut d = connect(&relay, "doc-x", None).await;
    assert_eq!(expect_close(&mut d).await, Some(4403));

    // A and B are undisturbed
    send_frame(&mut a, Frame::Sync(SyncMessage::Update(vec![0x01]))).await;
    expect_frame(&mut b, |f| {
        matches!(f, Frame::Sync(SyncMessage::Update(u)) if u == &[0x01])
    })
    .await;

    relay.stop().await;
}

#[tokio::test]
async fn destroyed_room_accepts_new_registrant() {
    let relay = TestRelay::start(
        Arc::new(KeyRing::new()),
        None,
        None,
        Duration::from_millis(200),
    )
    .await;
    let t1 = token_for_room(&key(1), "doc-z");
    let t2 = token_for_room(&key(2), "doc-z");

    let mut a = connect(&relay, "doc-z", Some(&t1)).await;
    expect_frame(&mut a, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;
    a.close(None).await.unwrap();

    // Last-connection close (or, failing that, the sweep) destroys the
    // room and clears its auth slot
    let registry = Arc::clone(&relay.registry);
    wait_until(|| registry.get("doc-z").is_none(), "room destroyed").await;

    let mut b = connect(&relay, "doc-z", Some(&t2)).await;
    expect_frame(&mut b, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;

    relay.stop().await;
}

#[tokio::test]
async fn oversized_update_closes_sender_only() {
    let relay = TestRelay::start(Arc::new(KeyRing::new()), None, None, Duration::from_secs(600)).await;

    let mut a = connect(&relay, "doc-big", None).await;
    expect_frame(&mut a, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;
    let mut b = connect(&relay, "doc-big", None).await;
    expect_frame(&mut b, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;

    send_frame(
        &mut a,
        Frame::Sync(SyncMessage::Update(vec![0u8; MAX_UPDATE + 1])),
    )
    .await;
    assert_eq!(expect_close(&mut a).await, Some(4001));

    // B saw none of the oversized payload and still works
    send_frame(&mut b, Frame::Ping).await;
    expect_frame(&mut b, |f| matches!(f, Frame::Pong)).await;

    relay.stop().await;
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let keys = Arc::new(KeyRing::new());
    keys.insert("doc-w", key(7));

    let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
    let relay = TestRelay::start(
        Arc::clone(&keys),
        Some(Arc::clone(&store)),
        None,
        Duration::from_secs(600),
    )
    .await;
    let token = token_for_room(&key(7), "doc-w");

    let mut a = connect(&relay, "doc-w", Some(&token)).await;
    expect_frame(&mut a, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;
    for i in 1..=10u8 {
        send_frame(&mut a, Frame::Sync(SyncMessage::Update(vec![i]))).await;
    }
    a.close(None).await.unwrap();

    // Last-client departure arms the flush; destruction follows it
    let registry = Arc::clone(&relay.registry);
    wait_until(|| registry.get("doc-w").is_none(), "room flushed and destroyed").await;
    relay.stop().await;

    // Restart over the same directory
    let relay2 = TestRelay::start(keys, Some(store), None, Duration::from_secs(600)).await;
    let mut b = connect(&relay2, "doc-w", Some(&token)).await;
    let frame = expect_frame(&mut b, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;
    let updates = step1_updates(&frame);
    assert_eq!(updates.len(), 10);
    for i in 1..=10u8 {
        assert!(updates.contains(&vec![i]), "missing update {i}");
    }

    relay2.stop().await;
}

#[tokio::test]
async fn bridge_replicates_room_to_remote_relay() {
    // The "public relay" is just another weft instance
    let remote = TestRelay::start(Arc::new(KeyRing::new()), None, None, Duration::from_secs(600)).await;

    let local_keys = Arc::new(KeyRing::new());
    local_keys.insert("doc-b", key(3));
    let local = TestRelay::start(
        local_keys,
        None,
        Some(format!("ws://{}", remote.addr)),
        Duration::from_secs(600),
    )
    .await;
    let token = token_for_room(&key(3), "doc-b");

    // Joining the local room starts the bridge, which registers the
    // room's token at the remote
    let mut a = connect(&local, "doc-b", Some(&token)).await;
    expect_frame(&mut a, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;

    send_frame(&mut a, Frame::Sync(SyncMessage::Update(vec![0x42]))).await;

    // The update reaches the remote registry through the bridge
    let remote_registry = Arc::clone(&remote.registry);
    wait_until(
        || {
            remote_registry
                .get("doc-b")
                .map(|room| !DocState::decode(&room.encode_state()).unwrap().is_empty())
                .unwrap_or(false)
        },
        "bridge forwarded the update",
    )
    .await;

    // A collaborator joining the remote with the same key sees the state
    let mut r = connect(&remote, "doc-b", Some(&token)).await;
    let frame = expect_frame(&mut r, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;
    assert_eq!(step1_updates(&frame), vec![vec![0x42]]);

    // And the reverse direction: remote update reaches the local client
    send_frame(&mut r, Frame::Sync(SyncMessage::Update(vec![0x43]))).await;
    expect_frame(&mut a, |f| {
        matches!(f, Frame::Sync(SyncMessage::Update(u)) if u == &[0x43])
    })
    .await;

    local.stop().await;
    remote.stop().await;
}

#[tokio::test]
async fn late_key_delivery_and_foreign_registrant() {
    let remote = TestRelay::start(Arc::new(KeyRing::new()), None, None, Duration::from_secs(600)).await;

    // The remote room is already claimed under a different key
    let foreign = token_for_room(&key(9), "doc-y");
    let mut f = connect(&remote, "doc-y", Some(&foreign)).await;
    expect_frame(&mut f, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;

    // Local relay starts with no key for doc-y
    let local = TestRelay::start(
        Arc::new(KeyRing::new()),
        None,
        Some(format!("ws://{}", remote.addr)),
        Duration::from_secs(600),
    )
    .await;

    // D connects before its key arrives: tokenless legacy admission
    let mut d = connect(&local, "doc-y", Some("null")).await;
    expect_frame(&mut d, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;

    // Key arrives over the sidecar path; the bridge dials out and is
    // rejected by the remote's registrant with 4403
    let k = key(4);
    local.registry.keys().insert("doc-y", k.clone());
    local
        .bridges
        .on_key_delivered(&local.registry, "doc-y", k);

    // The rejected bridge must not disturb the local client
    tokio::time::sleep(Duration::from_millis(300)).await;
    send_frame(&mut d, Frame::Ping).await;
    expect_frame(&mut d, |f| matches!(f, Frame::Pong)).await;

    // The remote room still has exactly its original client
    assert_eq!(remote.registry.get("doc-y").unwrap().client_count(), 1);

    local.stop().await;
    remote.stop().await;
}

#[tokio::test]
async fn awareness_relays_and_tombstones() {
    let relay = TestRelay::start(Arc::new(KeyRing::new()), None, None, Duration::from_secs(600)).await;

    let mut a = connect(&relay, "doc-aw", None).await;
    expect_frame(&mut a, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;
    let mut b = connect(&relay, "doc-aw", None).await;
    expect_frame(&mut b, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;

    send_frame(
        &mut a,
        Frame::Awareness {
            client_id: 77,
            state: b"cursor@3".to_vec(),
        },
    )
    .await;
    expect_frame(&mut b, |f| {
        matches!(f, Frame::Awareness { client_id: 77, state } if state == b"cursor@3")
    })
    .await;

    // A drops; B must see the tombstone before anything else happens
    a.close(None).await.unwrap();
    expect_frame(&mut b, |f| {
        matches!(f, Frame::Awareness { client_id: 77, state } if state.is_empty())
    })
    .await;

    // A late joiner sees only live entries, none from the departed peer
    send_frame(
        &mut b,
        Frame::Awareness {
            client_id: 88,
            state: b"here".to_vec(),
        },
    )
    .await;
    let mut c = connect(&relay, "doc-aw", None).await;
    expect_frame(&mut c, |f| matches!(f, Frame::Sync(SyncMessage::Step1(_)))).await;
    let snapshot = expect_frame(&mut c, |f| matches!(f, Frame::Awareness { .. })).await;
    assert!(
        matches!(&snapshot, Frame::Awareness { client_id: 88, state } if state == b"here"),
        "unexpected awareness snapshot: {snapshot:?}"
    );

    relay.stop().await;
}
