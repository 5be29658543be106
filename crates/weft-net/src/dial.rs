//! WebSocket dialing
//!
//! Connects to the configured relay URL either directly or through a
//! SOCKS5 proxy, with a hard connect deadline. The two paths produce
//! different concrete stream types, so the socket is split and both
//! halves are boxed; the bridge only ever sees a sink of outgoing
//! messages and a stream of incoming ones.

use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use futures::{Sink, Stream, StreamExt};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{client_async_tls, connect_async};

use crate::error::{NetError, Result};

/// Outgoing half of a dialed WebSocket
pub type WsSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Incoming half of a dialed WebSocket
pub type WsSource = Pin<Box<dyn Stream<Item = std::result::Result<Message, WsError>> + Send>>;

/// Split a `ws://` / `wss://` URL into (host, port) for proxy CONNECT
pub(crate) fn host_port(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("wss://")
        .map(|r| (r, 443u16))
        .or_else(|| url.strip_prefix("ws://").map(|r| (r, 80u16)));
    let Some((rest, default_port)) = rest else {
        return Err(NetError::BadUrl(url.to_string()));
    };

    let authority = rest.split(['/', '?']).next().unwrap_or("");
    if authority.is_empty() {
        return Err(NetError::BadUrl(url.to_string()));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| NetError::BadUrl(url.to_string()))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), default_port)),
    }
}

/// Dial a relay WebSocket, optionally through a SOCKS5 proxy
///
/// The whole handshake (TCP, proxy tunnel, TLS, WebSocket upgrade)
/// must complete within `timeout`.
pub async fn dial(
    url: &str,
    proxy: Option<SocketAddr>,
    timeout: Duration,
) -> Result<(WsSink, WsSource)> {
    let attempt = async {
        match proxy {
            None => {
                let (ws, _resp) = connect_async(url)
                    .await
                    .map_err(|e| NetError::ConnectFailed(e.to_string()))?;
                let (sink, source) = ws.split();
                Ok((Box::pin(sink) as WsSink, Box::pin(source) as WsSource))
            }
            Some(proxy_addr) => {
                let (host, port) = host_port(url)?;
                let tcp = Socks5Stream::connect(proxy_addr, (host.as_str(), port)).await?;
                let (ws, _resp) = client_async_tls(url, tcp)
                    .await
                    .map_err(|e| NetError::ConnectFailed(e.to_string()))?;
                let (sink, source) = ws.split();
                Ok((Box::pin(sink) as WsSink, Box::pin(source) as WsSource))
            }
        }
    };

    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| NetError::Timeout)?
}
