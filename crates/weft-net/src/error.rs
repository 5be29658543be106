//! Network error types

use thiserror::Error;

/// Result type alias using NetError
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors from the bridge client
#[derive(Error, Debug)]
pub enum NetError {
    /// Relay URL cannot be parsed into host and port
    #[error("invalid relay url: {0}")]
    BadUrl(String),

    /// TCP or WebSocket handshake failed
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Connect attempt exceeded its deadline
    #[error("connect timed out")]
    Timeout,

    /// SOCKS5 proxy refused or failed the tunnel
    #[error("proxy error: {0}")]
    Proxy(#[from] tokio_socks::Error),

    /// WebSocket transport error after connect
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
}
