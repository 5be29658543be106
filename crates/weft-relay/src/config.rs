//! Daemon configuration
//!
//! Options use kebab-case keys in the TOML file. The same binary runs
//! both deployment shapes: a desktop sidecar points `sidecar-socket`
//! at the local client and persists one user's rooms; a unified server
//! omits the sidecar socket and sits behind a reverse proxy.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RelayConfig {
    /// TCP endpoint to bind the WebSocket server
    pub listen_address: String,
    /// Path for room snapshot files; omitted disables persistence
    pub persistence_dir: Option<PathBuf>,
    /// Outbound relay base URL; omitted disables bridging
    pub relay_base_url: Option<String>,
    /// Optional SOCKS5 proxy for relay connections
    pub outbound_proxy: Option<SocketAddr>,
    /// Hard cap on a single update in bytes
    pub max_update_bytes: usize,
    /// Seconds of inactivity before an empty room is destroyed
    pub idle_room_timeout: u64,
    /// Debounce window between the last update and a flush
    pub debounce_flush_ms: u64,
    /// Ceiling between the first unflushed update and a forced flush
    pub flush_ceiling_ms: u64,
    /// Interval between stale-room sweeps
    pub sweep_interval_secs: u64,
    /// Registry room cap; joins beyond it are refused at upgrade
    pub max_rooms: usize,
    /// Unix socket receiving sidecar key deliveries
    pub sidecar_socket: Option<PathBuf>,
    /// JSON map of room name to base64 key, loaded at startup
    pub key_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:4950".to_string(),
            persistence_dir: None,
            relay_base_url: None,
            outbound_proxy: None,
            max_update_bytes: 2 * 1024 * 1024,
            idle_room_timeout: 600,
            debounce_flush_ms: 2000,
            flush_ceiling_ms: 30_000,
            sweep_interval_secs: 60,
            max_rooms: 4096,
            sidecar_socket: None,
            key_file: None,
        }
    }
}

impl RelayConfig {
    /// Minimum idle timeout in seconds (prevents accidental zero = destroy-on-sight)
    const MIN_IDLE_TIMEOUT: u64 = 10;

    /// Validate and clamp configuration values
    pub fn validate(&mut self) {
        if self.idle_room_timeout < Self::MIN_IDLE_TIMEOUT {
            self.idle_room_timeout = Self::MIN_IDLE_TIMEOUT;
        }
        if self.flush_ceiling_ms < self.debounce_flush_ms {
            warn!(
                ceiling_ms = self.flush_ceiling_ms,
                debounce_ms = self.debounce_flush_ms,
                "flush ceiling below debounce; raising to debounce"
            );
            self.flush_ceiling_ms = self.debounce_flush_ms;
        }
        if self.sweep_interval_secs == 0 {
            self.sweep_interval_secs = 1;
        }
        if self.max_update_bytes == 0 {
            warn!("max-update-bytes of zero would reject every update; using default");
            self.max_update_bytes = Self::default().max_update_bytes;
        }
        if let Some(base) = &self.relay_base_url {
            if !base.starts_with("ws://") && !base.starts_with("wss://") {
                warn!(url = %base, "relay-base-url is not a ws:// or wss:// URL, disabling bridging");
                self.relay_base_url = None;
            }
        }
    }

    /// Debounce window as a duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_flush_ms)
    }

    /// Flush ceiling as a duration
    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.flush_ceiling_ms)
    }

    /// Idle-room timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_room_timeout)
    }

    /// Sweep interval as a duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.max_update_bytes, 2 * 1024 * 1024);
        assert_eq!(cfg.idle_room_timeout, 600);
        assert_eq!(cfg.debounce_flush_ms, 2000);
        assert_eq!(cfg.flush_ceiling_ms, 30_000);
        assert!(cfg.persistence_dir.is_none());
        assert!(cfg.relay_base_url.is_none());
    }

    #[test]
    fn test_kebab_case_toml_keys() {
        let cfg: RelayConfig = toml::from_str(
            r#"
            listen-address = "0.0.0.0:9000"
            persistence-dir = "/var/lib/weft"
            relay-base-url = "wss://relay.example"
            max-update-bytes = 1048576
            idle-room-timeout = 120
            "#,
        )
        .unwrap();
        assert_eq!(cfg.listen_address, "0.0.0.0:9000");
        assert_eq!(cfg.persistence_dir.as_deref(), Some(std::path::Path::new("/var/lib/weft")));
        assert_eq!(cfg.relay_base_url.as_deref(), Some("wss://relay.example"));
        assert_eq!(cfg.max_update_bytes, 1024 * 1024);
        assert_eq!(cfg.idle_room_timeout, 120);
    }

    #[test]
    fn test_validate_clamps() {
        let mut cfg = RelayConfig {
            idle_room_timeout: 0,
            debounce_flush_ms: 5000,
            flush_ceiling_ms: 1000,
            max_update_bytes: 0,
            relay_base_url: Some("http://not-ws".to_string()),
            ..Default::default()
        };
        cfg.validate();
        assert_eq!(cfg.idle_room_timeout, 10);
        assert_eq!(cfg.flush_ceiling_ms, 5000);
        assert_eq!(cfg.max_update_bytes, 2 * 1024 * 1024);
        assert!(cfg.relay_base_url.is_none());
    }
}
