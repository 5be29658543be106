//! HTTP server assembly
//!
//! One axum router: `/{room}` upgrades to the collaboration protocol,
//! `/healthz` answers the reverse proxy. CORS is permissive — the relay
//! forwards opaque encrypted bytes, and room access is gated by the
//! HMAC token, not by origin.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::bridges::BridgeManager;
use crate::connection;
use crate::registry::RoomRegistry;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Room registry
    pub registry: Arc<RoomRegistry>,
    /// Bridge manager
    pub bridges: Arc<BridgeManager>,
    /// Per-update byte cap
    pub max_update_bytes: usize,
    /// Registry room cap, enforced at upgrade
    pub max_rooms: usize,
}

/// Build the daemon's router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/{room}", get(connection::ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Serve until the shutdown token fires
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrySettings;
    use std::time::Duration;
    use weft_store::KeyRing;

    fn state() -> AppState {
        let registry = Arc::new(RoomRegistry::new(
            RegistrySettings {
                max_rooms: 4,
                max_update_bytes: 1024,
                debounce: Duration::from_secs(2),
                ceiling: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(600),
            },
            None,
            Arc::new(KeyRing::new()),
        ));
        AppState {
            registry,
            bridges: Arc::new(BridgeManager::new(None)),
            max_update_bytes: 1024,
            max_rooms: 4,
        }
    }

    #[tokio::test]
    async fn test_healthz() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_non_websocket_room_request_rejected() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        // A plain GET without upgrade headers cannot become a connection
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/doc-x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::OK);
    }
}
