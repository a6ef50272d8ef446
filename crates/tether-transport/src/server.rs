//! HTTP endpoints: the WebSocket upgrade route that feeds the connection manager, and a static
//! liveness route.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manager::{ConnectionManager, FrameHandler};
use crate::websocket;

/// Default upgrade path.
pub const DEFAULT_WS_PATH: &str = "/onebot/v11/ws";

/// Shared state for the routes.
#[derive(Clone)]
pub struct ServerState {
    manager: ConnectionManager,
    handler: Arc<dyn FrameHandler>,
    access_token: Option<Arc<str>>,
}

impl ServerState {
    pub fn new(manager: ConnectionManager, handler: Arc<dyn FrameHandler>) -> Self {
        Self {
            manager,
            handler,
            access_token: None,
        }
    }

    /// Requires peers to present this token; `None` disables the check.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty()).map(Arc::from);
        self
    }
}

/// Builds the router with the upgrade route at `ws_path` and liveness at `/`.
pub fn router(state: ServerState, ws_path: &str) -> Router {
    let ws_path = if ws_path.starts_with('/') {
        ws_path.to_string()
    } else {
        format!("/{ws_path}")
    };

    Router::new()
        .route("/", get(liveness))
        .route(&ws_path, get(ws_upgrade))
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Listening");
    }
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
}

async fn liveness() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "tether is running",
        "platform": "onebot",
    }))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(state.access_token.as_deref(), &headers, &query) {
        warn!(remote_addr = %addr, "Rejected session with missing or wrong access token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let self_id = headers
        .get("x-self-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    info!(remote_addr = %addr, %self_id, "Inbound session requested");

    ws.on_upgrade(move |socket| async move {
        let transport = websocket::from_websocket(socket, addr.to_string());
        state.manager.accept(transport, state.handler.clone()).await;
    })
}

/// Checks the `Authorization` header (`Bearer`/`Token` scheme) or the `access_token` query
/// parameter against the expected token.
pub fn authorized(
    expected: Option<&str>,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("Token ")));
    let provided = from_header.or_else(|| query.get("access_token").map(String::as_str));

    provided == Some(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerConfig;
    use crate::session::SessionId;
    use axum::body::{Body, to_bytes};
    use axum::http::{HeaderValue, Request};
    use tower::ServiceExt;

    struct Noop;

    impl FrameHandler for Noop {
        fn on_frame(&self, _session: SessionId, _payload: &[u8]) {}
    }

    #[tokio::test]
    async fn liveness_returns_static_payload() {
        let state = ServerState::new(ConnectionManager::new(ManagerConfig::default()), Arc::new(Noop));
        let response = router(state, DEFAULT_WS_PATH)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["platform"], "onebot");
    }

    #[test]
    fn access_token_checks() {
        let empty = HashMap::new();
        let mut headers = HeaderMap::new();
        assert!(authorized(None, &headers, &empty));
        assert!(!authorized(Some("s3cret"), &headers, &empty));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(authorized(Some("s3cret"), &headers, &empty));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Token nope"));
        assert!(!authorized(Some("s3cret"), &headers, &empty));

        let query = HashMap::from([("access_token".to_string(), "s3cret".to_string())]);
        assert!(authorized(Some("s3cret"), &HeaderMap::new(), &query));
    }
}
