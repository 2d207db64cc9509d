//! HTTP front: upgrades `/tail` requests to websockets and runs a
//! [`Session`] on each.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info_span, Instrument};

use crate::config::SessionConfig;
use crate::reader::{Follower, TailFollower};
use crate::session::Session;
use crate::transport::WsTransport;

/// Shared by every connection. Read-only.
#[derive(Clone)]
pub struct AppState {
    config: Arc<SessionConfig>,
    follower: Arc<dyn Follower>,
}

impl AppState {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_follower(config, Arc::new(TailFollower))
    }

    pub fn with_follower(config: SessionConfig, follower: Arc<dyn Follower>) -> Self {
        AppState {
            config: Arc::new(config),
            follower,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/tail", get(tail_handler))
        .with_state(state)
}

/// Serves `state` on `listener` until the process is stopped.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn tail_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, peer, state))
}

async fn run_session(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let span = info_span!("session", %peer);
    let session = Session::new(WsTransport::new(socket), state.config, state.follower);

    async move {
        debug!("connected");
        // Failures were already logged at the severity they deserve.
        let res = session.run().await;
        debug!("disconnected: {:?}", res.err());
    }
    .instrument(span)
    .await
}
