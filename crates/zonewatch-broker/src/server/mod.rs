//! HTTP transport for the RPC surface.
//!
//! One POST endpoint carries JSON-RPC envelopes; `/healthz` answers once
//! the store opened. The remote address feeds the loopback privilege check
//! for administrative methods.

pub mod methods;
pub mod rpc;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tracing::info;

pub use methods::RpcService;

#[derive(Clone)]
struct AppState {
    service: Arc<RpcService>,
}

/// Build the broker router.
pub fn build_router(service: Arc<RpcService>) -> Router {
    Router::new()
        .route("/", post(rpc_endpoint))
        .route("/healthz", get(healthz))
        .with_state(AppState { service })
}

async fn rpc_endpoint(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: String,
) -> impl IntoResponse {
    let response = match serde_json::from_str::<rpc::RpcRequest>(&body) {
        Ok(request) => state.service.handle(request, addr.ip()).await,
        Err(_) => rpc::error_envelope(Value::Null, &rpc::RpcError::Parse),
    };
    axum::Json(response)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, service: Arc<RpcService>) -> anyhow::Result<()> {
    let app = build_router(service);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "RPC server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
