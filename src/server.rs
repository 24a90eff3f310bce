use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::bridge::{Bridge, MethodCall, Reply};
use crate::config::RememberedPolicy;
use crate::network::NetworkHandle;

pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub remembered: Option<NetworkHandle>,
    pub bound: Option<NetworkHandle>,
    pub remembered_policy: RememberedPolicy,
}

pub fn router(bridge: Arc<Bridge>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/call", post(call_handler))
        .route("/status", get(status_handler))
        .layer(cors)
        .with_state(bridge)
}

pub async fn run_server(config: ServerConfig, bridge: Arc<Bridge>) -> anyhow::Result<()> {
    let app = router(bridge.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    info!(%addr, "starting bridge server");
    println!("Serving method calls at http://localhost:{}/call", config.port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal_bridge = bridge.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            signal_bridge.shutdown();
        })
        .await?;

    bridge.session().release_join_once().await;
    info!("bridge server stopped");
    Ok(())
}

async fn call_handler(State(bridge): State<Arc<Bridge>>, Json(call): Json<MethodCall>) -> Json<Reply> {
    Json(bridge.call(call).await)
}

async fn status_handler(State(bridge): State<Arc<Bridge>>) -> Json<SessionStatus> {
    let session = bridge.session();
    Json(SessionStatus {
        remembered: session.remembered(),
        bound: session.bound_network(),
        remembered_policy: session.policy(),
    })
}
