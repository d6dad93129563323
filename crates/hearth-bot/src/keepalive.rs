use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::{Json, Router, routing::get};
use hearth_session::{AccountClient, CookieProvider, SessionManager};
use serde::Serialize;

/// Read-only view of the session for health reporting.
pub trait SessionProbe: Send + Sync {
    fn session_active(&self) -> bool;
}

impl<C: AccountClient, P: CookieProvider> SessionProbe for SessionManager<C, P> {
    fn session_active(&self) -> bool {
        self.is_active()
    }
}

pub type Probe = Arc<dyn SessionProbe>;

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    session_active: bool,
}

async fn alive() -> &'static str {
    "I'm alive!"
}

async fn healthz(State(probe): State<Probe>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        session_active: probe.session_active(),
    })
}

pub fn router(probe: Probe) -> Router {
    Router::new()
        .route("/", get(alive))
        .route("/healthz", get(healthz))
        .with_state(probe)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown requested");
    }
}

/// Serves the keep-alive endpoints until Ctrl-C or a listener failure.
pub async fn serve(port: u16, probe: Probe) -> anyhow::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind keep-alive listener on {addr}"))?;
    tracing::info!(%addr, "keep-alive HTTP listening");
    axum::serve(listener, router(probe))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
