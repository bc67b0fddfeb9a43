//! Push-webhook listener.

mod hooks;

use std::{net::SocketAddr, sync::Arc, time::Duration, time::Instant};

use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self as axum_middleware, Next},
    response::Response,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::application::coordinator::RunCoordinator;
use crate::domain::deployments::Branches;
use crate::infra::error::InfraError;

pub use hooks::PushResponse;

#[derive(Clone)]
pub struct HookState {
    pub coordinator: RunCoordinator,
    pub branches: Branches,
    pub secret: Arc<str>,
}

pub fn build_router(state: HookState) -> Router {
    let hooks = Router::new()
        .route("/hooks/push", post(hooks::push))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            hooks::require_secret,
        ))
        .with_state(state);

    Router::new()
        .route("/healthz", get(healthz))
        .merge(hooks)
        .layer(axum_middleware::from_fn(log_responses))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis() as u64;

    if status.is_client_error() || status.is_server_error() {
        warn!(
            target = "pageship::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            "request failed"
        );
    } else {
        info!(
            target = "pageship::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            "request served"
        );
    }
    response
}

/// Serve the webhook router until ctrl-c, then give in-flight runs up to
/// `drain` to finish before aborting them.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    coordinator: RunCoordinator,
    drain: Duration,
) -> Result<(), InfraError> {
    let listener = TcpListener::bind(addr).await?;
    info!(
        target = "pageship::http",
        addr = %listener.local_addr()?,
        "webhook listener started"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !coordinator.wait_idle(drain).await {
        warn!(
            target = "pageship::http",
            active = coordinator.active().len(),
            drain_secs = drain.as_secs(),
            "runs still in flight after drain period; aborting"
        );
    }
    coordinator.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target = "pageship::http",
            error = %err,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "pageship::http", "shutdown signal received");
}
