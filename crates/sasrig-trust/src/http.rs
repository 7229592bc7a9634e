//! CRL distribution over HTTP.
//!
//! Serves the store's revocation list at `GET /crl` plus a liveness probe at
//! `GET /healthz`. Handlers read the CRL file per request, so a store swap is
//! visible immediately without restarting the listener. [`CrlService`] wraps
//! the listener in a start/stop controller the lifecycle can rebind after a
//! regeneration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::error::TrustError;
use crate::store::{RecordKind, StorePaths};

/// Media type for DER or PEM revocation lists per RFC 5280 conventions.
pub const CRL_CONTENT_TYPE: &str = "application/pkix-crl";

/// URL harness processes should fetch the CRL from.
pub fn crl_url(addr: SocketAddr) -> String {
    format!("http://{addr}/crl")
}

/// Build the CRL router over `store`.
pub fn routes(store: StorePaths) -> Router {
    Router::new()
        .route("/crl", get(crl_handler))
        .route("/healthz", get(healthz_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(store))
}

/// GET /crl — the current revocation list, straight from the store.
async fn crl_handler(State(store): State<Arc<StorePaths>>) -> impl IntoResponse {
    let path = store.cert_path(RecordKind::Crl);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CRL_CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => error_response(
            StatusCode::NOT_FOUND,
            &TrustError::MissingCertificate {
                kind: RecordKind::Crl,
                path,
            },
        ),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &TrustError::Internal(format!("reading {}: {err}", path.display())),
        ),
    }
}

/// GET /healthz — liveness probe.
async fn healthz_handler() -> &'static str {
    "OK"
}

fn error_response(status: StatusCode, error: &TrustError) -> axum::response::Response {
    let code = sasrig_common::error::ErrorCode::from(error);
    let body = serde_json::json!({
        "error": code,
        "message": error.to_string(),
    });
    (status, Json(body)).into_response()
}

// ── Service controller ──────────────────────────────────────────────

struct ServiceState {
    local_addr: Option<SocketAddr>,
    cancel: Option<CancellationToken>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Start/stop controller for the CRL listener.
///
/// `addr` may carry port 0; [`CrlService::start`] returns the actually bound
/// address. Stopping drains in-flight requests before returning.
pub struct CrlService {
    store: StorePaths,
    addr: SocketAddr,
    state: tokio::sync::Mutex<ServiceState>,
}

impl CrlService {
    pub fn new(store: StorePaths, addr: SocketAddr) -> Self {
        Self {
            store,
            addr,
            state: tokio::sync::Mutex::new(ServiceState {
                local_addr: None,
                cancel: None,
                task: None,
            }),
        }
    }

    pub fn store(&self) -> &StorePaths {
        &self.store
    }

    /// Bind and serve. Returns the bound address; idempotent while running.
    pub async fn start(&self) -> Result<SocketAddr, TrustError> {
        let mut state = self.state.lock().await;
        if let Some(addr) = state.local_addr {
            return Ok(addr);
        }

        let listener =
            tokio::net::TcpListener::bind(self.addr)
                .await
                .map_err(|source| TrustError::BindFailure {
                    addr: self.addr,
                    source,
                })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TrustError::BindFailure {
                addr: self.addr,
                source,
            })?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let app = routes(self.store.clone());
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "CRL service stopped with error");
            }
        });

        state.local_addr = Some(local_addr);
        state.cancel = Some(cancel);
        state.task = Some(task);

        tracing::info!(addr = %local_addr, "CRL service listening");
        Ok(local_addr)
    }

    /// Signal shutdown and wait for the serve task to drain. Returns whether
    /// a running listener was stopped.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(cancel) = state.cancel.take() else {
            return false;
        };
        cancel.cancel();
        state.local_addr = None;
        if let Some(task) = state.task.take() {
            let _ = task.await;
        }
        tracing::info!("CRL service stopped");
        true
    }

    /// Stop if running, then bind again on the configured address.
    pub async fn restart(&self) -> Result<SocketAddr, TrustError> {
        self.stop().await;
        self.start().await
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.cancel.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.local_addr
    }
}
