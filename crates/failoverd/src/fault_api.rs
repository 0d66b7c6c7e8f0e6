//! Fault Injection HTTP Endpoint
//!
//! Lets an operator or test harness declare a link failed or restored
//! without touching the physical topology.
//!
//! | Route           | Result                                        |
//! |-----------------|-----------------------------------------------|
//! | `POST /failure` | 200 `Failure injected on {a}-{b}`             |
//! | `POST /restore` | 200 `Restore injected on {a}-{b}`             |
//! | `GET /status`   | 200 JSON controller snapshot                  |
//! | `GET /metrics`  | 200 Prometheus text                           |
//! | anything else   | 404 `Invalid endpoint.`                       |
//!
//! A fault request without `Content-Length` gets 411, a body that does not
//! carry integer `a` and `b` fields gets 500. Neither mutates state.
//!
//! The server runs on its own OS thread with a dedicated runtime so that a
//! stalled client can never hold up event ingress.

use crate::controller::FailoverController;
use crate::error::{FailoverError, Result};
use crate::types::{Dpid, FaultKind};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};

#[derive(Clone)]
struct ApiState {
    controller: Arc<FailoverController>,
}

/// Builds the endpoint's router.
pub fn router(controller: Arc<FailoverController>) -> Router {
    Router::new()
        .route("/failure", post(failure_handler))
        .route("/restore", post(restore_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found)
        .with_state(ApiState { controller })
}

async fn failure_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_fault(&state.controller, FaultKind::Fail, &headers, &body)
}

async fn restore_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_fault(&state.controller, FaultKind::Restore, &headers, &body)
}

#[instrument(skip_all, fields(kind = %kind))]
fn handle_fault(
    controller: &FailoverController,
    kind: FaultKind,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let (status, message) = if !headers.contains_key(header::CONTENT_LENGTH) {
        warn!("Fault request without Content-Length");
        (
            StatusCode::LENGTH_REQUIRED,
            "Missing Content-Length".to_string(),
        )
    } else {
        match inject(controller, kind, body) {
            Ok((a, b)) => {
                let verb = match kind {
                    FaultKind::Fail => "Failure",
                    FaultKind::Restore => "Restore",
                };
                (StatusCode::OK, format!("{} injected on {}-{}", verb, a, b))
            }
            Err(e) => {
                error!(error = %e, "Fault request rejected");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Server error: {}", e),
                )
            }
        }
    };

    controller
        .metrics()
        .fault_requests_total
        .with_label_values(&[kind.as_str(), status.as_str()])
        .inc();
    (status, message).into_response()
}

fn inject(controller: &FailoverController, kind: FaultKind, body: &[u8]) -> Result<(Dpid, Dpid)> {
    let (a, b) = parse_fault_form(body)?;
    controller.external_fault(a, b, kind)?;
    Ok((a, b))
}

async fn status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.controller.snapshot())
}

async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.controller.metrics().gather(),
    )
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Invalid endpoint.")
}

/// Raw fault request fields, decoded before integer validation so that a
/// bad value reports which field was wrong.
#[derive(Debug, Deserialize)]
struct FaultForm {
    a: Option<String>,
    b: Option<String>,
}

/// Extracts the integer link endpoints `a` and `b` from a form-encoded body.
///
/// The body is decoded as `application/x-www-form-urlencoded` whatever the
/// request's content type.
pub fn parse_fault_form(body: &[u8]) -> Result<(Dpid, Dpid)> {
    let form: FaultForm = serde_urlencoded::from_bytes(body)
        .map_err(|e| FailoverError::MalformedRequest(e.to_string()))?;
    Ok((
        parse_field("a", form.a.as_deref())?,
        parse_field("b", form.b.as_deref())?,
    ))
}

fn parse_field(name: &str, raw: Option<&str>) -> Result<Dpid> {
    let raw = raw.ok_or_else(|| {
        FailoverError::MalformedRequest(format!("missing field '{}'", name))
    })?;
    raw.trim().parse().map_err(|_| {
        FailoverError::MalformedRequest(format!(
            "field '{}' is not an integer: {:?}",
            name, raw
        ))
    })
}

/// Running endpoint. Dropping the handle signals the server to stop without
/// waiting for it.
pub struct FaultApiHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FaultApiHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting requests and waits for the server thread to exit.
    pub fn shutdown(mut self) {
        self.signal_stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Fault API thread panicked");
            }
        }
    }

    fn signal_stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for FaultApiHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Binds `addr` and serves the endpoint on a dedicated thread.
///
/// The socket is bound before this returns, so bind errors surface here and
/// `local_addr()` reports the actual port when `addr` asks for port 0.
pub fn spawn_fault_api(
    controller: Arc<FailoverController>,
    addr: SocketAddr,
) -> Result<FaultApiHandle> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let thread = thread::Builder::new()
        .name("fault-api".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!(error = %e, "Failed to adopt fault API socket");
                        return;
                    }
                };
                info!("Fault injection endpoint listening on http://{}", local_addr);

                let served = axum::serve(listener, router(controller))
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
                match served {
                    Ok(()) => info!("Fault injection endpoint stopped"),
                    Err(e) => error!(error = %e, "Fault injection endpoint failed"),
                }
            });
        })?;

    Ok(FaultApiHandle {
        local_addr,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    })
}
