//! HTTP webhook transport for push notifications.
//!
//! Routes:
//! - `POST /webhook` - indexer notifications (single object or array)
//! - `GET /health` - liveness probe, never authenticated
//!
//! When an auth token is configured, `/webhook` requires it in the
//! `Authorization` header, either bare (as Helius sends it) or as
//! `Bearer <token>`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{Level, debug, info, warn};

use crate::Result;
use crate::source::{PushIngestor, PushTransport};

/// Configuration for the webhook listener.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Address to bind, e.g. `0.0.0.0:3000`.
    pub bind_addr: String,

    /// Shared secret expected in the `Authorization` header.
    pub auth_token: Option<String>,

    /// How long `stop` waits for in-flight requests before aborting the server.
    pub shutdown_grace: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            auth_token: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    ingestor: PushIngestor,
    auth_token: Option<Arc<str>>,
}

impl WebhookState {
    pub fn new(ingestor: PushIngestor, auth_token: Option<&str>) -> Self {
        Self {
            ingestor,
            auth_token: auth_token.map(Arc::from),
        }
    }
}

/// Response body for `POST /webhook`.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    accepted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Build the webhook router.
pub fn router(state: WebhookState) -> Router {
    let protected = Router::new()
        .route("/webhook", post(receive))
        .layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .with_state(state)
}

async fn receive(State(state): State<WebhookState>, body: Bytes) -> (StatusCode, Json<WebhookResponse>) {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            counter!("detector_push_malformed_total").increment(1);
            warn!("Rejecting webhook body that is not JSON: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(WebhookResponse {
                    accepted: 0,
                    error: Some(format!("invalid JSON: {e}")),
                }),
            );
        }
    };

    let accepted = state.ingestor.on_notification(&payload);
    (
        StatusCode::OK,
        Json(WebhookResponse {
            accepted,
            error: None,
        }),
    )
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn require_token(
    State(state): State<WebhookState>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    let Some(expected) = state.auth_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|header| header.strip_prefix("Bearer ").unwrap_or(header));

    if provided != Some(expected) {
        debug!("webhook request with missing or invalid authorization");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// Axum listener implementing [`PushTransport`].
pub struct WebhookServer {
    config: WebhookConfig,
    running: Mutex<Option<RunningServer>>,
}

impl WebhookServer {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    /// Address actually bound, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|server| server.addr)
    }
}

#[async_trait]
impl PushTransport for WebhookServer {
    async fn start(&self, ingestor: PushIngestor) -> Result<()> {
        if let Some(addr) = self.local_addr() {
            warn!("Webhook server already listening on {}", addr);
            return Ok(());
        }

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let addr = listener.local_addr()?;

        let state = WebhookState::new(ingestor, self.config.auth_token.as_deref());
        let app = router(state).layer(TraceLayer::new_for_http().make_span_with(
            |request: &Request<_>| {
                tracing::span!(
                    Level::DEBUG,
                    "webhook_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            },
        ));

        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await
        });

        *self.running.lock() = Some(RunningServer {
            addr,
            shutdown,
            task,
        });
        info!("Webhook server listening on {}", addr);
        Ok(())
    }

    async fn stop(&self) {
        let Some(server) = self.running.lock().take() else {
            return;
        };

        let _ = server.shutdown.send(());
        let abort = server.task.abort_handle();
        match tokio::time::timeout(self.config.shutdown_grace, server.task).await {
            Ok(Ok(Ok(()))) => info!("Webhook server on {} stopped", server.addr),
            Ok(Ok(Err(e))) => warn!("Webhook server exited with error: {}", e),
            Ok(Err(e)) => warn!("Webhook server task failed: {}", e),
            Err(_) => {
                warn!(
                    "Webhook server did not drain within {:?}, aborting",
                    self.config.shutdown_grace
                );
                abort.abort();
            }
        }
    }
}
