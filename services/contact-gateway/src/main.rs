//! Bitrix24 Contact Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads the portal/OAuth configuration and the persisted token pair
//! 2. Serves the contact console API (list/create/update/delete)
//! 3. Proxies each operation to the Bitrix24 REST API with transparent
//!    expired-token refresh (single-flight, replay-once)
//! 4. Completes the OAuth flow via /oauth/callback and persists new pairs

mod api;
mod config;
mod error;
mod metrics;
mod oauth;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use bitrix_auth::{OAuthApp, TokenStore};
use bitrix_rest::RestClient;
use contacts::ContactService;

use crate::config::Config;

/// Drain timeout for graceful shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime counters surfaced by /health.
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ContactService>,
    pub client: Arc<RestClient>,
    pub store: Arc<TokenStore>,
    pub http: reqwest::Client,
    pub domain: String,
    pub oauth_app: OAuthApp,
    pub metrics: ServiceMetrics,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route(
            "/contacts",
            get(api::list_contacts).post(api::create_contact),
        )
        .route(
            "/contacts/{id}",
            put(api::update_contact).delete(api::delete_contact),
        )
        .route("/oauth/callback", get(oauth::oauth_callback))
        .route("/oauth/refresh", get(oauth::refresh_tokens))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting contact-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        domain = %config.bitrix.domain,
        client_id = %config.bitrix.client_id,
        "configuration loaded"
    );

    let client_secret = config.bitrix.client_secret.clone().context(
        "bitrix client secret not configured — set BITRIX_CLIENT_SECRET or client_secret_file",
    )?;

    if let Some(parent) = config.bitrix.token_file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = Arc::new(
        TokenStore::load(config.bitrix.token_file.clone())
            .await
            .context("failed to load token file")?,
    );
    if store.is_empty().await {
        warn!("no stored credentials — CRM calls will fail until /oauth/callback completes");
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let oauth_app = OAuthApp {
        client_id: config.bitrix.client_id.clone(),
        client_secret,
    };
    let client = Arc::new(RestClient::new(
        http.clone(),
        config.bitrix.domain.clone(),
        oauth_app.clone(),
        store.clone(),
    ));
    let service = Arc::new(ContactService::new(client.clone()));

    let state = AppState {
        service,
        client,
        store,
        http,
        domain: config.bitrix.domain.clone(),
        oauth_app,
        metrics: ServiceMetrics::new(),
        prometheus: prometheus_handle,
    };

    let app = build_router(state, config.server.max_connections);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "accepting requests");

    // Graceful shutdown with drain timeout enforcement:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting new connections and drains in-flight requests
    // 3. DRAIN_TIMEOUT bounds how long a slow client can block process exit
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Per-request tracking: counters, Prometheus labels, and a request-scoped
/// log line carrying a generated request ID.
async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let started = Instant::now();

    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let response = next.run(request).await;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    metrics::record_request(status.as_u16(), &method, started.elapsed().as_secs_f64());
    debug!(request_id, method, path, status = status.as_u16(), "request completed");

    response
}

/// Health endpoint: 200 when a token pair is stored, 503 while the OAuth
/// flow hasn't completed yet.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);
    let has_credentials = !state.store.is_empty().await;

    let (status_code, body) = if has_credentials {
        (
            axum::http::StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "credentials": "present",
                "uptime_seconds": uptime,
                "requests_served": requests,
                "errors_total": errors,
            }),
        )
    } else {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "degraded",
                "credentials": "absent",
                "uptime_seconds": uptime,
                "requests_served": requests,
                "errors_total": errors,
            }),
        )
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::body::Body;
    use axum::extract::Path as AxumPath;
    use axum::http::{Request as HttpRequest, StatusCode};
    use bitrix_auth::Credentials;
    use common::SecretString;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    /// Create a PrometheusHandle for tests without installing a global
    /// recorder (only one global recorder may exist per process).
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    /// How the fake portal behaves.
    #[derive(Clone, Copy)]
    enum PortalMode {
        Happy,
        AlwaysExpired,
    }

    /// Start a fake Bitrix portal serving /rest/* and /oauth/token/.
    async fn start_portal(mode: PortalMode) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let app = Router::new()
                .route(
                    "/rest/{*method}",
                    axum::routing::post(move |AxumPath(method): AxumPath<String>| async move {
                        match mode {
                            PortalMode::AlwaysExpired => (
                                StatusCode::UNAUTHORIZED,
                                Json(json!({
                                    "error": "expired_token",
                                    "error_description": "The access token provided has expired"
                                })),
                            ),
                            PortalMode::Happy => {
                                let envelope = match method.as_str() {
                                    "crm.contact.list" => json!({
                                        "result": [{
                                            "ID": "1",
                                            "NAME": "Anh",
                                            "PHONE": [{
                                                "ID": "5",
                                                "VALUE": "+84912345678",
                                                "VALUE_TYPE": "WORK",
                                                "TYPE_ID": "PHONE"
                                            }],
                                        }],
                                        "total": 7,
                                    }),
                                    m if m.ends_with(".add") => json!({ "result": 9 }),
                                    m if m.ends_with(".list") => json!({ "result": [] }),
                                    _ => json!({ "result": true }),
                                };
                                (StatusCode::OK, Json(envelope))
                            }
                        }
                    }),
                )
                .route(
                    "/oauth/token/",
                    get(move || async move {
                        match mode {
                            PortalMode::Happy => (
                                StatusCode::OK,
                                Json(json!({
                                    "access_token": "at_new",
                                    "refresh_token": "rt_new",
                                    "expires_in": 3600,
                                    "domain": "example.bitrix24.vn",
                                })),
                            ),
                            PortalMode::AlwaysExpired => (
                                StatusCode::BAD_REQUEST,
                                Json(json!({ "error": "invalid_grant" })),
                            ),
                        }
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}")
    }

    /// Build test app state against the given portal, optionally with a
    /// stored token pair.
    async fn test_state(domain: &str, dir: &tempfile::TempDir, seeded: bool) -> AppState {
        let store = TokenStore::load(dir.path().join("tokens.json")).await.unwrap();
        if seeded {
            store
                .replace(Credentials {
                    access_token: "at_test".into(),
                    refresh_token: "rt_test".into(),
                })
                .await
                .unwrap();
        }
        let store = Arc::new(store);

        let http = reqwest::Client::new();
        let oauth_app = OAuthApp {
            client_id: "local.app.test".into(),
            client_secret: SecretString::new("s3cret"),
        };
        let client = Arc::new(RestClient::new(
            http.clone(),
            domain,
            oauth_app.clone(),
            store.clone(),
        ));

        AppState {
            service: Arc::new(ContactService::new(client.clone())),
            client,
            store,
            http,
            domain: domain.to_string(),
            oauth_app,
            metrics: ServiceMetrics::new(),
            prometheus: test_prometheus_handle(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_healthy_with_stored_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state("http://unused", &dir, true).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["credentials"], "present");
    }

    #[tokio::test]
    async fn health_is_degraded_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state("http://unused", &dir, false).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["credentials"], "absent");
    }

    #[tokio::test]
    async fn list_without_access_token_is_rejected_locally() {
        let dir = tempfile::tempdir().unwrap();
        // Portal deliberately unreachable: validation must trip first
        let state = test_state("http://127.0.0.1:1", &dir, true).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/contacts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Access token is required");
    }

    #[tokio::test]
    async fn create_without_contact_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state("http://127.0.0.1:1", &dir, true).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/contacts?access_token=t")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Contact data is required");
    }

    #[tokio::test]
    async fn list_returns_normalized_contacts_with_pagination() {
        let portal = start_portal(PortalMode::Happy).await;
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&portal, &dir, true).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/contacts?access_token=t&search=Anh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["contacts"][0]["NAME"], "Anh");
        assert_eq!(
            body["contacts"][0]["PHONE"][0]["VALUE"], "0912345678",
            "phone comes back in local form"
        );
        assert_eq!(body["pagination"]["total"], 7);
        assert_eq!(body["pagination"]["start"], 0);
    }

    #[tokio::test]
    async fn delete_passes_the_crm_result_through() {
        let portal = start_portal(PortalMode::Happy).await;
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&portal, &dir, true).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("DELETE")
                    .uri("/contacts/23?access_token=t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["deleted"], true);
    }

    #[tokio::test]
    async fn unauthorized_after_failed_refresh_maps_to_401() {
        let portal = start_portal(PortalMode::AlwaysExpired).await;
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&portal, &dir, true).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/contacts?access_token=t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(
            body["error"],
            "Unauthorized access. Please check your access token."
        );
    }

    #[tokio::test]
    async fn oauth_callback_without_code_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state("http://127.0.0.1:1", &dir, false).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/oauth/callback")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "No authorization code provided");
    }

    #[tokio::test]
    async fn oauth_callback_stores_the_exchanged_pair() {
        let portal = start_portal(PortalMode::Happy).await;
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&portal, &dir, false).await;
        let store = state.store.clone();
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/oauth/callback?code=auth_code_1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["access_token"], "at_new");

        let stored = store.get().await.unwrap();
        assert_eq!(stored.access_token, "at_new");
        assert_eq!(stored.refresh_token, "rt_new");
    }

    #[tokio::test]
    async fn oauth_refresh_returns_the_new_pair() {
        let portal = start_portal(PortalMode::Happy).await;
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&portal, &dir, true).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/oauth/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["access_token"], "at_new");
        assert_eq!(body["refresh_token"], "rt_new");
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_exposition_format() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state("http://unused", &dir, true).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
    }
}
