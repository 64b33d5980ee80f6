//! HTTP surface: axum router serving the `/api/*` endpoints.
//!
//! ## URL layout
//!
//! ```text
//! GET    /api/health
//! POST   /api/outline                     JSON or multipart
//! POST   /api/generate                    SSE progress stream
//! GET    /api/images/{task_id}/{filename} ?thumbnail=true
//! GET    /api/config
//! POST   /api/config
//! POST   /api/devices/bind
//! GET    /api/devices                     ?domain=&provider=
//! DELETE /api/devices/{device_id}         ?domain=&provider=
//! ```
//!
//! The listener is wired to a [`CancellationToken`] for graceful shutdown.

mod api;
mod generate;
mod images;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request},
    http::{HeaderName, HeaderValue, Method, StatusCode, header, request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::error::AppError;
use crate::outline::OutlineService;
use crate::providers::ProviderConfigService;

/// Header carrying the client device fingerprint.
pub const DEVICE_ID_HEADER: &str = "x-device-id";

// ── Shared request state ──────────────────────────────────────────────────────

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub providers: Arc<ProviderConfigService>,
    pub outline: OutlineService,
    pub history_dir: Arc<PathBuf>,
    pub require_device_binding: bool,
}

impl AppState {
    pub fn new(config: &Config, providers: Arc<ProviderConfigService>) -> Self {
        Self {
            outline: OutlineService::new(Arc::clone(&providers)),
            providers,
            history_dir: Arc::new(config.history_dir.clone()),
            require_device_binding: config.require_device_binding,
        }
    }
}

// ── Server loop ───────────────────────────────────────────────────────────────

/// Bind, serve until `shutdown` is cancelled, then drain.
pub async fn run(config: &Config, state: AppState, shutdown: CancellationToken) -> Result<(), AppError> {
    tokio::fs::create_dir_all(state.history_dir.as_path()).await?;

    let router = build_router(state, config);
    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Server(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("server error: {e}")))?;

    info!("server shut down");
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn build_router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/api/health",                      get(api::health))
        .route("/api/outline",                     post(api::outline))
        .route("/api/generate",                    post(generate::generate))
        .route("/api/images/{task_id}/{filename}", get(images::image))
        .route("/api/config",                      get(api::get_config).post(api::update_config))
        .route("/api/devices",                     get(api::list_devices))
        .route("/api/devices/bind",                post(api::bind_device))
        .route("/api/devices/{device_id}",         delete(api::remove_device))
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(cors_layer(&config.cors_origins))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let patterns: Arc<Vec<String>> = Arc::new(origins.to_vec());

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _: &request::Parts| {
            let allowed = origin
                .to_str()
                .map(|o| origin_allowed(&patterns, o))
                .unwrap_or(false);
            if !allowed {
                warn!(origin = ?origin, "CORS origin rejected");
            }
            allowed
        }))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(DEVICE_ID_HEADER),
        ])
}

/// Exact match, or one `*` wildcard standing for a non-empty run of
/// characters without `/` (`https://*.vercel.app`). A lone `*` admits any
/// origin.
fn origin_allowed(patterns: &[String], origin: &str) -> bool {
    patterns.iter().any(|pattern| match pattern.split_once('*') {
        None => pattern == origin,
        Some(("", "")) => true,
        Some((prefix, suffix)) => origin
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
            .is_some_and(|middle| !middle.is_empty() && !middle.contains('/')),
    })
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// `{ "success": false, "error": msg }` with `status`.
pub(crate) fn json_error(status: StatusCode, msg: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "success": false, "error": msg.to_string() }))).into_response()
}
