//! JSON handlers: health, outline, provider config and device bindings.

use std::time::Instant;

use axum::{
    Json,
    extract::{FromRequest, Multipart, Path, Query, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::imaging;
use crate::providers::devices::{DeviceError, DeviceRegistry};
use crate::providers::store::{ProvidersUpdate, masked_view};
use crate::providers::{ConfigError, Domain, ProviderConfigService};

use super::{AppState, DEVICE_ID_HEADER, json_error};

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub(super) struct OutlineRequest {
    #[serde(default)]
    topic: Option<String>,
    /// Base64 strings, with or without a `data:` prefix.
    #[serde(default)]
    images: Option<Vec<String>>,
}

#[derive(Deserialize)]
pub(super) struct ConfigUpdate {
    #[serde(default)]
    image_generation: Option<ProvidersUpdate>,
    #[serde(default)]
    text_generation: Option<ProvidersUpdate>,
}

#[derive(Deserialize)]
pub(super) struct BindRequest {
    #[serde(default)]
    domain: Option<Domain>,
    #[serde(default)]
    provider: Option<String>,
    device_id: String,
    #[serde(default)]
    device_name: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct DeviceQuery {
    #[serde(default)]
    domain: Option<Domain>,
    #[serde(default)]
    provider: Option<String>,
}

// ── Health ────────────────────────────────────────────────────────────────────

/// GET /api/health
pub(super) async fn health() -> Response {
    Json(json!({ "success": true, "message": "service is running" })).into_response()
}

// ── Outline ───────────────────────────────────────────────────────────────────

/// POST /api/outline: JSON `{topic, images?}` or multipart `topic` + `images`.
pub(super) async fn outline(State(state): State<AppState>, req: Request) -> Response {
    if state.require_device_binding {
        if let Err(rejected) = check_device(&state, req.headers()).await {
            return rejected;
        }
    }

    let input = if is_multipart(req.headers()) {
        read_multipart(req, &state).await
    } else {
        read_json(req, &state).await
    };
    let (topic, images) = match input {
        Ok(input) => input,
        Err(rejected) => return rejected,
    };

    let Some(topic) = topic.filter(|t| !t.trim().is_empty()) else {
        warn!("outline request without topic");
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid parameter: topic must not be empty\nprovide the topic to build the post around",
        );
    };

    let started = Instant::now();
    let result = state.outline.generate_outline(&topic, images).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if result.success {
        info!(elapsed_ms, pages = result.pages.as_ref().map_or(0, Vec::len), "outline generated");
        (StatusCode::OK, Json(result)).into_response()
    } else {
        error!(elapsed_ms, "outline generation failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(result)).into_response()
    }
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

type OutlineInput = (Option<String>, Vec<Vec<u8>>);

async fn read_multipart(req: Request, state: &AppState) -> Result<OutlineInput, Response> {
    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(IntoResponse::into_response)?;

    let mut topic = None;
    let mut images = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(json_error(StatusCode::BAD_REQUEST, format!("invalid multipart body: {e}"))),
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("topic") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| json_error(StatusCode::BAD_REQUEST, format!("invalid topic field: {e}")))?;
                topic = Some(text);
            }
            Some("images") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| json_error(StatusCode::BAD_REQUEST, format!("invalid image upload: {e}")))?;
                images.push(bytes.to_vec());
            }
            other => debug!(field = ?other, "ignoring multipart field"),
        }
    }

    debug!(images = images.len(), "multipart outline request");
    Ok((topic, images))
}

async fn read_json(req: Request, state: &AppState) -> Result<OutlineInput, Response> {
    let body = match Json::<OutlineRequest>::from_request(req, state).await {
        Ok(Json(body)) => body,
        Err(rejection) => return Err(json_rejection(rejection)),
    };

    let mut images = Vec::new();
    for (i, img) in body.images.unwrap_or_default().iter().enumerate() {
        match imaging::decode_base64_image(img) {
            Ok(bytes) => images.push(bytes),
            Err(e) => {
                warn!(index = i, error = %e, "undecodable reference image");
                return Err(json_error(
                    StatusCode::BAD_REQUEST,
                    format!("invalid parameter: images[{i}] is not valid base64\nsend each image as base64, with or without a data: prefix"),
                ));
            }
        }
    }
    Ok((body.topic, images))
}

/// Reject the request unless its `X-Device-ID` may use the active text provider.
async fn check_device(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(device_id) = headers
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
    else {
        warn!("request without device id");
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "device verification failed: missing device id\nmake sure the frontend is up to date",
        ));
    };

    let checked = state
        .providers
        .blocking(move |svc| -> Result<_, DeviceError> {
            let provider = svc.active_provider(Domain::Text)?;
            DeviceRegistry::new(svc, Domain::Text).validate(&provider, &device_id)
        })
        .await;

    match checked {
        Ok(result) if result.is_allowed() => Ok(()),
        Ok(result) => Err(json_error(
            StatusCode::FORBIDDEN,
            format!(
                "device verification failed: {}\nfix: save the API key again on the settings page to bind this device; bindings expire after 24 hours",
                result.message()
            ),
        )),
        Err(e) => Err(device_error(e)),
    }
}

// ── Provider config ───────────────────────────────────────────────────────────

/// GET /api/config: both domains with secrets masked.
pub(super) async fn get_config(State(state): State<AppState>) -> Response {
    let loaded = state
        .providers
        .blocking(|svc| -> Result<_, ConfigError> { Ok((svc.load(Domain::Text)?, svc.load(Domain::Image)?)) })
        .await;

    match loaded {
        Ok((text, image)) => Json(json!({
            "success": true,
            "config": {
                "text_generation": masked_view(&text),
                "image_generation": masked_view(&image),
            }
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "failed to load provider config");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to load config: {e}"))
        }
    }
}

/// POST /api/config: merge, save, reload.
pub(super) async fn update_config(
    State(state): State<AppState>,
    body: Result<Json<ConfigUpdate>, JsonRejection>,
) -> Response {
    let Json(update) = match body {
        Ok(body) => body,
        Err(rejection) => return json_rejection(rejection),
    };

    let applied = state
        .providers
        .blocking(move |svc| {
            let applied = apply(svc, Domain::Image, update.image_generation)
                .and_then(|_| apply(svc, Domain::Text, update.text_generation));
            svc.reload();
            applied
        })
        .await;

    match applied {
        Ok(()) => Json(json!({ "success": true, "message": "config saved" })).into_response(),
        Err(e) => {
            error!(error = %e, "failed to update provider config");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to update config: {e}"))
        }
    }
}

fn apply(svc: &ProviderConfigService, domain: Domain, update: Option<ProvidersUpdate>) -> Result<(), ConfigError> {
    match update {
        Some(update) => svc.apply_update(domain, update),
        None => Ok(()),
    }
}

// ── Devices ───────────────────────────────────────────────────────────────────

/// POST /api/devices/bind
pub(super) async fn bind_device(
    State(state): State<AppState>,
    body: Result<Json<BindRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return json_rejection(rejection),
    };
    if req.device_id.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "invalid parameter: device_id must not be empty");
    }

    let domain = req.domain.unwrap_or(Domain::Text);
    let bound = state
        .providers
        .blocking(move |svc| -> Result<_, DeviceError> {
            let provider = provider_or_active(svc, domain, req.provider)?;
            let outcome = DeviceRegistry::new(svc, domain).bind(&provider, req.device_id.trim(), req.device_name.as_deref())?;
            Ok((provider, outcome))
        })
        .await;

    match bound {
        Ok((provider, outcome)) => Json(json!({
            "success": true,
            "provider": provider,
            "outcome": outcome,
            "message": "device bound",
        }))
        .into_response(),
        Err(e) => device_error(e),
    }
}

/// GET /api/devices?domain=&provider=
pub(super) async fn list_devices(State(state): State<AppState>, Query(query): Query<DeviceQuery>) -> Response {
    let domain = query.domain.unwrap_or(Domain::Text);
    let listed = state
        .providers
        .blocking(move |svc| -> Result<_, DeviceError> {
            let provider = provider_or_active(svc, domain, query.provider)?;
            let devices = DeviceRegistry::new(svc, domain).list(&provider)?;
            Ok((provider, devices))
        })
        .await;

    match listed {
        Ok((provider, devices)) => Json(json!({
            "success": true,
            "provider": provider,
            "devices": devices,
        }))
        .into_response(),
        Err(e) => device_error(e),
    }
}

/// DELETE /api/devices/{device_id}?domain=&provider=
pub(super) async fn remove_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let domain = query.domain.unwrap_or(Domain::Text);
    let removed = state
        .providers
        .blocking(move |svc| -> Result<_, DeviceError> {
            let provider = provider_or_active(svc, domain, query.provider)?;
            DeviceRegistry::new(svc, domain).remove(&provider, &device_id)
        })
        .await;

    match removed {
        Ok(()) => Json(json!({ "success": true, "message": "device removed" })).into_response(),
        Err(e) => device_error(e),
    }
}

fn provider_or_active(svc: &ProviderConfigService, domain: Domain, requested: Option<String>) -> Result<String, ConfigError> {
    match requested.filter(|p| !p.trim().is_empty()) {
        Some(p) => Ok(p),
        None => svc.active_provider(domain),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn device_error(e: DeviceError) -> Response {
    let status = match &e {
        DeviceError::UnknownProvider(_) | DeviceError::NotBound(_) => StatusCode::NOT_FOUND,
        DeviceError::LimitReached { .. } | DeviceError::EnvManaged(_) => StatusCode::CONFLICT,
        DeviceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(%status, error = %e, "device request failed");
    json_error(status, e)
}

fn json_rejection(rejection: JsonRejection) -> Response {
    warn!(error = %rejection.body_text(), "rejected JSON body");
    json_error(rejection.status(), rejection.body_text())
}
