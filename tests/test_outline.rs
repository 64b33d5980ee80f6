//! Outline generation against local mock upstreams: an OpenAI-compatible
//! chat endpoint and a Gemini `generateContent` endpoint.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::{Path, State},
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use redink_backend::config::Config;
use redink_backend::outline::{OutlineService, PageType};
use redink_backend::providers::ProviderConfigService;
use redink_backend::providers::env::{EnvLookup, fixed_env, no_env};
use redink_backend::server::{AppState, build_router};

const OUTLINE_TEXT: &str = "<page>\n[封面]\n标题：秋季穿搭\n<page>\n[内容]\n第一套\n<page>\n[总结]\n收藏起来";

#[derive(Clone)]
struct Mock {
    status: StatusCode,
    body: Value,
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    actions: Arc<Mutex<Vec<String>>>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn chat(State(mock): State<Mock>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    mock.seen.lock().unwrap().push((header_value(&headers, "authorization"), body));
    (mock.status, Json(mock.body.clone())).into_response()
}

async fn generate_content(
    State(mock): State<Mock>,
    Path(action): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.actions.lock().unwrap().push(action);
    mock.seen.lock().unwrap().push((header_value(&headers, "x-goog-api-key"), body));
    (mock.status, Json(mock.body.clone())).into_response()
}

/// Serve `body` with `status` on both mock endpoints; returns `http://addr`.
async fn spawn_upstream(mock: Mock) -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(chat))
        .route("/v1beta/models/{action}", post(generate_content))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Chat-completions base URL of a fresh mock.
async fn spawn_mock(mock: Mock) -> String {
    format!("{}/v1/", spawn_upstream(mock).await)
}

fn mock(status: StatusCode, body: Value) -> Mock {
    Mock {
        status,
        body,
        seen: Arc::new(Mutex::new(Vec::new())),
        actions: Arc::new(Mutex::new(Vec::new())),
    }
}

fn mock_env(base_url: &str) -> EnvLookup {
    fixed_env([
        ("TEXT_API_KEY", "sk-test"),
        ("TEXT_BASE_URL", base_url),
        ("TEXT_MODEL", "mock-model"),
    ])
}

fn service(base_url: &str) -> (OutlineService, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let providers = Arc::new(ProviderConfigService::with_env(dir.path(), mock_env(base_url)));
    (OutlineService::new(providers), dir)
}

fn ok_chat() -> Mock {
    mock(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "role": "assistant", "content": OUTLINE_TEXT } }] }),
    )
}

#[tokio::test]
async fn outline_is_generated_and_parsed() {
    let m = mock(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "role": "assistant", "content": OUTLINE_TEXT } }] }),
    );
    let seen = Arc::clone(&m.seen);
    let base = spawn_mock(m).await;
    let (svc, _dir) = service(&base);

    let result = svc.generate_outline("秋季穿搭", Vec::new()).await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.outline.as_deref(), Some(OUTLINE_TEXT));
    assert_eq!(result.has_images, Some(false));
    let pages = result.pages.unwrap();
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].page_type, PageType::Cover);
    assert_eq!(pages[1].page_type, PageType::Content);
    assert_eq!(pages[2].page_type, PageType::Summary);
    assert_eq!(pages[2].index, 2);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (auth, body) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["model"], "mock-model");
    assert_eq!(body["max_tokens"], 8000);
    let prompt = body["messages"][0]["content"].as_str().unwrap();
    assert!(prompt.contains("秋季穿搭"));
}

#[tokio::test]
async fn unauthorized_is_reported_as_auth_failure() {
    let m = mock(
        StatusCode::UNAUTHORIZED,
        json!({ "error": { "message": "Incorrect API key provided", "code": "invalid_api_key" } }),
    );
    let base = spawn_mock(m).await;
    let (svc, _dir) = service(&base);

    let result = svc.generate_outline("topic", Vec::new()).await;

    assert!(!result.success);
    assert!(result.pages.is_none());
    let error = result.error.unwrap();
    assert!(error.starts_with("API authentication failed."), "{error}");
    assert!(error.contains("Incorrect API key provided"));
}

#[tokio::test]
async fn rate_limit_is_reported_as_quota_failure() {
    let m = mock(
        StatusCode::TOO_MANY_REQUESTS,
        json!({ "error": { "message": "slow down" } }),
    );
    let base = spawn_mock(m).await;
    let (svc, _dir) = service(&base);

    let result = svc.generate_outline("topic", Vec::new()).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.starts_with("API quota exceeded."), "{error}");
}

#[tokio::test]
async fn empty_choices_fail_without_pages() {
    let m = mock(StatusCode::OK, json!({ "choices": [] }));
    let base = spawn_mock(m).await;
    let (svc, _dir) = service(&base);

    let result = svc.generate_outline("topic", Vec::new()).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("empty or missing content"));
}

// ── Reference images through the router ───────────────────────────────────────

fn encode_png(img: RgbImage) -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

/// Pseudo-random pixels; large enough as PNG to need compression.
fn noise_png(w: u32, h: u32) -> Vec<u8> {
    let mut state: u32 = 0x9E37_79B9;
    encode_png(RgbImage::from_fn(w, h, |_, _| {
        let mut next = || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        };
        Rgb([next(), next(), next()])
    }))
}

fn router_for(base_url: &str) -> (Router, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let config = Config::test_default(dir.path());
    let providers = Arc::new(ProviderConfigService::with_env(dir.path(), mock_env(base_url)));
    let router = build_router(AppState::new(&config, providers), &config);
    (router, dir)
}

async fn send_json(router: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

/// The single image part the upstream received, as its data URL.
fn sent_image_url(seen: &Mutex<Vec<(Option<String>, Value)>>) -> String {
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let content = &seen[0].1["messages"][0]["content"];
    assert_eq!(content[0]["type"], "text");
    assert!(content[0]["text"].as_str().unwrap().contains("用户提供了 1 张参考图片"));
    assert_eq!(content[1]["type"], "image_url");
    content[1]["image_url"]["url"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn large_json_image_is_compressed_before_upload() {
    let m = ok_chat();
    let seen = Arc::clone(&m.seen);
    let base = spawn_mock(m).await;
    let (router, _dir) = router_for(&base);

    let png = noise_png(400, 400);
    assert!(png.len() > 200 * 1024);
    let body = json!({
        "topic": "秋季穿搭",
        "images": [format!("data:image/png;base64,{}", STANDARD.encode(&png))],
    });
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/outline")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let (status, result) = send_json(router, req).await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert_eq!(result["has_images"], true);
    assert_eq!(result["pages"].as_array().unwrap().len(), 3);

    let url = sent_image_url(&seen);
    let payload = url.strip_prefix("data:image/jpeg;base64,").expect("compressed to JPEG");
    let sent = STANDARD.decode(payload).unwrap();
    assert!(sent.len() <= 200 * 1024, "sent {} bytes", sent.len());
}

#[tokio::test]
async fn multipart_image_reaches_provider() {
    let m = ok_chat();
    let seen = Arc::clone(&m.seen);
    let base = spawn_mock(m).await;
    let (router, _dir) = router_for(&base);

    let png = encode_png(RgbImage::from_pixel(16, 16, Rgb([10, 200, 90])));
    let boundary = "OUTLINEBOUNDARY";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"topic\"\r\n\r\n秋季穿搭\r\n\
         --{boundary}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"ref.png\"\r\n\
         Content-Type: image/png\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(&png);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/outline")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();

    let (status, result) = send_json(router, req).await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert_eq!(result["has_images"], true);

    // Small enough to pass through untouched.
    let url = sent_image_url(&seen);
    let payload = url.strip_prefix("data:image/png;base64,").expect("original PNG");
    assert_eq!(STANDARD.decode(payload).unwrap(), png);
}

// ── Gemini ────────────────────────────────────────────────────────────────────

fn gemini_service(root: &str) -> (OutlineService, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let yaml = format!(
        "active_provider: gemini\nproviders:\n  gemini:\n    type: google_gemini\n    api_key: gm-test-key\n    base_url: {root}/v1beta\n    model: mock-gemini\n    temperature: 0.4\n"
    );
    std::fs::write(dir.path().join("text_providers.yaml"), yaml).unwrap();
    let providers = Arc::new(ProviderConfigService::with_env(dir.path(), no_env()));
    (OutlineService::new(providers), dir)
}

#[tokio::test]
async fn gemini_outline_is_generated_and_parsed() {
    let (first, rest) = OUTLINE_TEXT.split_at(OUTLINE_TEXT.find("<page>\n[内容]").unwrap());
    let m = mock(
        StatusCode::OK,
        json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": first }, { "text": rest }] } }] }),
    );
    let seen = Arc::clone(&m.seen);
    let actions = Arc::clone(&m.actions);
    let root = spawn_upstream(m).await;
    let (svc, _dir) = gemini_service(&root);

    let result = svc.generate_outline("秋季穿搭", Vec::new()).await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.outline.as_deref(), Some(OUTLINE_TEXT));
    assert_eq!(result.pages.unwrap().len(), 3);

    assert_eq!(actions.lock().unwrap().as_slice(), ["mock-gemini:generateContent"]);
    let seen = seen.lock().unwrap();
    let (key, body) = &seen[0];
    assert_eq!(key.as_deref(), Some("gm-test-key"));
    assert_eq!(body["contents"][0]["role"], "user");
    assert!(body["contents"][0]["parts"][0]["text"].as_str().unwrap().contains("秋季穿搭"));
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 8000);
    assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.4).abs() < 1e-6);
}

#[tokio::test]
async fn gemini_missing_model_is_reported_as_model_failure() {
    let m = mock(
        StatusCode::NOT_FOUND,
        json!({ "error": { "code": 404, "message": "models/mock-gemini is not found", "status": "NOT_FOUND" } }),
    );
    let root = spawn_upstream(m).await;
    let (svc, _dir) = gemini_service(&root);

    let result = svc.generate_outline("topic", Vec::new()).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.starts_with("Model access failed."), "{error}");
    assert!(error.contains("models/mock-gemini is not found"));
}
