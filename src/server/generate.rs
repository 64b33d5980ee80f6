//! `POST /api/generate`: simulated image generation progress over SSE.
//!
//! No image is produced. One page is "started" per second: a `progress`
//! event, then 500 ms later a `complete` event pointing at
//! `/api/images/{task_id}/{index}.png`. After the last page a `finish` event
//! closes the stream.
//!
//! The timer runs in a spawned task feeding an mpsc channel. It stops as soon
//! as the receiving side (the client connection) is gone.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::json_error;

const PAGE_INTERVAL: Duration = Duration::from_secs(1);
const COMPLETE_DELAY: Duration = Duration::from_millis(500);

#[derive(Deserialize)]
pub(super) struct GenerateRequest {
    /// Only the length matters to the simulation.
    #[serde(default)]
    pages: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    task_id: Option<String>,
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum Phase {
    Cover,
    Content,
}

impl Phase {
    fn of(index: usize) -> Self {
        if index == 0 { Phase::Cover } else { Phase::Content }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum GenerationEvent {
    Progress {
        index: usize,
        status: &'static str,
        current: usize,
        total: usize,
        phase: Phase,
    },
    Complete {
        index: usize,
        status: &'static str,
        image_url: String,
        phase: Phase,
    },
    Finish {
        success: bool,
        task_id: String,
        images: Vec<String>,
        total: usize,
        completed: usize,
        failed: usize,
        failed_indices: Vec<usize>,
    },
}

impl GenerationEvent {
    fn name(&self) -> &'static str {
        match self {
            GenerationEvent::Progress { .. } => "progress",
            GenerationEvent::Complete { .. } => "complete",
            GenerationEvent::Finish { .. } => "finish",
        }
    }

    fn to_sse(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(self.name()).data(data)
    }
}

// ── Handler ───────────────────────────────────────────────────────────────────

pub(super) async fn generate(body: Result<Json<GenerateRequest>, JsonRejection>) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return json_error(rejection.status(), rejection.body_text()),
    };

    let Some(pages) = req.pages else {
        warn!("generate request without pages");
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid parameter: pages must not be empty\nprovide the list of pages to generate",
        );
    };

    let task_id = req
        .task_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| format!("task_{}", uuid::Uuid::new_v4().simple()));
    let total = pages.len();
    info!(%task_id, total, "starting image generation task");

    let (tx, rx) = mpsc::channel::<GenerationEvent>(16);
    tokio::spawn(simulate(task_id, total, tx));

    let stream = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_sse()));
    let headers = [
        ("cache-control", "no-cache"),
        ("x-accel-buffering", "no"),
    ];
    (headers, Sse::new(stream).keep_alive(KeepAlive::default())).into_response()
}

async fn simulate(task_id: String, total: usize, tx: mpsc::Sender<GenerationEvent>) {
    let mut ticker = interval(PAGE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately.
    ticker.tick().await;

    for index in 0..total {
        ticker.tick().await;

        let progress = GenerationEvent::Progress {
            index,
            status: "generating",
            current: index + 1,
            total,
            phase: Phase::of(index),
        };
        if tx.send(progress).await.is_err() {
            debug!(%task_id, index, "client disconnected, stopping simulation");
            return;
        }

        sleep(COMPLETE_DELAY).await;

        let complete = GenerationEvent::Complete {
            index,
            status: "done",
            image_url: format!("/api/images/{task_id}/{index}.png"),
            phase: Phase::of(index),
        };
        if tx.send(complete).await.is_err() {
            debug!(%task_id, index, "client disconnected, stopping simulation");
            return;
        }
    }

    let finish = GenerationEvent::Finish {
        success: true,
        task_id: task_id.clone(),
        images: (0..total).map(|i| format!("{i}.png")).collect(),
        total,
        completed: total,
        failed: 0,
        failed_indices: Vec::new(),
    };
    if tx.send(finish).await.is_ok() {
        info!(%task_id, total, "image generation task finished");
    }
}
