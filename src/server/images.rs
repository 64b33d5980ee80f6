//! `GET /api/images/{task_id}/{filename}`: generated images from history.

use std::io::ErrorKind;

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::imaging;

use super::{AppState, json_error};

#[derive(Deserialize)]
pub(super) struct ImageQuery {
    #[serde(default)]
    thumbnail: Option<String>,
}

/// Serve `<history>/<task_id>/<filename>`. With `thumbnail=true` prefer
/// `thumb_<filename>` and fall back to the full image.
pub(super) async fn image(
    State(state): State<AppState>,
    Path((task_id, filename)): Path<(String, String)>,
    Query(query): Query<ImageQuery>,
) -> Response {
    if !is_safe_segment(&task_id) || !is_safe_segment(&filename) {
        warn!(%task_id, %filename, "rejected image path");
        return json_error(StatusCode::BAD_REQUEST, "invalid image path");
    }

    let task_dir = state.history_dir.join(&task_id);
    let full = task_dir.join(&filename);

    let path = if query.thumbnail.as_deref() == Some("true") {
        let thumb = task_dir.join(format!("thumb_{filename}"));
        if tokio::fs::try_exists(&thumb).await.unwrap_or(false) {
            thumb
        } else {
            debug!(%task_id, %filename, "no thumbnail, serving full image");
            full
        }
    } else {
        full
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = imaging::sniff_mime(&bytes);
            ([(header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            json_error(StatusCode::NOT_FOUND, format!("image not found: {task_id}/{filename}"))
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read image");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to read image: {e}"))
        }
    }
}

/// One path component: no separators, no `.`/`..`, nothing empty.
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}
