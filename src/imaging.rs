//! Reference-image helpers: size-bounded compression and base64 plumbing.
//!
//! Uploaded reference images are squeezed under a byte ceiling before being
//! inlined into provider requests. Compression is best-effort: whatever goes
//! wrong, the caller gets usable bytes back.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, warn};

/// Ceiling applied to reference images sent to text providers.
pub const REFERENCE_IMAGE_MAX_KB: usize = 200;

const START_QUALITY: u8 = 80;
const QUALITY_STEP: u8 = 10;
const MIN_QUALITY: u8 = 10;
const RESIZE_FACTOR: f32 = 0.8;
const RESIZED_QUALITY: u8 = 60;

/// Compress every image on tokio's blocking pool, preserving order.
pub async fn compress_all(images: Vec<Vec<u8>>, max_kb: usize) -> Result<Vec<Vec<u8>>, tokio::task::JoinError> {
    if images.is_empty() {
        return Ok(images);
    }
    tokio::task::spawn_blocking(move || images.iter().map(|img| compress_image(img, max_kb)).collect()).await
}

/// Re-encode `bytes` as JPEG until it fits in `max_kb` kilobytes.
///
/// Quality starts at 80 and drops by 10 while the output is too large. If
/// quality 10 is still too large the image is scaled to 80 % width and encoded
/// once more at quality 60, whatever the resulting size. Input already within
/// the ceiling, or input that cannot be decoded, is returned unchanged.
pub fn compress_image(bytes: &[u8], max_kb: usize) -> Vec<u8> {
    let limit = max_kb * 1024;
    if bytes.len() <= limit {
        return bytes.to_vec();
    }

    match try_compress(bytes, limit) {
        Ok(out) => {
            debug!(before = bytes.len(), after = out.len(), max_kb, "image compressed");
            out
        }
        Err(e) => {
            warn!(error = %e, size = bytes.len(), "image compression failed, using original");
            bytes.to_vec()
        }
    }
}

fn try_compress(bytes: &[u8], limit: usize) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;

    let mut quality = START_QUALITY;
    let mut out = encode_jpeg(&img, quality)?;
    while out.len() > limit && quality > MIN_QUALITY {
        quality -= QUALITY_STEP;
        out = encode_jpeg(&img, quality)?;
    }

    if out.len() > limit {
        let width = ((img.width() as f32 * RESIZE_FACTOR) as u32).max(1);
        let height = ((u64::from(img.height()) * u64::from(width) / u64::from(img.width().max(1))) as u32).max(1);
        let resized = img.resize_exact(width, height, FilterType::Triangle);
        out = encode_jpeg(&resized, RESIZED_QUALITY)?;
    }

    Ok(out)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(out)
}

// ── Base64 ────────────────────────────────────────────────────────────────────

/// Decode a base64 image, accepting a `data:<mime>;base64,` prefix.
pub fn decode_base64_image(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let input = input.trim();
    let payload = match input.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, data)| data),
        None => input,
    };
    STANDARD.decode(payload.trim())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// MIME type from magic bytes; `image/png` when unrecognised.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/png")
}

/// `data:` URL for inlining an image into a JSON request.
pub fn data_url(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", sniff_mime(bytes), encode_base64(bytes))
}
