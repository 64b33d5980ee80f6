//! Outline text → typed pages.
//!
//! Providers are asked to start every page with a `<page>` line followed by a
//! `[封面]` / `[内容]` / `[总结]` tag. Older prompts separated pages with
//! `---`, which is still accepted when no `<page>` marker is present.

use serde::{Deserialize, Serialize};

const PAGE_MARKER: &str = "<page>";
const LEGACY_SEPARATOR: &str = "---";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Cover,
    Content,
    Summary,
}

impl PageType {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "封面" => PageType::Cover,
            "总结" => PageType::Summary,
            _ => PageType::Content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    #[serde(rename = "type")]
    pub page_type: PageType,
    /// Trimmed page text, tag line included.
    pub content: String,
}

/// Split `text` into pages numbered from 0 in order of appearance.
pub fn parse_outline(text: &str) -> Vec<Page> {
    split_segments(text)
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(index, segment)| Page {
            index,
            page_type: leading_tag(segment).map_or(PageType::Content, PageType::from_tag),
            content: segment.to_string(),
        })
        .collect()
}

fn split_segments(text: &str) -> Vec<&str> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    if !lower.contains(PAGE_MARKER) {
        return text.split(LEGACY_SEPARATOR).collect();
    }

    let mut segments = Vec::new();
    let mut start = 0;
    for (at, _) in lower.match_indices(PAGE_MARKER) {
        segments.push(&text[start..at]);
        start = at + PAGE_MARKER.len();
    }
    segments.push(&text[start..]);
    segments
}

/// The `x` of a leading `[x]`, where `x` is non-empty and has no whitespace.
fn leading_tag(segment: &str) -> Option<&str> {
    let rest = segment.strip_prefix('[')?;
    let run = &rest[..rest.find(char::is_whitespace).unwrap_or(rest.len())];
    let close = run.rfind(']').filter(|&i| i > 0)?;
    Some(&run[..close])
}
