use axum::extract::Path;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// (id, bits per second, width, height)
const LADDER: &[(&str, u64, u32, u32)] = &[
    ("low", 500_000, 640, 360),
    ("mid", 1_000_000, 1280, 720),
    ("high", 2_500_000, 1920, 1080),
];

const SEGMENT_SECONDS: u64 = 4;
const SEGMENT_COUNT: u64 = 15;
const INIT_SEGMENT_BYTES: usize = 1024;
const LAST_MODIFIED: &str = "Mon, 01 Jan 2024 00:00:00 GMT";

fn manifest() -> String {
    let mut reps = String::new();
    for (id, bandwidth, width, height) in LADDER {
        reps.push_str(&format!(
            "      <Representation id=\"{id}\" bandwidth=\"{bandwidth}\" width=\"{width}\" height=\"{height}\" codecs=\"avc1.64001f\"/>\n"
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT{total}S" minBufferTime="PT2S">
  <Period id="0">
    <AdaptationSet mimeType="video/mp4" segmentAlignment="true">
      <SegmentTemplate media="seg-$RepresentationID$-$Number$.m4s" initialization="init-$RepresentationID$.m4s" startNumber="1" timescale="1" duration="{SEGMENT_SECONDS}"/>
{reps}    </AdaptationSet>
  </Period>
</MPD>
"#,
        total = SEGMENT_SECONDS * SEGMENT_COUNT,
    )
}

/// Requested segment, decoded from its file name.
#[derive(Debug, PartialEq, Eq)]
enum SegmentName<'a> {
    Init { rep: &'a str },
    Media { rep: &'a str, number: u64 },
}

fn parse_segment_name(file: &str) -> Option<SegmentName<'_>> {
    let stem = file.strip_suffix(".m4s")?;
    if let Some(rep) = stem.strip_prefix("init-") {
        return Some(SegmentName::Init { rep });
    }
    let (rep, number) = stem.strip_prefix("seg-")?.rsplit_once('-')?;
    Some(SegmentName::Media {
        rep,
        number: number.parse().ok()?,
    })
}

fn bandwidth_of(rep: &str) -> Option<u64> {
    LADDER
        .iter()
        .find(|(id, ..)| *id == rep)
        .map(|(_, bandwidth, ..)| *bandwidth)
}

/// True when the client's validators still match this resource.
fn not_modified(headers: &HeaderMap, etag: &str) -> bool {
    if let Some(tags) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        return tags
            .split(',')
            .map(str::trim)
            .any(|t| t == etag || t == "*");
    }
    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == LAST_MODIFIED)
}

fn validated(headers: &HeaderMap, etag: &str, max_age: u64) -> Option<Response> {
    if !not_modified(headers, etag) {
        return None;
    }
    Some(
        (
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, etag.to_string()),
                (header::CACHE_CONTROL, format!("max-age={max_age}")),
            ],
        )
            .into_response(),
    )
}

async fn simulated_latency() -> u64 {
    // Simulate upstream latency (5-20ms)
    let delay = rand::thread_rng().gen_range(5..=20);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    delay
}

async fn get_manifest(headers: HeaderMap) -> Response {
    let etag = "\"mpd-1\"";
    if let Some(resp) = validated(&headers, etag, 2) {
        return resp;
    }
    simulated_latency().await;
    (
        [
            (header::CONTENT_TYPE, "application/dash+xml".to_string()),
            (header::CACHE_CONTROL, "max-age=2".to_string()),
            (header::ETAG, etag.to_string()),
            (header::LAST_MODIFIED, LAST_MODIFIED.to_string()),
        ],
        manifest(),
    )
        .into_response()
}

async fn get_segment(Path(file): Path<String>) -> Response {
    let (rep, size, fill) = match parse_segment_name(&file) {
        Some(SegmentName::Init { rep }) => (rep, INIT_SEGMENT_BYTES, 0u8),
        Some(SegmentName::Media { rep, number }) if (1..=SEGMENT_COUNT).contains(&number) => {
            let Some(bandwidth) = bandwidth_of(rep) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let size = (bandwidth * SEGMENT_SECONDS / 8) as usize;
            (rep, size, number as u8)
        }
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    if bandwidth_of(rep).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let delay = simulated_latency().await;
    tracing::debug!(file = %file, bytes = size, delay_ms = delay, "serving segment");

    (
        [
            (header::CONTENT_TYPE, "video/iso.segment"),
            (header::CACHE_CONTROL, "max-age=3600"),
        ],
        vec![fill; size],
    )
        .into_response()
}

async fn get_item(Path(id): Path<u64>, headers: HeaderMap) -> Response {
    let etag = format!("\"item-{id}\"");
    if let Some(resp) = validated(&headers, &etag, 10) {
        return resp;
    }
    let delay = simulated_latency().await;

    (
        [
            (header::CACHE_CONTROL, "max-age=10".to_string()),
            (header::ETAG, etag),
            (header::LAST_MODIFIED, LAST_MODIFIED.to_string()),
        ],
        axum::Json(json!({
            "id": id,
            "name": format!("Item {}", id),
            "data": "x".repeat(256),
            "latency_ms": delay,
        })),
    )
        .into_response()
}

async fn health() -> &'static str {
    "ok"
}

fn app() -> Router {
    Router::new()
        .route("/dash/manifest.mpd", get(get_manifest))
        .route("/dash/{file}", get(get_segment))
        .route("/api/items/{id}", get(get_item))
        .route("/health", get(health))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = "0.0.0.0:3000";
    tracing::info!(addr, "demo DASH origin starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app()).await {
        tracing::error!(error = %e, "server error");
    }
}
