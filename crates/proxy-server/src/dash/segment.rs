//! Path classification and segment naming helpers.

use crate::codec::split_host_port;

const MANIFEST_EXTENSION: &str = ".mpd";
const SEGMENT_EXTENSIONS: &[&str] = &[".m4s", ".ts", ".mp4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Manifest,
    MediaSegment,
    Ordinary,
}

impl RequestClass {
    pub fn label(self) -> &'static str {
        match self {
            RequestClass::Manifest => "manifest",
            RequestClass::MediaSegment => "segment",
            RequestClass::Ordinary => "ordinary",
        }
    }
}

/// Classify a request path by its extension. The query string is ignored.
pub fn classify(path: &str) -> RequestClass {
    let path = strip_query(path).to_ascii_lowercase();
    if path.ends_with(MANIFEST_EXTENSION) {
        RequestClass::Manifest
    } else if SEGMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        RequestClass::MediaSegment
    } else {
        RequestClass::Ordinary
    }
}

/// Segment number taken from the digits right before the extension,
/// 1 when there are none.
pub fn segment_number(path: &str) -> u64 {
    let stem = file_stem(path);
    let prefix = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    stem[prefix.len()..].parse().unwrap_or(1)
}

/// Initialization segments carry `init` in their file name.
pub fn is_init_segment(path: &str) -> bool {
    file_stem(path).to_ascii_lowercase().contains("init")
}

/// Directory part of a path, trailing slash included.
pub fn base_dir(path: &str) -> &str {
    let path = strip_query(path);
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    }
}

/// Where a templated segment URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLocation {
    /// `Some` only for absolute `http://` URLs naming another origin.
    pub authority: Option<(String, u16)>,
    pub path: String,
}

/// Resolve a URL produced by a segment template against the manifest's
/// directory.
pub fn resolve(base_dir: &str, url: &str) -> SegmentLocation {
    if let Some(rest) = url.strip_prefix("http://") {
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = split_host_port(authority);
        return SegmentLocation {
            authority: Some((host.to_string(), port.unwrap_or(80))),
            path: path.to_string(),
        };
    }
    let path = if url.starts_with('/') {
        url.to_string()
    } else {
        format!("{base_dir}{url}")
    };
    SegmentLocation {
        authority: None,
        path,
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn file_stem(path: &str) -> &str {
    let path = strip_query(path);
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(i) => &name[..i],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(classify("/live/stream.mpd"), RequestClass::Manifest);
        assert_eq!(classify("/live/Stream.MPD?token=1"), RequestClass::Manifest);
        assert_eq!(classify("/v/seg-1.m4s"), RequestClass::MediaSegment);
        assert_eq!(classify("/v/chunk_3.ts"), RequestClass::MediaSegment);
        assert_eq!(classify("/v/init.mp4"), RequestClass::MediaSegment);
        assert_eq!(classify("/index.html"), RequestClass::Ordinary);
        assert_eq!(classify("/"), RequestClass::Ordinary);
        assert_eq!(classify("/file.mpd.bak"), RequestClass::Ordinary);
    }

    #[test]
    fn segment_numbers() {
        assert_eq!(segment_number("/v/seg-v1-7.m4s"), 7);
        assert_eq!(segment_number("/v/chunk_0042.ts"), 42);
        assert_eq!(segment_number("/v/12.m4s?x=3"), 12);
        assert_eq!(segment_number("/v/segment.m4s"), 1);
        assert_eq!(segment_number("/v/99999999999999999999999.m4s"), 1);
    }

    #[test]
    fn init_detection() {
        assert!(is_init_segment("/v/init-720p.mp4"));
        assert!(is_init_segment("/v/video_INIT.m4s"));
        assert!(!is_init_segment("/init/seg-3.m4s"));
        assert!(!is_init_segment("/v/seg-3.m4s"));
    }

    #[test]
    fn base_directory() {
        assert_eq!(base_dir("/live/ch1/manifest.mpd"), "/live/ch1/");
        assert_eq!(base_dir("/manifest.mpd?v=2"), "/");
        assert_eq!(base_dir("manifest.mpd"), "/");
    }

    #[test]
    fn resolve_relative_and_absolute() {
        assert_eq!(
            resolve("/live/", "seg-v1-7.m4s"),
            SegmentLocation {
                authority: None,
                path: "/live/seg-v1-7.m4s".into()
            }
        );
        assert_eq!(resolve("/live/", "/other/a.m4s").path, "/other/a.m4s");

        let abs = resolve("/live/", "http://cdn.example:8081/x/1.m4s");
        assert_eq!(abs.authority, Some(("cdn.example".to_string(), 8081)));
        assert_eq!(abs.path, "/x/1.m4s");

        let bare = resolve("/", "http://cdn.example");
        assert_eq!(bare.authority, Some(("cdn.example".to_string(), 80)));
        assert_eq!(bare.path, "/");
    }
}
