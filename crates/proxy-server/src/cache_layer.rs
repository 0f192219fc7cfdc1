use crate::codec::{HttpRequest, HttpResponse};
use crate::error::Result;
use bytes::Bytes;
use segment_cache::{CacheStats, SharedLru};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A complete origin response held by the response cache.
///
/// `expires_at` is derived from `received_at + max_age` at construction and
/// never changes; a newer origin response replaces the whole entry.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub received_at: Instant,
    pub max_age: Duration,
    expires_at: Instant,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheEntry {
    pub fn from_response(response: HttpResponse, received_at: Instant) -> Self {
        let control = response
            .header("Cache-Control")
            .map(parse_cache_control)
            .unwrap_or_default();
        let max_age = control.max_age.unwrap_or(Duration::ZERO);
        let etag = response.header("ETag").map(str::to_string);
        let last_modified = response.header("Last-Modified").map(str::to_string);

        CacheEntry {
            status_line: response.status_line,
            headers: response.headers,
            body: response.body,
            received_at,
            max_age,
            expires_at: expiry(received_at, max_age),
            etag,
            last_modified,
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_stale_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Turn `request` into a conditional GET against this entry.
    pub fn apply_validators(&self, request: &mut HttpRequest) {
        if let Some(etag) = &self.etag {
            request.set_header("If-None-Match", etag.as_str());
        }
        if let Some(last_modified) = &self.last_modified {
            request.set_header("If-Modified-Since", last_modified.as_str());
        }
    }

    /// Wire form sent to the client.
    pub fn to_bytes(&self) -> Vec<u8> {
        HttpResponse {
            status_line: self.status_line.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
        .to_bytes()
    }
}

/// `received_at + max_age`, saturating at the largest lifetime a header can
/// express so an absurd origin value never overflows the clock.
fn expiry(received_at: Instant, max_age: Duration) -> Instant {
    received_at
        .checked_add(max_age)
        .or_else(|| received_at.checked_add(Duration::from_secs(MAX_DELTA_SECONDS)))
        .unwrap_or(received_at)
}

/// Outcome of consulting the cache for one request.
#[derive(Debug)]
pub enum CacheLookup {
    Fresh(Arc<CacheEntry>),
    Stale(Arc<CacheEntry>),
    Miss,
}

impl CacheLookup {
    pub fn outcome(&self) -> &'static str {
        match self {
            CacheLookup::Fresh(_) => "hit",
            CacheLookup::Stale(_) => "stale",
            CacheLookup::Miss => "miss",
        }
    }
}

/// Response cache keyed by `host + path`.
///
/// Entries are shared as `Arc` snapshots so serving a hit never holds the
/// cache lock during socket writes.
pub struct ResponseCache {
    store: SharedLru<String, Arc<CacheEntry>>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Result<Self> {
        let store = SharedLru::new(capacity)?;
        tracing::info!(capacity, "response cache initialized");
        Ok(Self { store })
    }

    pub fn lookup(&self, key: &str) -> CacheLookup {
        self.lookup_at(key, Instant::now())
    }

    pub fn lookup_at(&self, key: &str, now: Instant) -> CacheLookup {
        match self.store.get(key) {
            Some(entry) if entry.is_stale_at(now) => CacheLookup::Stale(entry),
            Some(entry) => CacheLookup::Fresh(entry),
            None => CacheLookup::Miss,
        }
    }

    /// Store `entry`, replacing any entry for the same key.
    pub fn insert(&self, key: String, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        if let Some(evicted) = self.store.put(key, Arc::clone(&entry)) {
            tracing::debug!(key = %evicted, "evicted least recently used entry");
        }
        entry
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}

/// Largest delta-seconds honoured; bigger values are treated as this (RFC 9111 §1.2.2).
pub const MAX_DELTA_SECONDS: u64 = 1 << 31;

fn delta_seconds(value: &str) -> Option<Duration> {
    let digits = value.trim().trim_matches('"');
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // too many digits for u64 still means "a very long time"
    let secs = digits.parse::<u64>().unwrap_or(MAX_DELTA_SECONDS);
    Some(Duration::from_secs(secs.min(MAX_DELTA_SECONDS)))
}

/// Parse Cache-Control header to determine cacheability and lifetime.
pub fn parse_cache_control(value: &str) -> CacheControl {
    let mut result = CacheControl {
        cacheable: true,
        max_age: None,
    };
    let mut shared_max_age = None;
    let mut no_cache = false;

    for directive in value.split(',').map(|s| s.trim().to_lowercase()) {
        if directive == "no-store" || directive == "private" {
            result.cacheable = false;
        }
        if directive == "no-cache" {
            no_cache = true;
        }
        if let Some(age) = directive.strip_prefix("max-age=").and_then(delta_seconds) {
            result.max_age = Some(age);
        }
        if let Some(age) = directive.strip_prefix("s-maxage=").and_then(delta_seconds) {
            shared_max_age = Some(age);
        }
    }

    // s-maxage takes precedence for shared caches
    if shared_max_age.is_some() {
        result.max_age = shared_max_age;
    }
    if no_cache {
        result.max_age = Some(Duration::ZERO);
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheControl {
    pub cacheable: bool,
    pub max_age: Option<Duration>,
}

impl Default for CacheControl {
    fn default() -> Self {
        Self {
            cacheable: true,
            max_age: None,
        }
    }
}
