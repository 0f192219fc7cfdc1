//! Hostname resolution with a shared positive/negative cache.
//!
//! One `ResolverCache` is built at startup and shared by every worker. The
//! map lock is held only for reads and writes of the map, never across the
//! blocking lookup, so a slow name never stalls lookups for other names.

use crate::config::ResolverConfig;
use crate::error::{ProxyError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The blocking name lookup behind the cache.
pub trait HostLookup: Send + Sync {
    /// First IPv4 address for `host`. Other address families are ignored.
    fn lookup_ipv4(&self, host: &str, port: u16) -> io::Result<Ipv4Addr>;
}

/// Lookup through the system resolver (`getaddrinfo`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLookup;

impl HostLookup for SystemLookup {
    fn lookup_ipv4(&self, host: &str, port: u16) -> io::Result<Ipv4Addr> {
        (host, port)
            .to_socket_addrs()?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no IPv4 address for {host}"),
                )
            })
    }
}

/// Cached outcome for one hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Address(Ipv4Addr),
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct ResolverEntry {
    resolution: Resolution,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub positive_ttl: Duration,
    pub negative_ttl: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from(&ResolverConfig::default())
    }
}

impl From<&ResolverConfig> for ResolverSettings {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            positive_ttl: Duration::from_secs(config.positive_ttl_secs),
            negative_ttl: Duration::from_secs(config.negative_ttl_secs),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }
}

/// Delay before retry number `attempt` (1-based): `initial * 2^(attempt-1)`.
pub fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    initial.saturating_mul(factor)
}

/// True when waiting `delay` from now would reach `deadline`, or would
/// never end at all.
fn past(deadline: Option<Instant>, delay: Duration) -> bool {
    match (deadline, Instant::now().checked_add(delay)) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(deadline), Some(at)) => at >= deadline,
    }
}

/// `now + ttl`, clamped to a century for TTLs the clock cannot represent.
fn expiry(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(Duration::from_secs(100 * 365 * 86_400)))
        .unwrap_or(now)
}

pub struct ResolverCache {
    entries: Mutex<HashMap<String, ResolverEntry>>,
    lookup: Arc<dyn HostLookup>,
    settings: ResolverSettings,
}

impl ResolverCache {
    pub fn new(lookup: Arc<dyn HostLookup>, settings: ResolverSettings) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            lookup,
            settings,
        }
    }

    pub fn system(settings: ResolverSettings) -> Self {
        Self::new(Arc::new(SystemLookup), settings)
    }

    /// Resolve `host` to an IPv4 address within `timeout`.
    ///
    /// A fresh cached answer (positive or negative) is returned without a
    /// lookup. Otherwise the lookup is retried with exponential backoff; the
    /// outcome is cached either way. Running out of retries and running out
    /// of `timeout` both end in `ResolutionFailed`.
    pub fn resolve(&self, host: &str, port: u16, timeout: Duration) -> Result<Ipv4Addr> {
        let key = host.to_ascii_lowercase();
        // an unrepresentable deadline means the budget never runs out
        let deadline = Instant::now().checked_add(timeout);

        if let Some(resolution) = self.cached(&key) {
            return match resolution {
                Resolution::Address(ip) => {
                    metrics::counter!("proxy_resolver_lookups_total", "outcome" => "cache_hit")
                        .increment(1);
                    Ok(ip)
                }
                Resolution::Failed => {
                    metrics::counter!("proxy_resolver_lookups_total", "outcome" => "negative_hit")
                        .increment(1);
                    tracing::debug!(host = %key, "negative cache hit");
                    Err(ProxyError::ResolutionFailed { host: key })
                }
            };
        }

        for attempt in 1..=self.settings.max_attempts {
            if past(deadline, Duration::ZERO) {
                return Err(self.fail(&key, true));
            }

            match self.lookup.lookup_ipv4(&key, port) {
                Ok(ip) => {
                    self.store(&key, Resolution::Address(ip), self.settings.positive_ttl);
                    metrics::counter!("proxy_resolver_lookups_total", "outcome" => "resolved")
                        .increment(1);
                    tracing::debug!(host = %key, %ip, attempt, "resolved");
                    return Ok(ip);
                }
                Err(e) => {
                    tracing::debug!(host = %key, attempt, error = %e, "lookup attempt failed");
                    if attempt == self.settings.max_attempts {
                        break;
                    }
                    let delay = backoff_delay(self.settings.initial_backoff, attempt);
                    if past(deadline, delay) {
                        return Err(self.fail(&key, true));
                    }
                    std::thread::sleep(delay);
                }
            }
        }

        Err(self.fail(&key, false))
    }

    /// Fresh cached resolution, dropping an expired one.
    fn cached(&self, key: &str) -> Option<Resolution> {
        let mut entries = self.entries.lock();
        let entry = *entries.get(key)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.resolution);
        }
        entries.remove(key);
        None
    }

    fn store(&self, key: &str, resolution: Resolution, ttl: Duration) {
        let entry = ResolverEntry {
            resolution,
            expires_at: expiry(ttl),
        };
        self.entries.lock().insert(key.to_string(), entry);
    }

    /// Record a negative entry and build the error to report.
    fn fail(&self, key: &str, timed_out: bool) -> ProxyError {
        self.store(key, Resolution::Failed, self.settings.negative_ttl);
        metrics::counter!("proxy_resolver_lookups_total", "outcome" => "failed").increment(1);
        tracing::warn!(
            host = %key,
            timed_out,
            negative_ttl_secs = self.settings.negative_ttl.as_secs(),
            "resolution failed, caching negative result"
        );
        ProxyError::ResolutionFailed {
            host: key.to_string(),
        }
    }

    /// Number of cached entries, expired ones included until next touched.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
