//! Per-connection request handling: read one request, pick a route, answer
//! from the cache or the origin, and close.

use crate::cache_layer::{parse_cache_control, CacheEntry, CacheLookup, ResponseCache};
use crate::codec::{HttpRequest, HttpResponse};
use crate::config::Config;
use crate::dash::bandwidth::throughput_kbps;
use crate::dash::segment::{self, classify, is_init_segment, segment_number};
use crate::dash::{BandwidthEstimator, LoadedManifest, ManifestEngine, RequestClass};
use crate::error::{ProxyError, Result};
use crate::resolver::{ResolverCache, ResolverSettings};
use crate::transport::{read_all, read_exact_vec, read_request_head, write_all, TcpTransport, Transport};
use arc_swap::ArcSwapOption;
use bytes::Bytes;
use std::io::{self, Read, Write};
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest request body read from a client.
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
    pub default_bandwidth_kbps: f64,
}

impl From<&Config> for HandlerSettings {
    fn from(config: &Config) -> Self {
        Self {
            resolve_timeout: config.resolver.timeout(),
            connect_timeout: config.origin.connect_timeout(),
            default_bandwidth_kbps: config.abr.default_bandwidth_kbps,
        }
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::from(&Config::default_config())
    }
}

/// State shared by every worker.
///
/// The manifest ladder and the throughput window are process-wide, so all
/// clients steer one estimate.
pub struct ProxyHandler {
    cache: ResponseCache,
    resolver: ResolverCache,
    transport: Arc<dyn Transport>,
    manifest: ArcSwapOption<LoadedManifest>,
    bandwidth: BandwidthEstimator,
    settings: HandlerSettings,
}

impl ProxyHandler {
    pub fn new(
        cache: ResponseCache,
        resolver: ResolverCache,
        transport: Arc<dyn Transport>,
        bandwidth: BandwidthEstimator,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            cache,
            resolver,
            transport,
            manifest: ArcSwapOption::empty(),
            bandwidth,
            settings,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = ResponseCache::new(config.cache.capacity())?;
        let resolver = ResolverCache::system(ResolverSettings::from(&config.resolver));
        Ok(Self::new(
            cache,
            resolver,
            Arc::new(TcpTransport),
            BandwidthEstimator::new(config.abr.window),
            HandlerSettings::from(config),
        ))
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn resolver(&self) -> &ResolverCache {
        &self.resolver
    }

    pub fn bandwidth(&self) -> &BandwidthEstimator {
        &self.bandwidth
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    /// Current manifest, if one has been loaded.
    pub fn manifest(&self) -> Option<Arc<LoadedManifest>> {
        self.manifest.load_full()
    }

    /// Serve one client connection. Failures are logged here and the
    /// connection is dropped without a reply.
    pub fn serve<C: Read + Write>(&self, mut client: C, peer: &str) {
        let start = Instant::now();
        match self.handle(&mut client) {
            Ok(route) => {
                metrics::counter!("proxy_requests_total", "route" => route.label()).increment(1);
                tracing::debug!(
                    peer,
                    route = route.label(),
                    latency_us = start.elapsed().as_micros() as u64,
                    "request served"
                );
            }
            Err(e) => {
                metrics::counter!("proxy_request_errors_total", "kind" => e.kind()).increment(1);
                tracing::warn!(peer, error = %e, kind = e.kind(), "request failed, closing connection");
            }
        }
    }

    /// Handle the single request on `client` and report the route taken.
    pub fn handle<C: Read + Write + ?Sized>(&self, client: &mut C) -> Result<RequestClass> {
        let request = read_request(client)?;
        if request.host.is_empty() {
            return Err(ProxyError::MissingHost);
        }

        let class = classify(&request.path);
        tracing::debug!(
            method = %request.method,
            host = %request.host,
            path = %request.path,
            route = class.label(),
            "request received"
        );

        match class {
            RequestClass::Manifest => {
                self.handle_manifest(client, &request)?;
                Ok(RequestClass::Manifest)
            }
            RequestClass::MediaSegment => match self.substitute_segment(&request)? {
                Some(target) => {
                    self.handle_segment(client, &target)?;
                    Ok(RequestClass::MediaSegment)
                }
                None => {
                    self.handle_ordinary(client, &request)?;
                    Ok(RequestClass::Ordinary)
                }
            },
            RequestClass::Ordinary => {
                self.handle_ordinary(client, &request)?;
                Ok(RequestClass::Ordinary)
            }
        }
    }

    fn handle_ordinary<C: Write + ?Sized>(&self, client: &mut C, request: &HttpRequest) -> Result<()> {
        if request.method != "GET" {
            let raw = self.fetch(request)?;
            write_all(client, &raw)?;
            return Ok(());
        }

        let key = request.cache_key();
        let lookup = self.cache.lookup(&key);
        metrics::counter!("proxy_cache_total", "outcome" => lookup.outcome()).increment(1);

        match lookup {
            CacheLookup::Fresh(entry) => {
                tracing::debug!(key = %key, "cache hit");
                write_all(client, &entry.to_bytes())?;
            }
            CacheLookup::Stale(entry) => {
                let mut conditional = request.clone();
                entry.apply_validators(&mut conditional);
                let raw = self.fetch(&conditional)?;
                let response = HttpResponse::parse(&raw)?;

                if response.status_code() == Some(304) {
                    metrics::counter!("proxy_cache_total", "outcome" => "revalidated").increment(1);
                    tracing::debug!(key = %key, "origin confirmed cached copy");
                    write_all(client, &entry.to_bytes())?;
                } else {
                    self.store_and_relay(client, key, response, &raw)?;
                }
            }
            CacheLookup::Miss => {
                let raw = self.fetch(request)?;
                let response = HttpResponse::parse(&raw)?;
                self.store_and_relay(client, key, response, &raw)?;
            }
        }
        Ok(())
    }

    /// Cache a complete response the origin allows us to keep, then relay
    /// the origin bytes verbatim. Partial content and 304s are never stored.
    fn store_and_relay<C: Write + ?Sized>(
        &self,
        client: &mut C,
        key: String,
        response: HttpResponse,
        raw: &[u8],
    ) -> Result<()> {
        let status = response.status_code();
        let control = response
            .header("Cache-Control")
            .map(parse_cache_control)
            .unwrap_or_default();

        let complete = !matches!(status, None | Some(206) | Some(304));
        if complete && control.cacheable {
            let entry = self
                .cache
                .insert(key.clone(), CacheEntry::from_response(response, Instant::now()));
            tracing::debug!(
                key = %key,
                max_age_secs = entry.max_age.as_secs(),
                validators = entry.has_validators(),
                "response cached"
            );
        } else {
            tracing::debug!(key = %key, ?status, cacheable = control.cacheable, "response not cached");
        }

        write_all(client, raw)?;
        Ok(())
    }

    fn handle_manifest<C: Write + ?Sized>(&self, client: &mut C, request: &HttpRequest) -> Result<()> {
        let raw = self.fetch(request)?;
        write_all(client, &raw)?;
        self.refresh_manifest(request, &raw);
        Ok(())
    }

    /// Rebuild the ladder from a relayed manifest. Any failure keeps the
    /// previous ladder.
    fn refresh_manifest(&self, request: &HttpRequest, raw: &[u8]) {
        let response = match HttpResponse::parse(raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %request.path, error = %e, "manifest response unreadable, keeping previous ladder");
                return;
            }
        };
        if response.status_code() != Some(200) {
            tracing::debug!(
                path = %request.path,
                status = ?response.status_code(),
                "manifest not refreshed"
            );
            return;
        }

        match ManifestEngine::parse(&response.body) {
            Ok(engine) if engine.is_empty() => {
                tracing::warn!(path = %request.path, "manifest lists no representations, keeping previous ladder");
            }
            Ok(engine) => {
                tracing::info!(
                    host = %request.host,
                    path = %request.path,
                    representations = engine.representations().len(),
                    "manifest loaded"
                );
                self.manifest.store(Some(Arc::new(LoadedManifest {
                    engine,
                    host: request.host.clone(),
                    port: request.port,
                    base_dir: segment::base_dir(&request.path).to_string(),
                    loaded_at: Instant::now(),
                })));
            }
            Err(e) => {
                tracing::warn!(path = %request.path, error = %e, "manifest parse failed, keeping previous ladder");
            }
        }
    }

    /// Rewrite a segment request to the representation that fits the current
    /// throughput estimate. `None` when there is no ladder to steer with.
    fn substitute_segment(&self, request: &HttpRequest) -> Result<Option<HttpRequest>> {
        let Some(loaded) = self.manifest.load_full() else {
            return Ok(None);
        };

        let estimate = self.bandwidth.estimate(self.settings.default_bandwidth_kbps);
        let rep = loaded.engine.select(estimate)?;
        let url = if is_init_segment(&request.path) {
            rep.init_url()
        } else {
            rep.media_url(segment_number(&request.path).max(rep.start_number))
        };
        if url.is_empty() {
            tracing::debug!(representation = %rep.id, "no segment template, forwarding unchanged");
            return Ok(None);
        }

        let location = segment::resolve(&loaded.base_dir, &url);
        let mut target = request.with_path(&location.path);
        match &location.authority {
            Some((host, port)) => target.set_authority(host, *port),
            None => target.set_authority(&loaded.host, loaded.port),
        }

        tracing::debug!(
            requested = %request.path,
            target = %target.path,
            representation = %rep.id,
            bandwidth = rep.bandwidth,
            estimate_kbps = estimate,
            "segment substituted"
        );
        Ok(Some(target))
    }

    fn handle_segment<C: Write + ?Sized>(&self, client: &mut C, target: &HttpRequest) -> Result<()> {
        let start = Instant::now();
        let raw = self.fetch(target)?;
        let elapsed = start.elapsed();

        match throughput_kbps(raw.len(), elapsed.as_secs_f64()) {
            Some(kbps) => {
                self.bandwidth.record(kbps);
                metrics::histogram!("proxy_segment_throughput_kbps").record(kbps);
                tracing::debug!(bytes = raw.len(), elapsed_ms = elapsed.as_millis() as u64, kbps, "segment throughput");
            }
            None => tracing::debug!(bytes = raw.len(), "segment fetch too fast to measure"),
        }

        write_all(client, &raw)?;
        Ok(())
    }

    /// One exchange with the origin: resolve, connect, send, read to EOF.
    fn fetch(&self, request: &HttpRequest) -> Result<Vec<u8>> {
        let ip = self
            .resolver
            .resolve(&request.host, request.port, self.settings.resolve_timeout)?;
        let addr = SocketAddrV4::new(ip, request.port);
        let mut origin = self.transport.connect(addr, self.settings.connect_timeout)?;

        let unreachable = |source: io::Error| ProxyError::OriginUnreachable {
            addr: addr.to_string(),
            source,
        };
        write_all(&mut *origin, &request.serialize()).map_err(unreachable)?;
        let raw = read_all(&mut *origin).map_err(unreachable)?;

        tracing::debug!(origin = %addr, path = %request.path, bytes = raw.len(), "origin responded");
        Ok(raw)
    }
}

/// Read a request head and the body its Content-Length announces.
fn read_request<C: Read + ?Sized>(client: &mut C) -> Result<HttpRequest> {
    let raw = read_request_head(client)?;
    let mut request = HttpRequest::parse(&raw)?;

    let declared = request.content_length();
    if declared > MAX_REQUEST_BODY {
        return Err(ProxyError::MalformedRequest(format!(
            "request body of {declared} bytes is too large"
        )));
    }
    if declared > request.body.len() {
        let rest = read_exact_vec(client, declared - request.body.len())?;
        let mut body = request.body.to_vec();
        body.extend_from_slice(&rest);
        request.body = Bytes::from(body);
    } else {
        request.body.truncate(declared);
    }
    Ok(request)
}
