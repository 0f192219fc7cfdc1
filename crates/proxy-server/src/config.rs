use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Cache entries granted per megabyte of configured budget.
pub const ENTRIES_PER_MB: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub abr: AbrConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_resolve_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_positive_ttl")]
    pub positive_ttl_secs: u64,
    #[serde(default = "default_negative_ttl")]
    pub negative_ttl_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbrConfig {
    #[serde(default = "default_bandwidth_kbps")]
    pub default_bandwidth_kbps: f64,
    #[serde(default = "default_window")]
    pub window: usize,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Config {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            resolver: ResolverConfig::default(),
            origin: OriginConfig::default(),
            abr: AbrConfig::default(),
        }
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.workers == 0 {
            return Err("server.workers must be at least 1".into());
        }
        if self.resolver.max_attempts == 0 {
            return Err("resolver.max_attempts must be at least 1".into());
        }
        if self.abr.window == 0 {
            return Err("abr.window must be at least 1".into());
        }
        if !(self.abr.default_bandwidth_kbps.is_finite() && self.abr.default_bandwidth_kbps >= 0.0)
        {
            return Err("abr.default_bandwidth_kbps must be a non-negative number".into());
        }
        Ok(())
    }
}

impl CacheConfig {
    /// Entry capacity derived from the megabyte budget.
    pub fn capacity(&self) -> usize {
        self.max_size_mb.saturating_mul(ENTRIES_PER_MB)
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OriginConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
            workers: default_workers(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_size_mb(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_resolve_timeout(),
            positive_ttl_secs: default_positive_ttl(),
            negative_ttl_secs: default_negative_ttl(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            default_bandwidth_kbps: default_bandwidth_kbps(),
            window: default_window(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_admin_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_workers() -> usize {
    5
}
fn default_max_size_mb() -> usize {
    10
}
fn default_resolve_timeout() -> u64 {
    5
}
fn default_positive_ttl() -> u64 {
    300
}
fn default_negative_ttl() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_bandwidth_kbps() -> f64 {
    1000.0
}
fn default_window() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.server.workers, 5);
        assert_eq!(config.cache.capacity(), 50);
        assert_eq!(config.resolver.positive_ttl_secs, 300);
        assert_eq!(config.resolver.negative_ttl_secs, 60);
        assert_eq!(config.resolver.max_attempts, 3);
        assert_eq!(config.origin.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.abr.window, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            workers = 16

            [cache]
            max_size_mb = 100

            [abr]
            default_bandwidth_kbps = 2500.0
            "#,
        )
        .unwrap();

        assert_eq!(config.server.workers, 16);
        assert_eq!(config.server.admin_addr, "0.0.0.0:9090");
        assert_eq!(config.cache.capacity(), 500);
        assert_eq!(config.abr.default_bandwidth_kbps, 2500.0);
        assert_eq!(config.resolver.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn zero_workers_fails_validation() {
        let mut config = Config::default_config();
        config.server.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_budget_means_zero_capacity() {
        let config: Config = toml::from_str("[cache]\nmax_size_mb = 0").unwrap();
        assert_eq!(config.cache.capacity(), 0);
    }
}
