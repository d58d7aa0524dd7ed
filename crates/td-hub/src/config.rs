//! # Configuration
//!
//! TOML file plus environment overrides. Everything has a default so an
//! empty file (or none) is valid; a platform is only wired up once it has
//! both an identity (property id / site URL) and a credential source.

use crate::adapter::UnifiedQueryAdapter;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use td_core::{CapabilityDescriptor, CapabilityRegistry, FieldSpec, PlatformId};
use td_io::{
    CredentialProvider, ExecutionClient, Ga4Transport, GscTransport, PlatformTransport, RateLimit,
    RetryPolicy, StaticToken, TokenBucket, TokenFile,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("cannot build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no platform is configured (set GA4_PROPERTY_ID and/or GSC_SITE_URL with a token)")]
    NoPlatforms,
    #[error("{platform} field alias '{alias}' names unknown field '{target}'")]
    UnknownAliasTarget {
        platform: PlatformId,
        alias: String,
        target: String,
    },
    #[error("{platform} field alias '{alias}' would replace a built-in field")]
    AliasShadowsField { platform: PlatformId, alias: String },
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub ga4: Ga4Config,
    #[serde(default)]
    pub gsc: GscConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Token file shared by both platforms when neither names its own.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Ga4Config {
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default = "default_ga4_base_url")]
    pub base_url: String,
    #[serde(flatten)]
    pub platform: PlatformConfig,
}

impl Default for Ga4Config {
    fn default() -> Self {
        Self {
            property_id: None,
            base_url: default_ga4_base_url(),
            platform: PlatformConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GscConfig {
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default = "default_gsc_base_url")]
    pub base_url: String,
    #[serde(flatten)]
    pub platform: PlatformConfig,
}

impl Default for GscConfig {
    fn default() -> Self {
        Self {
            site_url: None,
            base_url: default_gsc_base_url(),
            platform: PlatformConfig::default(),
        }
    }
}

/// Settings shared by both platform sections.
#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Overrides the built-in lookback window.
    #[serde(default)]
    pub max_lookback_days: Option<u32>,
    #[serde(default)]
    pub max_page_size: Option<u32>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Extra canonical names: alias -> existing canonical or native field.
    /// Lets both platforms answer one shared metric name.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
            token_file: None,
            max_lookback_days: None,
            max_page_size: None,
            rate_limit: RateLimitConfig::default(),
            fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            refill_per_sec: default_refill_per_sec(),
            burst: default_burst(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl From<&RateLimitConfig> for RateLimit {
    fn from(c: &RateLimitConfig) -> Self {
        RateLimit {
            refill_per_sec: c.refill_per_sec,
            burst: c.burst,
            max_wait: Duration::from_millis(c.max_wait_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_enabled")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: c.max_attempts.max(1),
            initial_delay: Duration::from_millis(c.initial_delay_ms),
            max_delay: Duration::from_millis(c.max_delay_ms),
            exponential_base: 2.0,
            jitter: c.jitter,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_ga4_base_url() -> String {
    td_io::transport::ga4::DEFAULT_BASE_URL.to_string()
}
fn default_gsc_base_url() -> String {
    td_io::transport::gsc::DEFAULT_BASE_URL.to_string()
}
fn default_enabled() -> bool {
    true
}
fn default_refill_per_sec() -> f64 {
    10.0
}
fn default_burst() -> u32 {
    10
}
fn default_max_wait_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Read `path` if it exists; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("no config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides. Takes a lookup so tests need not touch
    /// the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(id) = get("GA4_PROPERTY_ID") {
            self.ga4.property_id = Some(id);
        }
        if let Some(site) = get("GSC_SITE_URL") {
            self.gsc.site_url = Some(site);
        }
        if let Some(token) = get("TD_GA4_TOKEN") {
            self.ga4.platform.token = Some(token);
        }
        if let Some(token) = get("TD_GSC_TOKEN") {
            self.gsc.platform.token = Some(token);
        }
        if let Some(file) = get("TD_TOKEN_FILE") {
            self.token_file = Some(PathBuf::from(file));
        }
    }

    pub fn registry(&self) -> Result<CapabilityRegistry, ConfigError> {
        Ok(CapabilityRegistry::new([
            tuned(CapabilityDescriptor::ga4(), &self.ga4.platform)?,
            tuned(CapabilityDescriptor::gsc(), &self.gsc.platform)?,
        ]))
    }

    fn credentials(&self, platform: &PlatformConfig) -> Option<Arc<dyn CredentialProvider>> {
        if let Some(token) = &platform.token {
            return Some(Arc::new(StaticToken::new(token.clone())));
        }
        platform
            .token_file
            .as_ref()
            .or(self.token_file.as_ref())
            .map(|path| Arc::new(TokenFile::new(path)) as Arc<dyn CredentialProvider>)
    }

    /// Transports for every platform that is enabled, identified and has
    /// credentials.
    pub fn transports(&self, http: &reqwest::Client) -> Vec<Arc<dyn PlatformTransport>> {
        let mut out: Vec<Arc<dyn PlatformTransport>> = Vec::new();

        match (&self.ga4.property_id, self.credentials(&self.ga4.platform)) {
            (Some(id), Some(creds)) if self.ga4.platform.enabled => {
                out.push(Arc::new(Ga4Transport::new(
                    http.clone(),
                    self.ga4.base_url.clone(),
                    id.clone(),
                    creds,
                )));
            }
            _ => tracing::info!("{} not configured", PlatformId::Ga4.display_name()),
        }

        match (&self.gsc.site_url, self.credentials(&self.gsc.platform)) {
            (Some(site), Some(creds)) if self.gsc.platform.enabled => {
                out.push(Arc::new(GscTransport::new(
                    http.clone(),
                    self.gsc.base_url.clone(),
                    site.clone(),
                    creds,
                )));
            }
            _ => tracing::info!("{} not configured", PlatformId::Gsc.display_name()),
        }

        out
    }

    fn platform(&self, platform: PlatformId) -> &PlatformConfig {
        match platform {
            PlatformId::Ga4 => &self.ga4.platform,
            PlatformId::Gsc => &self.gsc.platform,
        }
    }

    /// Wire transports into execution clients with their buckets and retry
    /// policy.
    pub fn clients(&self, transports: Vec<Arc<dyn PlatformTransport>>) -> Vec<ExecutionClient> {
        let retry = RetryPolicy::from(&self.retry);
        transports
            .into_iter()
            .map(|transport| {
                let platform = transport.platform();
                let limit = RateLimit::from(&self.platform(platform).rate_limit);
                ExecutionClient::new(
                    transport,
                    Arc::new(TokenBucket::new(platform, limit)),
                    retry.clone(),
                )
            })
            .collect()
    }

    pub fn build_adapter(&self) -> Result<UnifiedQueryAdapter, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http.timeout_secs))
            .build()?;
        let transports = self.transports(&http);
        if transports.is_empty() {
            return Err(ConfigError::NoPlatforms);
        }
        Ok(UnifiedQueryAdapter::new(
            &self.registry()?,
            self.clients(transports),
        ))
    }

    /// Site URL used to turn a page path into a Search Console page URL.
    pub fn site_url(&self) -> Option<&str> {
        self.gsc.site_url.as_deref()
    }
}

fn tuned(
    mut descriptor: CapabilityDescriptor,
    platform: &PlatformConfig,
) -> Result<CapabilityDescriptor, ConfigError> {
    if let Some(days) = platform.max_lookback_days {
        descriptor = descriptor.with_max_lookback_days(days);
    }
    if let Some(rows) = platform.max_page_size {
        descriptor = descriptor.with_max_page_size(rows);
    }
    for (alias, target) in &platform.fields {
        let id = descriptor.platform();
        if descriptor.supports(alias) {
            return Err(ConfigError::AliasShadowsField {
                platform: id,
                alias: alias.clone(),
            });
        }
        let spec = descriptor
            .resolve(target)
            .or_else(|| descriptor.canonical_for(target).and_then(|c| descriptor.resolve(c)))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownAliasTarget {
                platform: id,
                alias: alias.clone(),
                target: target.clone(),
            })?;
        tracing::info!("{} field '{}' aliases '{}'", id, alias, spec.canonical);
        descriptor = descriptor.field(FieldSpec {
            canonical: alias.clone(),
            ..spec
        });
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.ga4.property_id.is_none());
        assert!(config.ga4.platform.enabled);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.gsc.platform.rate_limit.burst, 10);
        assert_eq!(config.gsc.base_url, "https://www.googleapis.com");
    }

    #[test]
    fn test_sections_parse() {
        let config: Config = toml::from_str(
            r#"
            token_file = "/run/secrets/token"

            [ga4]
            property_id = "123"
            max_lookback_days = 90

            [ga4.rate_limit]
            refill_per_sec = 2.5
            burst = 4

            [gsc]
            site_url = "sc-domain:example.com"
            enabled = false

            [retry]
            max_attempts = 5
            jitter = false
            "#,
        )
        .unwrap();
        assert_eq!(config.ga4.property_id.as_deref(), Some("123"));
        assert_eq!(config.ga4.platform.rate_limit.burst, 4);
        assert_eq!(config.ga4.platform.rate_limit.max_wait_ms, 30_000);
        assert!(!config.gsc.platform.enabled);
        assert_eq!(RetryPolicy::from(&config.retry).max_attempts, 5);

        let registry = config.registry().unwrap();
        assert_eq!(
            registry.get(PlatformId::Ga4).unwrap().max_lookback_days(),
            90
        );
        assert_eq!(
            registry.get(PlatformId::Gsc).unwrap().max_lookback_days(),
            486
        );
    }

    #[test]
    fn test_field_aliases_extend_catalog() {
        let config: Config = toml::from_str(
            r#"
            [gsc.fields]
            sessions = "clicks"
            views = "impressions"

            [ga4.fields]
            visits = "totalUsers"
            "#,
        )
        .unwrap();
        let registry = config.registry().unwrap();
        let gsc = registry.get(PlatformId::Gsc).unwrap();
        let spec = gsc.resolve("sessions").unwrap();
        assert_eq!(spec.native, "clicks");
        assert!(spec.role.allows_metric());
        assert!(gsc.supports("views"));
        // The built-in name keeps the inverse mapping.
        assert_eq!(gsc.canonical_for("clicks"), Some("clicks"));

        let ga4 = registry.get(PlatformId::Ga4).unwrap();
        assert_eq!(ga4.resolve("visits").unwrap().native, "totalUsers");
        assert!(ga4.covers(["sessions", "date"]) && gsc.covers(["sessions", "date"]));
    }

    #[test]
    fn test_bad_field_aliases_rejected() {
        let unknown: Config = toml::from_str("[gsc.fields]\nsessions = \"revenue\"").unwrap();
        assert!(matches!(
            unknown.registry(),
            Err(ConfigError::UnknownAliasTarget { platform: PlatformId::Gsc, .. })
        ));

        let shadow: Config = toml::from_str("[ga4.fields]\nsessions = \"totalUsers\"").unwrap();
        assert!(matches!(
            shadow.registry(),
            Err(ConfigError::AliasShadowsField { platform: PlatformId::Ga4, .. })
        ));
    }

    #[test]
    fn test_huge_lookback_from_config_translates() {
        let config: Config = toml::from_str("[gsc]\nmax_lookback_days = 4294967295").unwrap();
        let registry = config.registry().unwrap();
        let day = chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let q = td_core::UnifiedQuery::builder(day, day)
            .metric("clicks")
            .build()
            .unwrap();
        assert!(td_core::translate(&q, registry.get(PlatformId::Gsc).unwrap(), day).is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GA4_PROPERTY_ID", "999"),
            ("GSC_SITE_URL", "https://example.com/"),
            ("TD_GSC_TOKEN", "abc"),
            ("TD_GA4_TOKEN", "  "),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.ga4.property_id.as_deref(), Some("999"));
        assert_eq!(config.site_url(), Some("https://example.com/"));
        assert_eq!(config.gsc.platform.token.as_deref(), Some("abc"));
        assert!(config.ga4.platform.token.is_none());
    }

    #[test]
    fn test_only_complete_platforms_get_transports() {
        let mut config = Config::default();
        config.ga4.property_id = Some("1".into());
        config.gsc.site_url = Some("https://example.com/".into());
        config.gsc.platform.token = Some("t".into());

        let transports = config.transports(&reqwest::Client::new());
        let platforms: Vec<_> = transports.iter().map(|t| t.platform()).collect();
        assert_eq!(platforms, vec![PlatformId::Gsc]);

        config.token_file = Some("/tmp/shared-token".into());
        assert_eq!(config.transports(&reqwest::Client::new()).len(), 2);
    }

    #[test]
    fn test_no_platforms_is_an_error() {
        assert!(matches!(
            Config::default().build_adapter(),
            Err(ConfigError::NoPlatforms)
        ));
    }
}
