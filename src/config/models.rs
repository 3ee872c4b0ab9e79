//! Configuration data structures for Switchyard.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files and to
//! `SWITCHYARD__*` environment overrides. They are serde‑friendly and include
//! defaults so that minimal configs remain concise. Durations are written as
//! humantime strings (`"10s"`, `"250ms"`).
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::api::ApiSpec;

/// Serde adapter for humantime duration strings.
pub(crate) mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_tls_port() -> u16 {
    8433
}

fn default_web_port() -> u16 {
    8081
}

fn default_true() -> bool {
    true
}

fn default_grace_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_hard_shutdown_deadline() -> Duration {
    Duration::from_secs(10)
}

fn default_flush_interval() -> Duration {
    Duration::from_millis(20)
}

fn default_max_idle_conns_per_host() -> usize {
    500
}

fn default_close_idle_conns_period() -> Duration {
    Duration::from_secs(90)
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

/// Process-wide configuration for the gateway runtime.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GlobalConfig {
    /// Bind host for the traffic listeners
    #[serde(default = "default_host")]
    pub host: String,
    /// Plain HTTP port. When TLS is active this port only serves redirects.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: TlsConfig,
    /// Drain budget for a graceful stop, and the pause before a
    /// cancellation-driven close starts tearing connections down.
    #[serde(default = "default_grace_timeout", with = "humantime_duration")]
    pub grace_timeout: Duration,
    /// Upper bound for a hard close before the process is aborted.
    #[serde(default = "default_hard_shutdown_deadline", with = "humantime_duration")]
    pub hard_shutdown_deadline: Duration,
    /// Tag every request with an `X-Request-ID`
    #[serde(default = "default_true")]
    pub request_id: bool,
    #[serde(default = "default_flush_interval", with = "humantime_duration")]
    pub backend_flush_interval: Duration,
    #[serde(default = "default_max_idle_conns_per_host")]
    pub max_idle_conns_per_host: usize,
    #[serde(default = "default_close_idle_conns_period", with = "humantime_duration")]
    pub close_idle_conns_period: Duration,
    /// Budget for an upstream to produce response headers (504 after that)
    #[serde(default = "default_upstream_timeout", with = "humantime_duration")]
    pub upstream_timeout: Duration,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl GlobalConfig {
    /// Create a new configuration builder
    pub fn builder() -> GlobalConfigBuilder {
        GlobalConfigBuilder::default()
    }

    /// Address of the primary traffic listener (the TLS port when TLS is on).
    pub fn serving_addr(&self) -> String {
        if self.tls.is_https() {
            format!("{}:{}", self.host, self.tls.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Address of the HTTP -> HTTPS redirect listener, if one is configured.
    pub fn redirect_addr(&self) -> Option<String> {
        (self.tls.is_https() && self.tls.redirect).then(|| format!("{}:{}", self.host, self.port))
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: TlsConfig::default(),
            grace_timeout: default_grace_timeout(),
            hard_shutdown_deadline: default_hard_shutdown_deadline(),
            request_id: true,
            backend_flush_interval: default_flush_interval(),
            max_idle_conns_per_host: default_max_idle_conns_per_host(),
            close_idle_conns_period: default_close_idle_conns_period(),
            upstream_timeout: default_upstream_timeout(),
            web: WebConfig::default(),
            provider: ProviderConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Builder for GlobalConfig, mostly used by tests and embedders.
#[derive(Default)]
pub struct GlobalConfigBuilder {
    config: GlobalConfig,
}

impl GlobalConfigBuilder {
    /// Set the bind host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the plain HTTP port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Enable TLS with a certificate/key pair
    pub fn tls(mut self, port: u16, cert_file: impl Into<String>, key_file: impl Into<String>) -> Self {
        self.config.tls.port = port;
        self.config.tls.cert_file = Some(cert_file.into());
        self.config.tls.key_file = Some(key_file.into());
        self
    }

    /// Toggle the HTTP -> HTTPS redirect listener
    pub fn tls_redirect(mut self, redirect: bool) -> Self {
        self.config.tls.redirect = redirect;
        self
    }

    pub fn grace_timeout(mut self, grace: Duration) -> Self {
        self.config.grace_timeout = grace;
        self
    }

    pub fn hard_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.config.hard_shutdown_deadline = deadline;
        self
    }

    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.config.upstream_timeout = timeout;
        self
    }

    pub fn request_id(mut self, enabled: bool) -> Self {
        self.config.request_id = enabled;
        self
    }

    /// Set the management API settings
    pub fn web(mut self, web: WebConfig) -> Self {
        self.config.web = web;
        self
    }

    /// Set the configuration provider
    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.config.provider = provider;
        self
    }

    pub fn build(self) -> GlobalConfig {
        self.config
    }
}

/// TLS settings for the traffic listener.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    #[serde(default = "default_tls_port")]
    pub port: u16,
    /// Path to PEM encoded certificate
    #[serde(default)]
    pub cert_file: Option<String>,
    /// Path to PEM encoded private key
    #[serde(default)]
    pub key_file: Option<String>,
    /// Serve a redirect to HTTPS on the plain port
    #[serde(default = "default_true")]
    pub redirect: bool,
}

impl TlsConfig {
    /// TLS is active only when both halves of the key pair are configured.
    pub fn is_https(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            port: default_tls_port(),
            cert_file: None,
            key_file: None,
            redirect: true,
        }
    }
}

/// Basic-auth credentials for the management API.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Management API listener settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: Option<WebTlsConfig>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub read_only: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
            tls: None,
            credentials: None,
            read_only: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WebTlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

/// Where route specifications come from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ProviderConfig {
    /// A local definitions file watched for changes
    File { path: String },
    /// A remote definitions document polled on an interval
    Http {
        url: String,
        #[serde(default = "default_poll_interval", with = "humantime_duration")]
        poll_interval: Duration,
    },
    /// Definitions held in memory and editable through the management API
    Memory {
        #[serde(default)]
        apis: Vec<ApiSpec>,
    },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::File {
            path: "apis.yaml".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_requires_both_files() {
        let mut tls = TlsConfig::default();
        assert!(!tls.is_https());

        tls.cert_file = Some("cert.pem".to_string());
        assert!(!tls.is_https());

        tls.key_file = Some("key.pem".to_string());
        assert!(tls.is_https());
    }

    #[test]
    fn test_serving_and_redirect_addresses() {
        let plain = GlobalConfig::builder().host("127.0.0.1").port(9000).build();
        assert_eq!(plain.serving_addr(), "127.0.0.1:9000");
        assert_eq!(plain.redirect_addr(), None);

        let https = GlobalConfig::builder()
            .host("127.0.0.1")
            .port(9000)
            .tls(9443, "cert.pem", "key.pem")
            .build();
        assert_eq!(https.serving_addr(), "127.0.0.1:9443");
        assert_eq!(https.redirect_addr().as_deref(), Some("127.0.0.1:9000"));

        let no_redirect = GlobalConfig::builder()
            .tls(9443, "cert.pem", "key.pem")
            .tls_redirect(false)
            .build();
        assert_eq!(no_redirect.redirect_addr(), None);
    }

    #[test]
    fn test_duration_fields_parse_humantime() {
        let json = r#"{ "grace_timeout": "250ms", "hard_shutdown_deadline": "3s" }"#;
        let config: GlobalConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.grace_timeout, Duration::from_millis(250));
        assert_eq!(config.hard_shutdown_deadline, Duration::from_secs(3));
        assert_eq!(config.close_idle_conns_period, Duration::from_secs(90));
    }
}
