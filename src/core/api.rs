//! Route specifications and configuration snapshots.
//!
//! A snapshot is the complete desired routing state at one instant: an ordered
//! list of [`ApiSpec`]. Snapshots carry no version; two snapshots are the same
//! exactly when they are structurally equal.
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Load-balancing strategy applied across an API's upstream targets.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    #[serde(rename = "round_robin")]
    RoundRobin,
    #[serde(rename = "random")]
    Random,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Upstreams {
    #[serde(default)]
    pub balancing: LoadBalanceStrategy,
    pub targets: Vec<String>,
}

/// How requests arriving on `listen_path` are forwarded upstream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProxyDefinition {
    /// Path prefix claimed by this API (`/orders` claims `/orders` and `/orders/...`)
    pub listen_path: String,
    pub upstreams: Upstreams,
    /// Remove the listen path before forwarding
    #[serde(default)]
    pub strip_path: bool,
    /// Append the request path to the upstream target's own path
    #[serde(default = "default_true")]
    pub append_path: bool,
    /// Forward the inbound Host header instead of the upstream's
    #[serde(default)]
    pub preserve_host: bool,
    /// Allowed methods; empty allows any method
    #[serde(default)]
    pub methods: Vec<String>,
}

/// A single API (route) definition.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiSpec {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub proxy: ProxyDefinition,
}

impl ApiSpec {
    /// Convenience constructor for a single-target API.
    pub fn new(name: impl Into<String>, listen_path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            proxy: ProxyDefinition {
                listen_path: listen_path.into(),
                upstreams: Upstreams {
                    balancing: LoadBalanceStrategy::RoundRobin,
                    targets: vec![target.into()],
                },
                strip_path: false,
                append_path: true,
                preserve_host: false,
                methods: Vec::new(),
            },
        }
    }

    pub fn with_strip_path(mut self, strip: bool) -> Self {
        self.proxy.strip_path = strip;
        self
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proxy.methods = methods.into_iter().map(Into::into).collect();
        self
    }
}

/// The on-disk / over-the-wire shape of a definitions document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ApiDefinitions {
    #[serde(default)]
    pub apis: Vec<ApiSpec>,
}

/// Message pushed by a configuration provider.
///
/// `configurations == None` means the provider has no more updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationChanged {
    pub configurations: Option<Vec<ApiSpec>>,
}

impl ConfigurationChanged {
    pub fn new(configurations: Vec<ApiSpec>) -> Self {
        Self {
            configurations: Some(configurations),
        }
    }

    /// Terminal message: the provider is done.
    pub fn closed() -> Self {
        Self {
            configurations: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshots_compare_structurally() {
        let a = vec![ApiSpec::new("orders", "/orders", "http://orders:8080")];
        let b = vec![ApiSpec::new("orders", "/orders", "http://orders:8080")];
        assert_eq!(a, b);

        let reordered = vec![
            ApiSpec::new("users", "/users", "http://users:8080"),
            ApiSpec::new("orders", "/orders", "http://orders:8080"),
        ];
        let original = vec![
            ApiSpec::new("orders", "/orders", "http://orders:8080"),
            ApiSpec::new("users", "/users", "http://users:8080"),
        ];
        assert_ne!(reordered, original);
    }

    #[test]
    fn test_spec_defaults_from_yaml_shape() {
        let json = r#"{
            "name": "orders",
            "proxy": {
                "listen_path": "/orders",
                "upstreams": { "targets": ["http://orders:8080"] }
            }
        }"#;
        let spec: ApiSpec = serde_json::from_str(json).unwrap();
        assert!(spec.active);
        assert!(spec.proxy.append_path);
        assert!(!spec.proxy.strip_path);
        assert_eq!(spec.proxy.upstreams.balancing, LoadBalanceStrategy::RoundRobin);
    }
}
