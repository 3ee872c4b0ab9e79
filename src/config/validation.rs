#![allow(clippy::collapsible_if)]

use std::{collections::HashSet, path::Path};

use eyre::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    config::models::{GlobalConfig, ProviderConfig, TlsConfig, WebConfig},
    core::api::ApiSpec,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

static API_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("API name pattern is a valid regex")
});

const KNOWN_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "TRACE", "CONNECT",
];

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Port conflict detected: {message}")]
    PortConflict { message: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Process configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire process configuration
    pub fn validate(config: &GlobalConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.host.parse::<std::net::IpAddr>().is_err() && config.host != "localhost" {
            errors.push(ValidationError::InvalidField {
                field: "host".to_string(),
                message: format!("'{}' is not an IP address", config.host),
            });
        }

        if let Err(mut tls_errors) = Self::validate_tls_config(&config.tls) {
            errors.append(&mut tls_errors);
        }

        if let Err(e) = Self::validate_web_config(&config.web) {
            errors.push(e);
        }

        if let Err(mut port_errors) = Self::check_port_conflicts(config) {
            errors.append(&mut port_errors);
        }

        if config.hard_shutdown_deadline.is_zero() {
            errors.push(ValidationError::InvalidField {
                field: "hard_shutdown_deadline".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if config.max_idle_conns_per_host == 0 {
            errors.push(ValidationError::InvalidField {
                field: "max_idle_conns_per_host".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Err(e) = Self::validate_provider(&config.provider) {
            errors.push(e);
        }

        if config.grace_timeout > config.hard_shutdown_deadline {
            tracing::warn!(
                "grace_timeout ({:?}) exceeds hard_shutdown_deadline ({:?}); a hung drain will be aborted first",
                config.grace_timeout,
                config.hard_shutdown_deadline
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_tls_config(tls: &TlsConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        match (&tls.cert_file, &tls.key_file) {
            (None, None) => return Ok(()),
            (Some(_), None) | (None, Some(_)) => {
                errors.push(ValidationError::InvalidTls {
                    message: "cert_file and key_file must be provided together".to_string(),
                });
            }
            (Some(cert), Some(key)) => {
                for (field, file) in [("tls.cert_file", cert), ("tls.key_file", key)] {
                    if !Path::new(file).exists() {
                        errors.push(ValidationError::InvalidField {
                            field: field.to_string(),
                            message: format!("File '{file}' does not exist"),
                        });
                    }
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_web_config(web: &WebConfig) -> ValidationResult<()> {
        if let Some(credentials) = &web.credentials {
            if credentials.username.is_empty() {
                return Err(ValidationError::MissingField {
                    field: "web.credentials.username".to_string(),
                });
            }
            if credentials.username.contains(':') {
                return Err(ValidationError::InvalidField {
                    field: "web.credentials.username".to_string(),
                    message: "Must not contain ':'".to_string(),
                });
            }
        }

        if let Some(tls) = &web.tls {
            if !Path::new(&tls.cert_file).exists() || !Path::new(&tls.key_file).exists() {
                return Err(ValidationError::InvalidTls {
                    message: "web.tls cert_file/key_file must exist".to_string(),
                });
            }
        }

        Ok(())
    }

    fn check_port_conflicts(config: &GlobalConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut claimed = vec![("port", config.port)];
        if config.tls.is_https() {
            claimed.push(("tls.port", config.tls.port));
        }
        claimed.push(("web.port", config.web.port));

        for (i, (name, port)) in claimed.iter().enumerate() {
            // Port 0 asks the OS for an ephemeral port and never collides.
            if *port == 0 {
                continue;
            }
            for (other_name, other_port) in claimed.iter().skip(i + 1) {
                if port == other_port {
                    errors.push(ValidationError::PortConflict {
                        message: format!("{name} and {other_name} are both set to {port}"),
                    });
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_provider(provider: &ProviderConfig) -> ValidationResult<()> {
        match provider {
            ProviderConfig::File { path } => {
                if path.is_empty() {
                    return Err(ValidationError::MissingField {
                        field: "provider.path".to_string(),
                    });
                }
            }
            ProviderConfig::Http { url, poll_interval } => {
                ApiSpecValidator::validate_url(url, "provider.url")?;
                if poll_interval.is_zero() {
                    return Err(ValidationError::InvalidField {
                        field: "provider.poll_interval".to_string(),
                        message: "Must be greater than 0".to_string(),
                    });
                }
            }
            ProviderConfig::Memory { apis } => {
                ApiSpecValidator::validate_snapshot(apis)?;
            }
        }
        Ok(())
    }

    /// Format multiple validation errors into a readable message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

/// Validator for route specifications.
pub struct ApiSpecValidator;

impl ApiSpecValidator {
    /// Validate one API definition in isolation.
    pub fn validate(spec: &ApiSpec) -> ValidationResult<()> {
        if !API_NAME.is_match(&spec.name) {
            return Err(ValidationError::InvalidField {
                field: "name".to_string(),
                message: format!("'{}' must be alphanumeric, '-', '_' or '.'", spec.name),
            });
        }

        let listen_path = &spec.proxy.listen_path;
        if !listen_path.starts_with('/') {
            return Err(ValidationError::InvalidField {
                field: format!("api '{}' listen_path", spec.name),
                message: "Listen paths must start with '/'".to_string(),
            });
        }
        if listen_path.contains('{') || listen_path.contains('}') {
            return Err(ValidationError::InvalidField {
                field: format!("api '{}' listen_path", spec.name),
                message: "Listen paths must not contain '{' or '}'".to_string(),
            });
        }

        let targets = &spec.proxy.upstreams.targets;
        if targets.is_empty() {
            return Err(ValidationError::InvalidField {
                field: format!("api '{}' upstreams.targets", spec.name),
                message: "At least one upstream target is required".to_string(),
            });
        }
        for (i, target) in targets.iter().enumerate() {
            Self::validate_url(target, &format!("api '{}' target {}", spec.name, i + 1))?;
        }

        for method in &spec.proxy.methods {
            if !KNOWN_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
                return Err(ValidationError::InvalidField {
                    field: format!("api '{}' methods", spec.name),
                    message: format!("Unknown HTTP method '{method}'"),
                });
            }
        }

        Ok(())
    }

    /// Validate a full snapshot: every spec, unique names, unique listen paths
    /// among active specs.
    pub fn validate_snapshot(specs: &[ApiSpec]) -> ValidationResult<()> {
        let mut names = HashSet::new();
        let mut paths = HashSet::new();

        for spec in specs {
            Self::validate(spec)?;
            if !names.insert(spec.name.as_str()) {
                return Err(ValidationError::RouteConflict {
                    message: format!("API name '{}' is defined more than once", spec.name),
                });
            }
            if spec.active && !paths.insert(spec.proxy.listen_path.trim_end_matches('/')) {
                return Err(ValidationError::RouteConflict {
                    message: format!(
                        "listen_path '{}' of API '{}' is already claimed",
                        spec.proxy.listen_path, spec.name
                    ),
                });
            }
        }

        Ok(())
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::models::Credentials;

    #[test]
    fn validate_accepts_default_config() {
        assert!(ServerConfigValidator::validate(&GlobalConfig::default()).is_ok());
    }

    #[test]
    fn validate_rejects_half_configured_tls() {
        let mut config = GlobalConfig::default();
        config.tls.cert_file = Some("cert.pem".to_string());

        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_missing_tls_files() {
        let config = GlobalConfig::builder()
            .tls(8443, "/nonexistent/cert.pem", "/nonexistent/key.pem")
            .build();

        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_port_conflict_with_management_api() {
        let mut config = GlobalConfig::default();
        config.web.port = config.port;

        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("web.port"));
    }

    #[test]
    fn validate_allows_ephemeral_ports() {
        let mut config = GlobalConfig::default();
        config.port = 0;
        config.web.port = 0;

        assert!(ServerConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn validate_rejects_zero_hard_deadline() {
        let config = GlobalConfig::builder()
            .hard_shutdown_deadline(Duration::ZERO)
            .build();

        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_colon_in_username() {
        let mut config = GlobalConfig::default();
        config.web.credentials = Some(Credentials {
            username: "ad:min".to_string(),
            password: "secret".to_string(),
        });

        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn api_spec_rejects_bad_targets_and_paths() {
        let good = ApiSpec::new("orders", "/orders", "http://orders:8080");
        assert!(ApiSpecValidator::validate(&good).is_ok());

        let bad_scheme = ApiSpec::new("orders", "/orders", "ftp://orders");
        assert!(ApiSpecValidator::validate(&bad_scheme).is_err());

        let bad_path = ApiSpec::new("orders", "orders", "http://orders:8080");
        assert!(ApiSpecValidator::validate(&bad_path).is_err());

        let wildcard = ApiSpec::new("orders", "/orders/{id}", "http://orders:8080");
        assert!(ApiSpecValidator::validate(&wildcard).is_err());

        let bad_method = good.clone().with_methods(["FETCH"]);
        assert!(ApiSpecValidator::validate(&bad_method).is_err());
    }

    #[test]
    fn snapshot_rejects_duplicate_listen_paths() {
        let specs = vec![
            ApiSpec::new("orders", "/orders", "http://orders:8080"),
            ApiSpec::new("orders-v2", "/orders/", "http://orders-v2:8080"),
        ];
        assert!(matches!(
            ApiSpecValidator::validate_snapshot(&specs),
            Err(ValidationError::RouteConflict { .. })
        ));

        let mut inactive = specs.clone();
        inactive[1].active = false;
        assert!(ApiSpecValidator::validate_snapshot(&inactive).is_ok());
    }
}
