use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};
use serde::de::DeserializeOwned;

use crate::{config::models::GlobalConfig, core::api::ApiDefinitions};

/// Prefix for environment overrides, e.g. `SWITCHYARD__PORT=9000` or
/// `SWITCHYARD__TLS__REDIRECT=false`.
pub const ENV_PREFIX: &str = "SWITCHYARD";

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml,
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))
}

fn deserialize_file<T: DeserializeOwned>(path: &Path, with_env: bool) -> Result<T> {
    let mut builder = Config::builder().add_source(File::new(path_str(path)?, file_format(path)));
    if with_env {
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
    }

    let settings = builder
        .build()
        .with_context(|| format!("Failed to build config from {}", path.display()))?;

    settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))
}

/// Load the process configuration from a file, overlaid with environment
/// variables. Supports YAML, JSON, TOML and INI.
pub async fn load_config(config_path: &str) -> Result<GlobalConfig> {
    load_config_sync(config_path)
}

/// Load the process configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<GlobalConfig> {
    deserialize_file(Path::new(config_path), true)
}

/// Load an API definitions document (`apis: [...]`).
pub fn load_api_definitions(path: &Path) -> Result<ApiDefinitions> {
    deserialize_file(path, false)
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::ProviderConfig;

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
host: "127.0.0.1"
port: 3000
grace_timeout: "2s"
request_id: false
tls:
  port: 3443
  redirect: false
web:
  port: 3001
  read_only: true
provider:
  type: "file"
  path: "./apis.yaml"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.grace_timeout, Duration::from_secs(2));
        assert!(!config.request_id);
        assert!(!config.tls.redirect);
        assert!(!config.tls.is_https());
        assert!(config.web.read_only);
        assert_eq!(
            config.provider,
            ProviderConfig::File {
                path: "./apis.yaml".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_load_json_config_with_defaults() {
        let json_content = r#"
{
  "port": 4000,
  "provider": { "type": "http", "url": "http://config-store/apis" }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.hard_shutdown_deadline, Duration::from_secs(10));
        assert_eq!(config.max_idle_conns_per_host, 500);
        match config.provider {
            ProviderConfig::Http { url, poll_interval } => {
                assert_eq!(url, "http://config-store/apis");
                assert_eq!(poll_interval, Duration::from_secs(10));
            }
            other => panic!("unexpected provider: {other:?}"),
        }
    }

    #[test]
    fn test_load_api_definitions() {
        let yaml_content = r#"
apis:
  - name: orders
    proxy:
      listen_path: /orders
      strip_path: true
      upstreams:
        balancing: random
        targets: ["http://orders-1:8080", "http://orders-2:8080"]
  - name: users
    active: false
    proxy:
      listen_path: /users
      upstreams:
        targets: ["http://users:8080"]
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let definitions = load_api_definitions(temp_file.path()).unwrap();
        assert_eq!(definitions.apis.len(), 2);
        assert_eq!(definitions.apis[0].name, "orders");
        assert!(definitions.apis[0].proxy.strip_path);
        assert_eq!(definitions.apis[0].proxy.upstreams.targets.len(), 2);
        assert!(!definitions.apis[1].active);
    }
}
