use std::fmt;
use std::time::Duration;

use base64::{Engine, prelude::BASE64_STANDARD};
use fleet_config::shared::{
    ClusterDeclaration, ClusterManagerConfig, PgConnectionConfig, ValidationError,
    validate_cluster_declarations,
};
use fleet_config::{Config, ConfigSecret};
use serde::Deserialize;
use thiserror::Error;

/// Required length in bytes for a valid API key.
const API_KEY_LENGTH_IN_BYTES: usize = 32;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Complete configuration of the fleet API service.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// HTTP server settings.
    pub application: ApplicationSettings,
    /// Postgres backing the durable cluster store. The volatile store is used when absent.
    #[serde(default)]
    pub database: Option<PgConnectionConfig>,
    /// Base64 of the 32-byte key kubeconfigs are sealed with.
    ///
    /// The file loader lowercases keys, so `encryptionKey` arrives as `encryptionkey`.
    #[serde(default, alias = "encryptionkey", alias = "encryptionKey")]
    pub encryption_key: Option<ConfigSecret>,
    /// Base64-encoded API keys. Any of them authenticates a request.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Id of the cluster selected at startup. Written back whenever the selection changes.
    #[serde(default)]
    pub active_id: Option<String>,
    /// Older spelling of `active_id`. Only read when `active_id` is absent, so a stale value
    /// left in `base.yaml` never conflicts with a selection persisted in the environment file.
    #[serde(default, alias = "activecluster", alias = "activeCluster")]
    pub active_cluster: Option<String>,
    /// Clusters materialised from this file at startup.
    #[serde(default)]
    pub clusters: Vec<ClusterDeclaration>,
    #[serde(default)]
    pub cluster_manager: ClusterManagerConfig,
}

impl Config for ApiConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["api_keys"];
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(database) = &self.database {
            database.tls.validate()?;
        }
        validate_cluster_declarations(&self.clusters)?;
        self.cluster_manager.validate()
    }

    /// The active cluster id to restore at startup, `active_id` taking precedence.
    pub fn configured_active_id(&self) -> Option<&str> {
        [&self.active_id, &self.active_cluster]
            .into_iter()
            .filter_map(|value| value.as_deref().map(str::trim))
            .find(|value| !value.is_empty())
    }

    /// The configured encryption key, ignoring a blank value.
    pub fn encryption_key(&self) -> Option<&ConfigSecret> {
        self.encryption_key.as_ref().filter(|key| !key.is_blank())
    }
}

/// How the HTTP layer runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// A single worker, convenient when attaching a debugger.
    Debug,
    #[default]
    Release,
}

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    /// Host address the API listens on.
    pub host: String,
    /// Port number the API listens on.
    pub port: u16,
    #[serde(default)]
    pub mode: ServerMode,
    /// Time a client has to send its request head.
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Time a client has to acknowledge the end of a response before the connection is dropped.
    #[serde(default = "default_timeout_secs")]
    pub write_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ApplicationSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl fmt::Display for ApplicationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    host: {}", self.host)?;
        writeln!(f, "    port: {}", self.port)?;
        writeln!(f, "    mode: {:?}", self.mode)
    }
}

/// Errors that can occur during API key validation and conversion.
#[derive(Debug, Error)]
pub enum ApiKeyConversionError {
    #[error("api key is not base64 encoded")]
    NotBase64Encoded,

    #[error("expected length of api key is 32, but actual length is {0}")]
    LengthNot32Bytes(usize),
}

/// Validated API key as a 32-byte array.
#[derive(Debug)]
pub struct ApiKey {
    pub key: [u8; API_KEY_LENGTH_IN_BYTES],
}

impl TryFrom<&str> for ApiKey {
    type Error = ApiKeyConversionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let key = BASE64_STANDARD
            .decode(value)
            .map_err(|_| ApiKeyConversionError::NotBase64Encoded)?;

        let key = <[u8; API_KEY_LENGTH_IN_BYTES]>::try_from(key.as_slice())
            .map_err(|_| ApiKeyConversionError::LengthNot32Bytes(key.len()))?;

        Ok(ApiKey { key })
    }
}

#[cfg(test)]
mod tests {
    use fleet_config::{Environment, load_config_from};
    use secrecy::ExposeSecret;

    use super::*;

    fn write_config(dir: &std::path::Path, file: &str, contents: &str) {
        std::fs::write(dir.join(file), contents).unwrap();
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let yaml = r#"
application:
  host: 127.0.0.1
  port: 8000
"#;

        let config: ApiConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.database.is_none());
        assert!(config.encryption_key().is_none());
        assert_eq!(config.application.mode, ServerMode::Release);
        assert_eq!(config.application.read_timeout(), Duration::from_secs(30));
        assert_eq!(config.cluster_manager, ClusterManagerConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn legacy_active_cluster_key_is_accepted() {
        let yaml = r#"
application:
  host: 0.0.0.0
  port: 8000
  mode: debug
activeCluster: prod
encryptionKey: "   "
clusters:
  - name: prod
    configPath: in-cluster
    isActive: true
"#;

        let config: ApiConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.configured_active_id(), Some("prod"));
        assert_eq!(config.application.mode, ServerMode::Debug);
        assert!(config.encryption_key().is_none());
        assert!(config.clusters[0].is_in_cluster());
    }

    #[test]
    fn duplicate_declarations_fail_validation() {
        let yaml = r#"
application:
  host: 0.0.0.0
  port: 8000
clusters:
  - name: prod
    config_path: /a
  - name: prod
    config_path: /b
"#;

        let config: ApiConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateClusterDeclaration(_))
        ));
    }

    #[test]
    fn api_keys_must_decode_to_32_bytes() {
        let valid = BASE64_STANDARD.encode([7u8; 32]);
        let short = BASE64_STANDARD.encode([7u8; 16]);

        assert_eq!(ApiKey::try_from(valid.as_str()).unwrap().key, [7u8; 32]);
        assert!(matches!(
            ApiKey::try_from(short.as_str()),
            Err(ApiKeyConversionError::LengthNot32Bytes(16))
        ));
        assert!(matches!(
            ApiKey::try_from("not base64!"),
            Err(ApiKeyConversionError::NotBase64Encoded)
        ));
    }

    #[test]
    fn camel_case_keys_survive_the_file_loader() {
        let dir = tempfile::tempdir().unwrap();
        let key = BASE64_STANDARD.encode([9u8; 32]);
        write_config(
            dir.path(),
            "base.yaml",
            &format!(
                r#"
application:
  host: 127.0.0.1
  port: 8000
activeCluster: prod
encryptionKey: "{key}"
clusters:
  - name: prod
    configPath: in-cluster
    isActive: true
"#
            ),
        );

        let config: ApiConfig = load_config_from(dir.path(), Environment::Dev).unwrap();

        assert_eq!(config.configured_active_id(), Some("prod"));
        assert_eq!(
            config.encryption_key().map(|key| key.expose_secret().to_owned()),
            Some(key)
        );
        assert!(config.clusters[0].is_in_cluster());
        assert!(config.clusters[0].is_active);
    }

    #[test]
    fn persisted_active_id_wins_over_legacy_key_in_base_file() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "base.yaml",
            "application:\n  host: 127.0.0.1\n  port: 8000\nactive_cluster: prod\n",
        );
        write_config(
            dir.path(),
            "dev.yaml",
            "active_id: 3f1e2d4c-5b6a-4789-8a9b-0c1d2e3f4a5b\n",
        );

        let config: ApiConfig = load_config_from(dir.path(), Environment::Dev).unwrap();

        assert_eq!(
            config.configured_active_id(),
            Some("3f1e2d4c-5b6a-4789-8a9b-0c1d2e3f4a5b")
        );
    }

    #[test]
    fn blank_active_id_falls_back_to_legacy_key() {
        let yaml = r#"
application:
  host: 127.0.0.1
  port: 8000
active_id: " "
activeCluster: staging
"#;

        let config: ApiConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.configured_active_id(), Some("staging"));
    }
}
