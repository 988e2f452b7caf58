use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde_yaml::Value;
use tracing::debug;

use crate::k8s::{ClientBundle, ClientFactory, ClientFactoryError, ProbeError, ServerVersion};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

static INIT_CRYPTO: Once = Once::new();

/// Installs the aws-lc-rs rustls provider used by every kube client of the process.
///
/// A provider installed earlier by the host application is left in place.
pub fn install_crypto_provider_once() {
    INIT_CRYPTO.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            debug!("a rustls crypto provider was already installed");
        }
    });
}

/// [`ClientFactory`] backed by [`kube`], talking HTTPS to real API servers.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpClientFactory {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Self {
        install_crypto_provider_once();

        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a kubeconfig and resolves the context a client should use.
///
/// A document with several contexts must declare `current-context`; a single unnamed choice is
/// picked implicitly.
pub fn parse_kubeconfig(
    kubeconfig: &[u8],
) -> Result<(Kubeconfig, KubeConfigOptions), ClientFactoryError> {
    let text = std::str::from_utf8(kubeconfig)
        .map_err(|_| ClientFactoryError::Malformed("kubeconfig is not valid UTF-8".to_owned()))?;

    let parsed = Kubeconfig::from_yaml(text)
        .map_err(|err| ClientFactoryError::Malformed(err.to_string()))?;

    let context = match (&parsed.current_context, parsed.contexts.as_slice()) {
        (Some(current), contexts) if !current.is_empty() => {
            if !contexts.iter().any(|named| &named.name == current) {
                return Err(ClientFactoryError::Malformed(format!(
                    "current-context `{current}` is not declared"
                )));
            }
            current.clone()
        }
        (_, [only]) => only.name.clone(),
        (_, []) => {
            return Err(ClientFactoryError::Malformed(
                "kubeconfig declares no contexts".to_owned(),
            ));
        }
        (_, _) => {
            return Err(ClientFactoryError::Malformed(
                "kubeconfig declares several contexts but no current-context".to_owned(),
            ));
        }
    };

    // Checked on the raw document so the result does not depend on which kube auth features are enabled.
    let document: Value = serde_yaml::from_str(text)
        .map_err(|err| ClientFactoryError::Malformed(err.to_string()))?;
    if uses_auth_provider(&document, &context) {
        return Err(ClientFactoryError::Unsupported(format!(
            "context `{context}` authenticates through an auth-provider plugin"
        )));
    }

    let options = KubeConfigOptions {
        context: Some(context),
        ..Default::default()
    };

    Ok((parsed, options))
}

fn uses_auth_provider(document: &Value, context: &str) -> bool {
    let user = document
        .get("contexts")
        .and_then(Value::as_sequence)
        .and_then(|contexts| {
            contexts
                .iter()
                .find(|named| named.get("name").and_then(Value::as_str) == Some(context))
        })
        .and_then(|named| named.get("context"))
        .and_then(|context| context.get("user"))
        .and_then(Value::as_str);

    let Some(user) = user else {
        return false;
    };

    document
        .get("users")
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter(|named| named.get("name").and_then(Value::as_str) == Some(user))
        .any(|named| {
            named
                .get("user")
                .and_then(|user| user.get("auth-provider"))
                .is_some()
        })
}

/// Maps a kube error from a probe onto the probe taxonomy.
pub fn classify_probe_error(err: kube::Error) -> ProbeError {
    match err {
        kube::Error::Api(response) if matches!(response.code, 401 | 403) => {
            ProbeError::AuthFailure(format!("{} ({})", response.message, response.code))
        }
        kube::Error::Auth(err) => ProbeError::AuthFailure(err.to_string()),
        err => ProbeError::Unreachable(err.to_string()),
    }
}

#[async_trait]
impl ClientFactory for HttpClientFactory {
    async fn build(&self, kubeconfig: &[u8]) -> Result<ClientBundle, ClientFactoryError> {
        let (parsed, options) = parse_kubeconfig(kubeconfig)?;

        let mut config = kube::Config::from_custom_kubeconfig(parsed, &options)
            .await
            .map_err(|err| ClientFactoryError::Malformed(err.to_string()))?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);

        let client = kube::Client::try_from(config.clone())
            .map_err(|err| ClientFactoryError::Malformed(err.to_string()))?;

        debug!(cluster_url = %config.cluster_url, "built kube client");

        Ok(ClientBundle::new(config, client))
    }

    async fn probe(&self, bundle: &ClientBundle) -> Result<ServerVersion, ProbeError> {
        bundle
            .discovery()
            .server_version()
            .await
            .map_err(classify_probe_error)
    }
}
