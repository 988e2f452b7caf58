use std::fmt;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::version::Info;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Errors returned while turning a kubeconfig into a [`ClientBundle`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientFactoryError {
    /// The kubeconfig could not be parsed or does not describe a usable context.
    #[error("malformed kubeconfig: {0}")]
    Malformed(String),
    /// The kubeconfig relies on an authentication mechanism this service cannot satisfy.
    #[error("unsupported kubeconfig: {0}")]
    Unsupported(String),
}

/// Errors returned by a discovery probe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The API server could not be reached in time or returned a non-auth failure.
    #[error("cluster unreachable: {0}")]
    Unreachable(String),
    /// The API server rejected the credentials with 401 or 403.
    #[error("cluster rejected credentials: {0}")]
    AuthFailure(String),
}

/// Version reported by a cluster's `/version` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ServerVersion {
    #[schema(example = "1")]
    pub major: String,
    #[schema(example = "30")]
    pub minor: String,
    #[schema(example = "v1.30.2")]
    pub git_version: String,
    #[schema(example = "linux/amd64")]
    pub platform: String,
}

impl From<Info> for ServerVersion {
    fn from(info: Info) -> Self {
        Self {
            major: info.major,
            minor: info.minor,
            git_version: info.git_version,
            platform: info.platform,
        }
    }
}

/// Discovery facet of a [`ClientBundle`].
#[derive(Clone)]
pub struct DiscoveryClient {
    client: kube::Client,
}

impl DiscoveryClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Fetches the server version, the cheapest authenticated call an API server offers.
    pub async fn server_version(&self) -> Result<ServerVersion, kube::Error> {
        self.client.apiserver_version().await.map(Into::into)
    }

    /// Runs full API group discovery.
    pub async fn run(&self) -> Result<kube::Discovery, kube::Error> {
        kube::Discovery::new(self.client.clone()).run().await
    }
}

/// Everything needed to talk to one cluster: its REST config, a typed client and a discovery
/// client.
///
/// Bundles are immutable and cheap to clone. The connection cache shares one bundle per
/// cluster behind an `Arc`.
#[derive(Clone)]
pub struct ClientBundle {
    config: kube::Config,
    client: kube::Client,
    discovery: DiscoveryClient,
}

impl ClientBundle {
    pub fn new(config: kube::Config, client: kube::Client) -> Self {
        let discovery = DiscoveryClient::new(client.clone());

        Self {
            config,
            client,
            discovery,
        }
    }

    pub fn config(&self) -> &kube::Config {
        &self.config
    }

    pub fn client(&self) -> &kube::Client {
        &self.client
    }

    pub fn discovery(&self) -> &DiscoveryClient {
        &self.discovery
    }
}

impl fmt::Debug for ClientBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBundle")
            .field("cluster_url", &self.config.cluster_url)
            .field("default_namespace", &self.config.default_namespace)
            .finish_non_exhaustive()
    }
}

/// Builds and probes Kubernetes clients.
///
/// Implementations never cache: every [`ClientFactory::build`] call returns a fresh bundle.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Parses a plaintext kubeconfig and builds a bundle for its current context.
    async fn build(&self, kubeconfig: &[u8]) -> Result<ClientBundle, ClientFactoryError>;

    /// Issues a discovery call against the bundle's cluster and returns its version.
    async fn probe(&self, bundle: &ClientBundle) -> Result<ServerVersion, ProbeError>;
}
