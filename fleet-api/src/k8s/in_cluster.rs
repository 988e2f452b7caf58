use std::path::{Path, PathBuf};

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde_json::json;
use thiserror::Error;

/// Directory Kubernetes mounts the pod's service-account credentials into.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";
const SERVICE_PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";
const IN_CLUSTER_NAME: &str = "in-cluster";

#[derive(Debug, Error)]
pub enum InClusterError {
    #[error("environment variable {0} is not set, the process is not running inside a pod")]
    MissingEnv(&'static str),

    #[error("failed to read service account file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render in-cluster kubeconfig: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// Synthesizes a kubeconfig from the pod's service-account mount and service environment.
///
/// The result is an ordinary kubeconfig so in-cluster credentials flow through the same
/// sealing and client-building path as uploaded ones. The token is referenced by path because
/// projected service-account tokens rotate; the client re-reads the file.
pub fn in_cluster_kubeconfig() -> Result<Vec<u8>, InClusterError> {
    let host =
        std::env::var(SERVICE_HOST_ENV).map_err(|_| InClusterError::MissingEnv(SERVICE_HOST_ENV))?;
    let port =
        std::env::var(SERVICE_PORT_ENV).map_err(|_| InClusterError::MissingEnv(SERVICE_PORT_ENV))?;

    kubeconfig_from_service_account(&host, &port, Path::new(SERVICE_ACCOUNT_DIR))
}

/// Renders a kubeconfig for `https://{host}:{port}` pointing at the `token` file of
/// `service_account_dir` and embedding its `ca.crt`.
pub fn kubeconfig_from_service_account(
    host: &str,
    port: &str,
    service_account_dir: &Path,
) -> Result<Vec<u8>, InClusterError> {
    let token_path = service_account_dir.join("token");
    // Fail now rather than on the first request when the mount is missing.
    read_file(&token_path)?;
    let ca = read_file(&service_account_dir.join("ca.crt"))?;

    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_owned()
    };

    let document = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "current-context": IN_CLUSTER_NAME,
        "clusters": [{
            "name": IN_CLUSTER_NAME,
            "cluster": {
                "server": format!("https://{host}:{port}"),
                "certificate-authority-data": BASE64_STANDARD.encode(&ca),
            },
        }],
        "contexts": [{
            "name": IN_CLUSTER_NAME,
            "context": {
                "cluster": IN_CLUSTER_NAME,
                "user": IN_CLUSTER_NAME,
            },
        }],
        "users": [{
            "name": IN_CLUSTER_NAME,
            "user": {
                "tokenFile": token_path.display().to_string(),
            },
        }],
    });

    Ok(serde_yaml::to_string(&document)?.into_bytes())
}

fn read_file(path: &Path) -> Result<Vec<u8>, InClusterError> {
    std::fs::read(path).map_err(|source| InClusterError::Read {
        path: path.to_path_buf(),
        source,
    })
}
