#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use base64::{Engine, prelude::BASE64_STANDARD};
use fleet_api::clusters::{ActiveClusterFile, ClusterManager, ClusterMetadata, RegisterCluster};
use fleet_api::db::{ClusterStatus, ClusterStore, memory::MemoryClusterStore};
use fleet_api::routes::clusters::{CreateClusterRequest, UpdateClusterRequest};
use fleet_api::vault::EncryptionKey;
use fleet_config::shared::{ClusterDeclaration, ClusterManagerConfig};

use crate::support::k8s_client::MockClientFactory;

/// A syntactically valid kubeconfig for a server named after `cluster`.
pub fn kubeconfig(cluster: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
current-context: {cluster}
clusters:
  - name: {cluster}
    cluster:
      server: https://{cluster}.example.com:6443
contexts:
  - name: {cluster}
    context:
      cluster: {cluster}
      user: {cluster}-admin
users:
  - name: {cluster}-admin
    user:
      token: token-for-{cluster}
"#
    )
}

pub fn encoded_kubeconfig(cluster: &str) -> String {
    BASE64_STANDARD.encode(kubeconfig(cluster))
}

pub fn new_register_cluster(name: &str) -> RegisterCluster {
    RegisterCluster {
        name: name.to_string(),
        kubeconfig: encoded_kubeconfig(name),
        metadata: ClusterMetadata {
            provider: "kind".to_string(),
            environment: "test".to_string(),
            region: "local".to_string(),
            description: format!("{name} cluster"),
            status: ClusterStatus::Active,
            labels: BTreeMap::from([("team".to_string(), "platform".to_string())]),
        },
    }
}

pub fn new_create_cluster_request(name: &str) -> CreateClusterRequest {
    CreateClusterRequest {
        name: name.to_string(),
        kubeconfig: encoded_kubeconfig(name),
        provider: "kind".to_string(),
        environment: "test".to_string(),
        region: "local".to_string(),
        description: String::new(),
        status: ClusterStatus::Active,
        labels: BTreeMap::new(),
    }
}

pub fn new_update_cluster_request() -> UpdateClusterRequest {
    UpdateClusterRequest {
        description: Some("updated".to_string()),
        status: Some(ClusterStatus::Maintenance),
        ..UpdateClusterRequest::default()
    }
}

/// Writes a kubeconfig for `name` into `dir` and declares it.
pub fn declare_cluster(dir: &Path, id: Option<&str>, name: &str, is_active: bool) -> ClusterDeclaration {
    let path = dir.join(format!("{name}.kubeconfig"));
    std::fs::write(&path, kubeconfig(name)).expect("failed to write kubeconfig");

    ClusterDeclaration {
        id: id.map(str::to_string),
        name: name.to_string(),
        config_path: path.display().to_string(),
        provider: "kind".to_string(),
        environment: "test".to_string(),
        region: "local".to_string(),
        description: String::new(),
        is_active,
        labels: BTreeMap::new(),
    }
}

/// Everything a manager test needs to inspect after acting on the manager.
pub struct TestManager {
    pub manager: ClusterManager,
    pub store: Arc<MemoryClusterStore>,
    pub factory: Arc<MockClientFactory>,
    pub key: Arc<EncryptionKey>,
}

pub fn new_manager() -> TestManager {
    new_manager_with(
        Arc::new(MemoryClusterStore::new()),
        Arc::new(EncryptionKey::generate().expect("failed to generate key")),
        None,
    )
}

pub fn new_manager_with(
    store: Arc<MemoryClusterStore>,
    key: Arc<EncryptionKey>,
    active_file: Option<ActiveClusterFile>,
) -> TestManager {
    let factory = Arc::new(MockClientFactory::new());
    let manager = ClusterManager::new(
        store.clone() as Arc<dyn ClusterStore>,
        key.clone(),
        factory.clone(),
        ClusterManagerConfig::default(),
        active_file,
    );

    TestManager {
        manager,
        store,
        factory,
        key,
    }
}
