#![allow(dead_code)]

use std::io;
use std::net::TcpListener;
use std::sync::Arc;

use actix_web::web;
use base64::{Engine, prelude::BASE64_STANDARD};
use fleet_api::clusters::{ActiveClusterFile, ClusterManager};
use fleet_api::config::{ApiConfig, ApplicationSettings, ServerMode};
use fleet_api::db::memory::MemoryClusterStore;
use fleet_api::routes::active_cluster::SetActiveClusterRequest;
use fleet_api::routes::clusters::{CreateClusterRequest, UpdateClusterRequest};
use fleet_api::startup::run;
use fleet_api::vault::EncryptionKey;
use fleet_config::shared::{ClusterDeclaration, ClusterManagerConfig};
use fleet_telemetry::metrics::init_metrics_handle;
use reqwest::{IntoUrl, RequestBuilder};
use tempfile::TempDir;
use uuid::Uuid;

use crate::support::k8s_client::MockClientFactory;

pub struct TestApp {
    pub address: String,
    pub api_client: reqwest::Client,
    pub api_key: String,
    pub factory: Arc<MockClientFactory>,
    pub manager: web::Data<ClusterManager>,
    pub config_dir: TempDir,
    server_handle: tokio::task::JoinHandle<io::Result<()>>,
}

impl TestApp {
    fn get_authenticated<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.api_client.get(url).bearer_auth(self.api_key.clone())
    }

    fn post_authenticated<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.api_client.post(url).bearer_auth(self.api_key.clone())
    }

    fn delete_authenticated<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.api_client
            .delete(url)
            .bearer_auth(self.api_key.clone())
    }

    pub async fn create_cluster(&self, cluster: &CreateClusterRequest) -> reqwest::Response {
        self.post_authenticated(format!("{}/v1/clusters", &self.address))
            .json(cluster)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn read_cluster(&self, cluster_id: Uuid) -> reqwest::Response {
        self.get_authenticated(format!("{}/v1/clusters/{cluster_id}", &self.address))
            .send()
            .await
            .expect("failed to execute request")
    }

    pub async fn read_all_clusters(&self) -> reqwest::Response {
        self.get_authenticated(format!("{}/v1/clusters", &self.address))
            .send()
            .await
            .expect("failed to execute request")
    }

    pub async fn update_cluster(
        &self,
        cluster_id: Uuid,
        cluster: &UpdateClusterRequest,
    ) -> reqwest::Response {
        self.post_authenticated(format!("{}/v1/clusters/{cluster_id}", &self.address))
            .json(cluster)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn delete_cluster(&self, cluster_id: Uuid) -> reqwest::Response {
        self.delete_authenticated(format!("{}/v1/clusters/{cluster_id}", &self.address))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn refresh_cluster(&self, cluster_id: Uuid) -> reqwest::Response {
        self.post_authenticated(format!(
            "{}/v1/clusters/{cluster_id}/refresh",
            &self.address
        ))
        .send()
        .await
        .expect("Failed to execute request.")
    }

    pub async fn read_cluster_version(&self, cluster_id: Uuid) -> reqwest::Response {
        self.get_authenticated(format!(
            "{}/v1/clusters/{cluster_id}/version",
            &self.address
        ))
        .send()
        .await
        .expect("failed to execute request")
    }

    pub async fn read_active_cluster(&self) -> reqwest::Response {
        self.get_authenticated(format!("{}/v1/active-cluster", &self.address))
            .send()
            .await
            .expect("failed to execute request")
    }

    pub async fn set_active_cluster(&self, cluster_id: Uuid) -> reqwest::Response {
        self.post_authenticated(format!("{}/v1/active-cluster", &self.address))
            .json(&SetActiveClusterRequest { id: cluster_id })
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.manager.shutdown();
        self.server_handle.abort();
    }
}

pub fn test_config(api_keys: Vec<String>, clusters: Vec<ClusterDeclaration>) -> ApiConfig {
    ApiConfig {
        application: ApplicationSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            mode: ServerMode::Release,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
        },
        database: None,
        encryption_key: None,
        api_keys,
        active_id: None,
        active_cluster: None,
        clusters,
        cluster_manager: ClusterManagerConfig::default(),
    }
}

pub async fn spawn_test_app() -> TestApp {
    spawn_test_app_with(|_| Vec::new()).await
}

/// Spawns the API with clusters declared by `declare`, which receives the directory the
/// configuration lives in.
pub async fn spawn_test_app_with<F>(declare: F) -> TestApp
where
    F: FnOnce(&std::path::Path) -> Vec<ClusterDeclaration>,
{
    let base_address = "127.0.0.1";
    let listener =
        TcpListener::bind(format!("{base_address}:0")).expect("failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let config_dir = tempfile::tempdir().expect("failed to create configuration directory");
    let clusters = declare(config_dir.path());

    // Two keys to show that any configured key is accepted.
    let api_keys = vec![
        BASE64_STANDARD.encode([1u8; 32]),
        BASE64_STANDARD.encode([2u8; 32]),
    ];
    let api_key = api_keys[1].clone();
    let config = test_config(api_keys, clusters);

    let factory = Arc::new(MockClientFactory::new());
    let manager = ClusterManager::new(
        Arc::new(MemoryClusterStore::new()),
        Arc::new(EncryptionKey::generate().expect("failed to generate key")),
        factory.clone(),
        config.cluster_manager.clone(),
        Some(ActiveClusterFile::new(config_dir.path().join("dev.yaml"))),
    );
    manager
        .bootstrap(&config.clusters, config.configured_active_id())
        .await
        .expect("failed to bootstrap declared clusters");
    let manager = web::Data::new(manager);

    let metrics_handle = init_metrics_handle().expect("failed to init metrics handle");

    let server = run(config, listener, manager.clone(), metrics_handle)
        .await
        .expect("failed to bind address");

    let server_handle = tokio::spawn(server);

    TestApp {
        address: format!("http://{base_address}:{port}"),
        api_client: reqwest::Client::new(),
        api_key,
        factory,
        manager,
        config_dir,
        server_handle,
    }
}
