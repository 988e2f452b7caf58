use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use chrono::{DateTime, Utc};
use fleet_config::shared::ClusterManagerConfig;
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clusters::active::ActiveClusterFile;
use crate::clusters::cache::{
    BuildTimeouts, ConnectionCache, build_and_probe, with_store_timeout,
};
use crate::clusters::prober::HealthProber;
use crate::clusters::runtime::{ClusterHealth, HealthStatus};
use crate::clusters::ClusterError;
use crate::db::{
    ClusterRecord, ClusterSource, ClusterStatus, ClusterStore, NewClusterRecord, SealedKubeconfig,
};
use crate::k8s::{ClientBundle, ClientFactory, ServerVersion};
use crate::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::vault::{self, EncryptionKey};

/// Descriptive fields of a cluster, all optional free-form text except `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMetadata {
    pub provider: String,
    pub environment: String,
    pub region: String,
    pub description: String,
    pub status: ClusterStatus,
    pub labels: BTreeMap<String, String>,
}

/// Input of [`ClusterManager::register`].
#[derive(Debug, Clone)]
pub struct RegisterCluster {
    pub name: String,
    /// Base64 of the kubeconfig document.
    pub kubeconfig: String,
    pub metadata: ClusterMetadata,
}

/// Input of [`ClusterManager::update`]. Fields left `None` keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct ClusterChanges {
    pub name: Option<String>,
    /// Base64 of a replacement kubeconfig.
    pub kubeconfig: Option<String>,
    pub provider: Option<String>,
    pub environment: Option<String>,
    pub region: Option<String>,
    pub description: Option<String>,
    pub status: Option<ClusterStatus>,
    pub labels: Option<BTreeMap<String, String>>,
}

/// One row of the cluster listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ClusterSummary {
    pub id: Uuid,
    #[schema(example = "prod-eu")]
    pub name: String,
    pub provider: String,
    pub environment: String,
    pub region: String,
    pub status: ClusterStatus,
    pub source: ClusterSource,
    pub health: HealthStatus,
    #[schema(example = "v1.30.2")]
    pub server_version: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Everything known about a cluster except its credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ClusterDetail {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    pub environment: String,
    pub region: String,
    pub description: String,
    pub status: ClusterStatus,
    pub labels: BTreeMap<String, String>,
    pub source: ClusterSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub health: ClusterHealth,
}

/// Entry point of the cluster core.
///
/// Owns the store, the vault key, the connection cache and the active cluster selection.
/// Request handlers only ever talk to this type.
pub struct ClusterManager {
    pub(crate) store: Arc<dyn ClusterStore>,
    pub(crate) key: Arc<EncryptionKey>,
    factory: Arc<dyn ClientFactory>,
    cache: Arc<ConnectionCache>,
    config: ClusterManagerConfig,
    active_id: RwLock<Option<Uuid>>,
    active_file: Option<ActiveClusterFile>,
    /// Serialises writes to the store and the active selection. Never held across a build.
    writes: Mutex<()>,
    default_bundle: OnceCell<Arc<ClientBundle>>,
    shutdown_tx: ShutdownTx,
}

impl ClusterManager {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        key: Arc<EncryptionKey>,
        factory: Arc<dyn ClientFactory>,
        config: ClusterManagerConfig,
        active_file: Option<ActiveClusterFile>,
    ) -> Self {
        let cache = Arc::new(ConnectionCache::new(
            store.clone(),
            key.clone(),
            factory.clone(),
            BuildTimeouts::from(&config),
        ));
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            store,
            key,
            factory,
            cache,
            config,
            active_id: RwLock::new(None),
            active_file,
            writes: Mutex::new(()),
            default_bundle: OnceCell::new(),
            shutdown_tx,
        }
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    pub(crate) fn store_timeout(&self) -> std::time::Duration {
        self.config.store_timeout()
    }

    fn timeouts(&self) -> BuildTimeouts {
        BuildTimeouts::from(&self.config)
    }

    /// Validates a kubeconfig by connecting to its cluster, then stores it sealed.
    ///
    /// Nothing is stored when any step fails.
    pub async fn register(&self, request: RegisterCluster) -> Result<ClusterDetail, ClusterError> {
        let name = validate_name(&request.name)?;

        // Fail fast on a taken name before paying for a network round trip.
        if !self.name_is_free(&name).await? {
            return Err(ClusterError::Duplicate(name));
        }

        let sealed = self.validate_and_seal(&request.kubeconfig).await?;

        let _writes = self.writes.lock().await;
        let metadata = request.metadata;
        let record = with_store_timeout(
            self.config.store_timeout(),
            self.store.create(NewClusterRecord {
                id: None,
                name,
                sealed_kubeconfig: sealed,
                provider: metadata.provider,
                environment: metadata.environment,
                region: metadata.region,
                description: metadata.description,
                status: metadata.status,
                labels: metadata.labels,
                source: ClusterSource::Database,
            }),
        )
        .await?;
        self.cache.invalidate(record.id);

        info!(cluster_id = %record.id, cluster_name = %record.name, "registered cluster");

        Ok(self.detail(record))
    }

    /// Applies `changes` to a database-sourced cluster.
    ///
    /// A new kubeconfig is validated like on registration and drops the cached client.
    pub async fn update(
        &self,
        id: Uuid,
        changes: ClusterChanges,
    ) -> Result<ClusterDetail, ClusterError> {
        let current = self.get_record(id).await?;
        if current.source.is_read_only() {
            return Err(ClusterError::ReadOnly(id));
        }

        let name = changes.name.as_deref().map(validate_name).transpose()?;
        let sealed = match &changes.kubeconfig {
            Some(kubeconfig) => Some(self.validate_and_seal(kubeconfig).await?),
            None => None,
        };
        let credentials_changed = sealed.is_some();

        let _writes = self.writes.lock().await;
        // Re-read under the lock so concurrent updates of other fields are not lost.
        let current = self.get_record(id).await?;
        let record = ClusterRecord {
            name: name.unwrap_or(current.name),
            sealed_kubeconfig: sealed.unwrap_or(current.sealed_kubeconfig),
            provider: changes.provider.unwrap_or(current.provider),
            environment: changes.environment.unwrap_or(current.environment),
            region: changes.region.unwrap_or(current.region),
            description: changes.description.unwrap_or(current.description),
            status: changes.status.unwrap_or(current.status),
            labels: changes.labels.unwrap_or(current.labels),
            ..current
        };

        let updated =
            with_store_timeout(self.config.store_timeout(), self.store.update(record)).await?;
        if credentials_changed {
            self.cache.invalidate(id);
        }

        info!(cluster_id = %id, credentials_changed, "updated cluster");

        Ok(self.detail(updated))
    }

    /// Deletes a database-sourced cluster, drops its client and clears it as active cluster.
    pub async fn delete(&self, id: Uuid) -> Result<(), ClusterError> {
        let _writes = self.writes.lock().await;

        let record = self.get_record(id).await?;
        if record.source.is_read_only() {
            return Err(ClusterError::ReadOnly(id));
        }

        self.cache.invalidate(id);
        with_store_timeout(self.config.store_timeout(), self.store.delete_by_id(id)).await?;
        // A build that read the record before the delete must not stay cached.
        self.cache.invalidate(id);

        if self.get_active_id() == Some(id) {
            if let Err(err) = self.persist_active(None).await {
                warn!(cluster_id = %id, error = %err, "failed to clear persisted active cluster");
            }
            self.swap_active(None);
        }

        info!(cluster_id = %id, "deleted cluster");

        Ok(())
    }

    /// Every cluster with its latest known health, oldest first.
    pub async fn list(&self) -> Result<Vec<ClusterSummary>, ClusterError> {
        let records =
            with_store_timeout(self.config.store_timeout(), self.store.list()).await?;
        let health: HashMap<_, _> = self
            .cache
            .snapshot()
            .into_iter()
            .map(|snapshot| (snapshot.id, snapshot.health))
            .collect();
        let active_id = self.get_active_id();

        Ok(records
            .into_iter()
            .map(|record| {
                let health = health.get(&record.id).cloned().unwrap_or_default();
                ClusterSummary {
                    id: record.id,
                    name: record.name,
                    provider: record.provider,
                    environment: record.environment,
                    region: record.region,
                    status: record.status,
                    source: record.source,
                    health: health.status,
                    server_version: health.server_version.map(|version| version.git_version),
                    is_active: active_id == Some(record.id),
                    created_at: record.created_at,
                }
            })
            .collect())
    }

    pub async fn get_detail(&self, id: Uuid) -> Result<ClusterDetail, ClusterError> {
        let record = self.get_record(id).await?;

        Ok(self.detail(record))
    }

    pub async fn get_detail_by_name(&self, name: &str) -> Result<ClusterDetail, ClusterError> {
        let record =
            with_store_timeout(self.config.store_timeout(), self.store.get_by_name(name)).await?;

        Ok(self.detail(record))
    }

    /// Selects `id` as the active cluster and writes the choice to the configuration file.
    ///
    /// The in-memory selection only changes once the file write succeeded.
    pub async fn set_active(&self, id: Uuid) -> Result<(), ClusterError> {
        let _writes = self.writes.lock().await;

        self.get_record(id).await?;
        self.persist_active(Some(id)).await?;
        self.swap_active(Some(id));

        info!(cluster_id = %id, "selected active cluster");

        Ok(())
    }

    pub fn get_active_id(&self) -> Option<Uuid> {
        *self.active_id.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn get_active_client(&self) -> Result<Arc<ClientBundle>, ClusterError> {
        let id = self.get_active_id().ok_or(ClusterError::NoActive)?;

        self.cache.get_or_build(id).await
    }

    pub async fn get_client_by_id(&self, id: Uuid) -> Result<Arc<ClientBundle>, ClusterError> {
        self.cache.get_or_build(id).await
    }

    /// Resolves `name` to an id and returns that cluster's client.
    pub async fn get_client_by_name(
        &self,
        name: &str,
    ) -> Result<Arc<ClientBundle>, ClusterError> {
        let record =
            with_store_timeout(self.config.store_timeout(), self.store.get_by_name(name)).await?;

        self.cache.get_or_build(record.id).await
    }

    /// Drops the cached client of `id` and connects again.
    pub async fn refresh(&self, id: Uuid) -> Result<ClusterDetail, ClusterError> {
        self.cache.refresh(id).await?;

        self.get_detail(id).await
    }

    /// Asks the cluster for its version using the cached client.
    pub async fn server_version(&self, id: Uuid) -> Result<ServerVersion, ClusterError> {
        let bundle = self.cache.get_or_build(id).await?;
        let probe_timeout = self.config.probe_timeout();

        match tokio::time::timeout(probe_timeout, self.factory.probe(&bundle)).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(ClusterError::Unreachable(format!(
                "discovery probe timed out after {}s",
                probe_timeout.as_secs()
            ))),
        }
    }

    /// Client of the active cluster, or else of the local kubeconfig of the process.
    ///
    /// The local kubeconfig comes from the first path of `KUBECONFIG`, falling back to
    /// `~/.kube/config`. It is built once and then reused.
    pub async fn get_default_client(&self) -> Result<Arc<ClientBundle>, ClusterError> {
        if self.get_active_id().is_some() {
            return self.get_active_client().await;
        }

        self.default_bundle
            .get_or_try_init(|| self.build_default_bundle())
            .await
            .cloned()
    }

    async fn build_default_bundle(&self) -> Result<Arc<ClientBundle>, ClusterError> {
        let path = default_kubeconfig_path().ok_or(ClusterError::NoActive)?;

        self.build_bundle_from_file(&path).await
    }

    /// Builds a client from the kubeconfig at `path`. A missing file means there is no
    /// default cluster.
    async fn build_bundle_from_file(
        &self,
        path: &Path,
    ) -> Result<Arc<ClientBundle>, ClusterError> {
        let kubeconfig = match tokio::fs::read(path).await {
            Ok(kubeconfig) => kubeconfig,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClusterError::NoActive);
            }
            Err(err) => {
                return Err(ClusterError::Internal(format!(
                    "failed to read kubeconfig {}: {err}",
                    path.display()
                )));
            }
        };

        let bundle =
            tokio::time::timeout(self.config.build_timeout(), self.factory.build(&kubeconfig))
                .await
                .map_err(|_| {
                    ClusterError::Unreachable("building the default client timed out".to_owned())
                })??;

        info!(path = %path.display(), "built default kube client");

        Ok(Arc::new(bundle))
    }

    /// Spawns the health prober. It stops when [`ClusterManager::shutdown`] is called.
    pub fn start_health_prober(&self) -> JoinHandle<()> {
        let prober = HealthProber::new(
            self.cache.clone(),
            self.config.health_check_interval(),
            self.config.probe_timeout(),
            self.config.probe_concurrency(),
        );

        tokio::spawn(prober.run(self.shutdown_tx.subscribe()))
    }

    /// Signals background tasks to stop, including ones started afterwards.
    pub fn shutdown(&self) {
        self.shutdown_tx.shutdown();
    }

    pub(crate) async fn get_record(&self, id: Uuid) -> Result<ClusterRecord, ClusterError> {
        with_store_timeout(self.config.store_timeout(), self.store.get_by_id(id)).await
    }

    /// Reads the health of `id` from the cache and joins it with the stored record.
    fn detail(&self, record: ClusterRecord) -> ClusterDetail {
        let health = self.cache.health_of(record.id).unwrap_or_default();

        ClusterDetail {
            is_active: self.get_active_id() == Some(record.id),
            id: record.id,
            name: record.name,
            provider: record.provider,
            environment: record.environment,
            region: record.region,
            description: record.description,
            status: record.status,
            labels: record.labels,
            source: record.source,
            created_at: record.created_at,
            updated_at: record.updated_at,
            health,
        }
    }

    async fn validate_and_seal(&self, kubeconfig: &str) -> Result<SealedKubeconfig, ClusterError> {
        let kubeconfig = BASE64_STANDARD
            .decode(kubeconfig.trim())
            .map_err(|_| ClusterError::Malformed("kubeconfig is not valid base64".to_owned()))?;

        build_and_probe(self.factory.as_ref(), &kubeconfig, self.timeouts()).await?;

        Ok(SealedKubeconfig::new(vault::seal(&kubeconfig, &self.key)?))
    }

    async fn persist_active(&self, id: Option<Uuid>) -> Result<(), ClusterError> {
        let Some(file) = &self.active_file else {
            return Ok(());
        };

        file.persist(id).await.map_err(|err| {
            warn!(path = %file.path().display(), error = %err, "failed to persist active cluster");
            ClusterError::Internal("failed to persist the active cluster selection".to_owned())
        })
    }

    pub(crate) fn swap_active(&self, id: Option<Uuid>) {
        *self.active_id.write().unwrap_or_else(PoisonError::into_inner) = id;
    }

    pub(crate) async fn name_is_free(&self, name: &str) -> Result<bool, ClusterError> {
        match with_store_timeout(self.config.store_timeout(), self.store.get_by_name(name)).await
        {
            Ok(_) => Ok(false),
            Err(ClusterError::NameNotFound(_)) => Ok(true),
            Err(err) => Err(err),
        }
    }
}

fn validate_name(name: &str) -> Result<String, ClusterError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ClusterError::Malformed(
            "cluster name must not be empty".to_owned(),
        ));
    }

    Ok(name.to_owned())
}

/// First entry of `KUBECONFIG`, else `~/.kube/config`.
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    let separator = if cfg!(windows) { ';' } else { ':' };

    std::env::var("KUBECONFIG")
        .ok()
        .and_then(|paths| {
            paths
                .split(separator)
                .map(str::trim)
                .find(|path| !path.is_empty())
                .map(PathBuf::from)
        })
        .or_else(|| dirs::home_dir().map(|home| home.join(".kube").join("config")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::db::memory::MemoryClusterStore;
    use crate::k8s::testing::offline_bundle;
    use crate::k8s::{ClientFactoryError, ProbeError};

    #[derive(Default)]
    struct CountingFactory {
        builds: AtomicUsize,
    }

    #[async_trait]
    impl ClientFactory for CountingFactory {
        async fn build(&self, kubeconfig: &[u8]) -> Result<ClientBundle, ClientFactoryError> {
            if kubeconfig.is_empty() {
                return Err(ClientFactoryError::Malformed("empty kubeconfig".to_owned()));
            }
            self.builds.fetch_add(1, Ordering::SeqCst);

            Ok(offline_bundle())
        }

        async fn probe(&self, _bundle: &ClientBundle) -> Result<ServerVersion, ProbeError> {
            Err(ProbeError::Unreachable("not probed in these tests".to_owned()))
        }
    }

    fn manager(factory: Arc<CountingFactory>) -> ClusterManager {
        ClusterManager::new(
            Arc::new(MemoryClusterStore::new()),
            Arc::new(EncryptionKey::generate().unwrap()),
            factory,
            ClusterManagerConfig::default(),
            None,
        )
    }

    #[tokio::test]
    async fn local_kubeconfig_file_builds_a_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "apiVersion: v1\nkind: Config\n").unwrap();
        let factory = Arc::new(CountingFactory::default());

        let bundle = manager(factory.clone()).build_bundle_from_file(&path).await;

        assert!(bundle.is_ok());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_local_kubeconfig_means_no_default_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(CountingFactory::default());

        let result = manager(factory.clone())
            .build_bundle_from_file(&dir.path().join("absent"))
            .await;

        assert!(matches!(result, Err(ClusterError::NoActive)));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
    }
}
