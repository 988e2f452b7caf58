use std::path::PathBuf;

use fleet_config::shared::ClusterDeclaration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clusters::ClusterError;
use crate::clusters::cache::with_store_timeout;
use crate::clusters::manager::ClusterManager;
use crate::db::{ClusterSource, ClusterStatus, NewClusterRecord, SealedKubeconfig};
use crate::k8s::in_cluster::in_cluster_kubeconfig;
use crate::vault;

/// Namespace of the UUIDv5 ids derived for declarations without a UUID id.
pub const DECLARATION_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b0e_8d4a_5c3f_9e7b_1a2d_3c4e_5f60);

/// Outcome of [`ClusterManager::bootstrap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Declarations inserted as new file-sourced records.
    pub inserted: Vec<Uuid>,
    /// Declarations skipped because a record with the same name or id already exists.
    pub existing: Vec<String>,
    /// Declarations whose kubeconfig could not be loaded.
    pub failed: Vec<String>,
    pub active_id: Option<Uuid>,
}

/// Maps a configured id to a record id.
///
/// UUIDs are taken as is; any other value is hashed into a stable UUIDv5.
pub fn resolve_configured_id(value: &str) -> Uuid {
    let value = value.trim();

    Uuid::parse_str(value)
        .unwrap_or_else(|_| Uuid::new_v5(&DECLARATION_ID_NAMESPACE, value.as_bytes()))
}

/// The record id of a declaration: its own id when given, else one derived from its name.
pub fn declaration_id(declaration: &ClusterDeclaration) -> Uuid {
    match declaration.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => resolve_configured_id(id),
        _ => Uuid::new_v5(&DECLARATION_ID_NAMESPACE, declaration.name.trim().as_bytes()),
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

async fn load_declared_kubeconfig(declaration: &ClusterDeclaration) -> Result<Vec<u8>, String> {
    if declaration.is_in_cluster() {
        return in_cluster_kubeconfig().map_err(|err| err.to_string());
    }

    let path = expand_home(&declaration.config_path);
    tokio::fs::read(&path)
        .await
        .map_err(|err| format!("failed to read {}: {err}", path.display()))
}

impl ClusterManager {
    /// Materialises the clusters declared in the configuration file and picks the initial
    /// active cluster.
    ///
    /// Declarations whose name or id is already stored are left untouched, so renaming a
    /// declaration keeps the record stored under its id. A declaration whose kubeconfig cannot
    /// be read is skipped with a warning so one bad entry does not keep the service from
    /// starting.
    ///
    /// The active cluster is `configured_active` when it names a stored cluster, else the
    /// first declaration marked active.
    pub async fn bootstrap(
        &self,
        declarations: &[ClusterDeclaration],
        configured_active: Option<&str>,
    ) -> Result<BootstrapReport, ClusterError> {
        let mut report = BootstrapReport::default();

        for declaration in declarations {
            let name = declaration.name.trim();
            let id = declaration_id(declaration);
            if !self.name_is_free(name).await? {
                info!(cluster_name = %name, "declared cluster already stored, skipping");
                report.existing.push(name.to_owned());
                continue;
            }
            if let Some(stored_name) = self.name_holding_id(id).await? {
                warn!(
                    cluster_id = %id,
                    cluster_name = %name,
                    %stored_name,
                    "declared cluster id is already stored under another name, skipping"
                );
                report.existing.push(name.to_owned());
                continue;
            }

            let kubeconfig = match load_declared_kubeconfig(declaration).await {
                Ok(kubeconfig) => kubeconfig,
                Err(err) => {
                    warn!(cluster_name = %name, error = %err, "skipping declared cluster");
                    report.failed.push(name.to_owned());
                    continue;
                }
            };
            let sealed = SealedKubeconfig::new(vault::seal(&kubeconfig, &self.key)?);

            let created = with_store_timeout(
                self.store_timeout(),
                self.store.create(NewClusterRecord {
                    id: Some(id),
                    name: name.to_owned(),
                    sealed_kubeconfig: sealed,
                    provider: declaration.provider.clone(),
                    environment: declaration.environment.clone(),
                    region: declaration.region.clone(),
                    description: declaration.description.clone(),
                    status: ClusterStatus::Active,
                    labels: declaration.labels.clone(),
                    source: ClusterSource::File,
                }),
            )
            .await;
            let record = match created {
                Ok(record) => record,
                // Another writer took the name or id between the checks and the insert.
                Err(err @ (ClusterError::Duplicate(_) | ClusterError::DuplicateId(_))) => {
                    warn!(cluster_name = %name, error = %err, "skipping declared cluster");
                    report.existing.push(name.to_owned());
                    continue;
                }
                Err(err) => return Err(err),
            };

            info!(cluster_id = %record.id, cluster_name = %record.name, "loaded declared cluster");
            report.inserted.push(record.id);
        }

        report.active_id = self
            .initial_active_id(declarations, configured_active)
            .await?;
        self.swap_active(report.active_id);

        Ok(report)
    }

    /// Name of the stored record with `id`, if any.
    async fn name_holding_id(&self, id: Uuid) -> Result<Option<String>, ClusterError> {
        match self.get_record(id).await {
            Ok(record) => Ok(Some(record.name)),
            Err(ClusterError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn initial_active_id(
        &self,
        declarations: &[ClusterDeclaration],
        configured_active: Option<&str>,
    ) -> Result<Option<Uuid>, ClusterError> {
        if let Some(configured) = configured_active.map(str::trim).filter(|id| !id.is_empty()) {
            let id = resolve_configured_id(configured);
            return match self.get_record(id).await {
                Ok(_) => Ok(Some(id)),
                Err(ClusterError::NotFound(_)) => {
                    warn!(active_id = %configured, "configured active cluster does not exist");
                    Ok(None)
                }
                Err(err) => Err(err),
            };
        }

        let Some(declaration) = declarations.iter().find(|declaration| declaration.is_active)
        else {
            return Ok(None);
        };

        // Go through the name: a pre-existing record may carry a different id.
        match with_store_timeout(
            self.store_timeout(),
            self.store.get_by_name(declaration.name.trim()),
        )
        .await
        {
            Ok(record) => Ok(Some(record.id)),
            Err(ClusterError::NameNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
