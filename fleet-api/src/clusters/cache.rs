use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use fleet_config::shared::ClusterManagerConfig;
use metrics::{counter, gauge, histogram};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clusters::runtime::{ClusterHealth, ClusterRuntime};
use crate::clusters::ClusterError;
use crate::db::{ClusterStore, ClusterStoreError};
use crate::k8s::{ClientBundle, ClientFactory, ServerVersion};
use crate::metrics::{
    FAILURE, FLEET_CACHED_CLUSTERS, FLEET_CLUSTER_BUILD_DURATION_SECONDS,
    FLEET_CLUSTER_BUILDS_TOTAL, OUTCOME, SUCCESS, register_metrics,
};
use crate::vault::{self, EncryptionKey};

type BuildOutcome = Result<Arc<ClusterRuntime>, ClusterError>;

/// Token held by the single caller building a cluster's bundle.
///
/// Callers that find it in the map subscribe and wait for the published outcome. The sender
/// is dropped without a value when the builder is cancelled, which sends waiters back to retry.
#[derive(Debug)]
struct BuildSlot {
    outcome: watch::Sender<Option<BuildOutcome>>,
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Building(Arc<BuildSlot>),
    Ready(Arc<ClusterRuntime>),
}

impl CacheEntry {
    fn is_slot(&self, slot: &Arc<BuildSlot>) -> bool {
        matches!(self, CacheEntry::Building(current) if Arc::ptr_eq(current, slot))
    }
}

#[derive(Debug, Clone)]
struct BuildFailure {
    error: ClusterError,
    at: DateTime<Utc>,
}

/// Per-cluster view returned by [`ConnectionCache::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSnapshot {
    pub id: Uuid,
    pub health: ClusterHealth,
}

enum Claim {
    Wait(watch::Receiver<Option<BuildOutcome>>),
    Build(Arc<BuildSlot>),
}

/// Removes the caller's `Building` placeholder if the build future is dropped midway.
struct BuildGuard<'a> {
    entries: &'a DashMap<Uuid, CacheEntry>,
    id: Uuid,
    slot: Arc<BuildSlot>,
    completed: bool,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            debug!(cluster_id = %self.id, "cluster build cancelled, releasing placeholder");
            self.entries
                .remove_if(&self.id, |_, entry| entry.is_slot(&self.slot));
        }
    }
}

/// Deadlines applied to the network and store calls of a build.
#[derive(Debug, Clone, Copy)]
pub struct BuildTimeouts {
    pub build: Duration,
    pub probe: Duration,
    pub store: Duration,
}

impl From<&ClusterManagerConfig> for BuildTimeouts {
    fn from(config: &ClusterManagerConfig) -> Self {
        Self {
            build: config.build_timeout(),
            probe: config.probe_timeout(),
            store: config.store_timeout(),
        }
    }
}

/// Builds a bundle from a plaintext kubeconfig and probes it once, each step under its deadline.
pub async fn build_and_probe(
    factory: &dyn ClientFactory,
    kubeconfig: &[u8],
    timeouts: BuildTimeouts,
) -> Result<(ClientBundle, ServerVersion), ClusterError> {
    let bundle = tokio::time::timeout(timeouts.build, factory.build(kubeconfig))
        .await
        .map_err(|_| {
            ClusterError::Unreachable(format!(
                "building a client timed out after {}s",
                timeouts.build.as_secs()
            ))
        })??;

    let version = tokio::time::timeout(timeouts.probe, factory.probe(&bundle))
        .await
        .map_err(|_| {
            ClusterError::Unreachable(format!(
                "discovery probe timed out after {}s",
                timeouts.probe.as_secs()
            ))
        })??;

    Ok((bundle, version))
}

/// Runs a store call under the store deadline, surfacing an elapsed deadline as `Internal`.
pub(crate) async fn with_store_timeout<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, ClusterStoreError>>,
) -> Result<T, ClusterError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ClusterError::Internal(format!(
            "cluster store did not answer within {}s",
            deadline.as_secs()
        ))),
    }
}

/// Holds at most one client bundle per cluster id and builds missing ones on demand.
///
/// Concurrent callers asking for the same cold id share a single build. Ready bundles are
/// served from a sharded map without waiting on other ids.
pub struct ConnectionCache {
    entries: DashMap<Uuid, CacheEntry>,
    failures: DashMap<Uuid, BuildFailure>,
    store: Arc<dyn ClusterStore>,
    key: Arc<EncryptionKey>,
    factory: Arc<dyn ClientFactory>,
    timeouts: BuildTimeouts,
}

impl ConnectionCache {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        key: Arc<EncryptionKey>,
        factory: Arc<dyn ClientFactory>,
        timeouts: BuildTimeouts,
    ) -> Self {
        register_metrics();

        Self {
            entries: DashMap::new(),
            failures: DashMap::new(),
            store,
            key,
            factory,
            timeouts,
        }
    }

    /// Returns the bundle of `id`, building it first if it is not cached yet.
    pub async fn get_or_build(&self, id: Uuid) -> Result<Arc<ClientBundle>, ClusterError> {
        self.get_or_build_runtime(id)
            .await
            .map(|runtime| runtime.bundle())
    }

    async fn get_or_build_runtime(&self, id: Uuid) -> BuildOutcome {
        loop {
            let claim = match self.entries.entry(id) {
                Entry::Occupied(entry) => match entry.get() {
                    CacheEntry::Ready(runtime) => return Ok(runtime.clone()),
                    CacheEntry::Building(slot) => Claim::Wait(slot.outcome.subscribe()),
                },
                Entry::Vacant(entry) => {
                    let (outcome, _) = watch::channel(None);
                    let slot = Arc::new(BuildSlot { outcome });
                    entry.insert(CacheEntry::Building(slot.clone()));
                    Claim::Build(slot)
                }
            };

            match claim {
                Claim::Build(slot) => return self.build_as_owner(id, slot).await,
                Claim::Wait(mut receiver) => {
                    let published = receiver
                        .wait_for(Option::is_some)
                        .await
                        .map(|outcome| outcome.clone());

                    match published {
                        Ok(Some(outcome)) => return outcome,
                        // The builder went away without publishing, start over.
                        Ok(None) | Err(_) => continue,
                    }
                }
            }
        }
    }

    async fn build_as_owner(&self, id: Uuid, slot: Arc<BuildSlot>) -> BuildOutcome {
        let mut guard = BuildGuard {
            entries: &self.entries,
            id,
            slot: slot.clone(),
            completed: false,
        };

        let started = Instant::now();
        let outcome = self.build_runtime(id).await;
        histogram!(FLEET_CLUSTER_BUILD_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match &outcome {
            Ok(runtime) => {
                counter!(FLEET_CLUSTER_BUILDS_TOTAL, OUTCOME => SUCCESS).increment(1);
                let stored = match self.entries.entry(id) {
                    Entry::Occupied(mut entry) if entry.get().is_slot(&slot) => {
                        entry.insert(CacheEntry::Ready(runtime.clone()));
                        true
                    }
                    _ => false,
                };
                if stored {
                    self.failures.remove(&id);
                    info!(cluster_id = %id, "cluster client ready");
                } else {
                    debug!(cluster_id = %id, "cluster invalidated during build, result not cached");
                }
            }
            Err(err) => {
                counter!(FLEET_CLUSTER_BUILDS_TOTAL, OUTCOME => FAILURE).increment(1);
                let removed = self
                    .entries
                    .remove_if(&id, |_, entry| entry.is_slot(&slot))
                    .is_some();
                if removed {
                    self.failures.insert(
                        id,
                        BuildFailure {
                            error: err.clone(),
                            at: Utc::now(),
                        },
                    );
                }
                warn!(cluster_id = %id, error = %err, "failed to build cluster client");
            }
        }

        guard.completed = true;
        slot.outcome.send_replace(Some(outcome.clone()));
        self.update_gauge();

        outcome
    }

    async fn build_runtime(&self, id: Uuid) -> BuildOutcome {
        let record = with_store_timeout(self.timeouts.store, self.store.get_by_id(id)).await?;
        let kubeconfig = vault::unseal(record.sealed_kubeconfig.as_bytes(), &self.key)?;

        let (bundle, version) =
            build_and_probe(self.factory.as_ref(), &kubeconfig, self.timeouts).await?;

        Ok(Arc::new(ClusterRuntime::ready(
            id,
            bundle,
            version,
            Utc::now(),
        )))
    }

    /// Drops the entry of `id`. A build in flight still completes for its callers but its
    /// result is not cached.
    pub fn invalidate(&self, id: Uuid) {
        let removed = self.entries.remove(&id).is_some();
        self.failures.remove(&id);
        if removed {
            debug!(cluster_id = %id, "invalidated cluster client");
            self.update_gauge();
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
        self.failures.clear();
        self.update_gauge();
    }

    /// Discards the cached bundle of `id` and builds a fresh one.
    pub async fn refresh(&self, id: Uuid) -> Result<Arc<ClientBundle>, ClusterError> {
        self.invalidate(id);
        self.get_or_build(id).await
    }

    /// Whether any entry, ready or building, exists for `id`.
    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    /// Health of every cluster the cache knows about, including clusters whose last build
    /// failed. Clusters being built for the first time report `Unknown`.
    pub fn snapshot(&self) -> Vec<RuntimeSnapshot> {
        let mut snapshots: Vec<_> = self
            .entries
            .iter()
            .map(|entry| RuntimeSnapshot {
                id: *entry.key(),
                health: match entry.value() {
                    CacheEntry::Ready(runtime) => runtime.health(),
                    CacheEntry::Building(_) => self
                        .failure_health(*entry.key())
                        .unwrap_or_default(),
                },
            })
            .collect();

        for failure in self.failures.iter() {
            if !self.entries.contains_key(failure.key()) {
                snapshots.push(RuntimeSnapshot {
                    id: *failure.key(),
                    health: ClusterHealth::from_build_failure(&failure.error, failure.at),
                });
            }
        }

        snapshots
    }

    /// Health of a single cluster, `None` when the cache has never seen it.
    pub fn health_of(&self, id: Uuid) -> Option<ClusterHealth> {
        match self.entries.get(&id).map(|entry| entry.value().clone()) {
            Some(CacheEntry::Ready(runtime)) => Some(runtime.health()),
            Some(CacheEntry::Building(_)) | None => self.failure_health(id),
        }
    }

    fn failure_health(&self, id: Uuid) -> Option<ClusterHealth> {
        self.failures
            .get(&id)
            .map(|failure| ClusterHealth::from_build_failure(&failure.error, failure.at))
    }

    /// Runtimes with a published bundle, for the health prober.
    pub fn ready_runtimes(&self) -> Vec<Arc<ClusterRuntime>> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.value() {
                CacheEntry::Ready(runtime) => Some(runtime.clone()),
                CacheEntry::Building(_) => None,
            })
            .collect()
    }

    pub fn factory(&self) -> Arc<dyn ClientFactory> {
        self.factory.clone()
    }

    fn update_gauge(&self) {
        let ready = self
            .entries
            .iter()
            .filter(|entry| matches!(entry.value(), CacheEntry::Ready(_)))
            .count();
        gauge!(FLEET_CACHED_CLUSTERS).set(ready as f64);
    }
}
