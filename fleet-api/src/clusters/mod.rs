//! The cluster management core.
//!
//! [`ClusterManager`] composes the store, the vault, the client factory and the
//! [`ConnectionCache`]. The cache keeps one client bundle per cluster and coalesces concurrent
//! builds; the [`HealthProber`] refreshes the health of cached clusters in the background and
//! only ever sees the cache.

pub mod active;
mod bootstrap;
pub mod cache;
mod error;
mod manager;
pub mod prober;
pub mod runtime;

pub use active::ActiveClusterFile;
pub use bootstrap::{BootstrapReport, DECLARATION_ID_NAMESPACE, declaration_id, resolve_configured_id};
pub use cache::{BuildTimeouts, ConnectionCache, RuntimeSnapshot};
pub use error::ClusterError;
pub use manager::{
    ClusterChanges, ClusterDetail, ClusterManager, ClusterMetadata, ClusterSummary,
    RegisterCluster, default_kubeconfig_path,
};
pub use prober::HealthProber;
pub use runtime::{ClusterHealth, ClusterRuntime, HealthStatus};
