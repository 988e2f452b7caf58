use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clusters::ClusterError;
use crate::k8s::{ClientBundle, ProbeError, ServerVersion};

/// Connectivity of a cluster as last observed by a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unreachable,
    AuthFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ClusterHealth {
    pub status: HealthStatus,
    pub server_version: Option<ServerVersion>,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ClusterHealth {
    /// Health of a cluster whose last build attempt failed with `err` at `at`.
    pub fn from_build_failure(err: &ClusterError, at: DateTime<Utc>) -> Self {
        let (status, last_probe_at) = match err {
            ClusterError::Unreachable(_) => (HealthStatus::Unreachable, Some(at)),
            ClusterError::AuthFailure(_) => (HealthStatus::AuthFailure, Some(at)),
            _ => (HealthStatus::Unknown, None),
        };

        Self {
            status,
            server_version: None,
            last_probe_at,
            last_error: Some(err.to_string()),
        }
    }
}

/// The live state of one cached cluster: its shared client bundle and its health.
///
/// The bundle never changes once published; a new kubeconfig yields a new runtime.
#[derive(Debug)]
pub struct ClusterRuntime {
    id: Uuid,
    bundle: Arc<ClientBundle>,
    health: RwLock<ClusterHealth>,
}

impl ClusterRuntime {
    /// Creates the runtime of a bundle whose first probe returned `version` at `probed_at`.
    pub fn ready(
        id: Uuid,
        bundle: ClientBundle,
        version: ServerVersion,
        probed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            bundle: Arc::new(bundle),
            health: RwLock::new(ClusterHealth {
                status: HealthStatus::Healthy,
                server_version: Some(version),
                last_probe_at: Some(probed_at),
                last_error: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bundle(&self) -> Arc<ClientBundle> {
        self.bundle.clone()
    }

    pub fn health(&self) -> ClusterHealth {
        self.health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies a probe outcome observed at `probed_at`.
    ///
    /// `last_probe_at` never moves backwards, so a clock step back is absorbed.
    pub fn record_probe(
        &self,
        outcome: Result<ServerVersion, ProbeError>,
        probed_at: DateTime<Utc>,
    ) -> HealthStatus {
        let mut health = self.health.write().unwrap_or_else(PoisonError::into_inner);

        health.last_probe_at = Some(match health.last_probe_at {
            Some(previous) => previous.max(probed_at),
            None => probed_at,
        });

        match outcome {
            Ok(version) => {
                health.status = HealthStatus::Healthy;
                health.server_version = Some(version);
                health.last_error = None;
            }
            Err(err) => {
                health.status = match err {
                    ProbeError::Unreachable(_) => HealthStatus::Unreachable,
                    ProbeError::AuthFailure(_) => HealthStatus::AuthFailure,
                };
                health.last_error = Some(err.to_string());
            }
        }

        health.status
    }
}
