use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle label set by administrators. It does not reflect connectivity, see
/// [`crate::clusters::HealthStatus`] for that.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    #[default]
    Active,
    Maintenance,
    Inactive,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Active => "active",
            ClusterStatus::Maintenance => "maintenance",
            ClusterStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterStatus {
    type Err = ClusterStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ClusterStatus::Active),
            "maintenance" => Ok(ClusterStatus::Maintenance),
            "inactive" => Ok(ClusterStatus::Inactive),
            other => Err(ClusterStoreError::InvalidRow(format!(
                "unknown cluster status `{other}`"
            ))),
        }
    }
}

/// Where a record came from. File-sourced records are read-only through the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSource {
    #[default]
    Database,
    File,
}

impl ClusterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterSource::Database => "database",
            ClusterSource::File => "file",
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, ClusterSource::File)
    }
}

impl FromStr for ClusterSource {
    type Err = ClusterStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" => Ok(ClusterSource::Database),
            "file" => Ok(ClusterSource::File),
            other => Err(ClusterStoreError::InvalidRow(format!(
                "unknown cluster source `{other}`"
            ))),
        }
    }
}

/// Kubeconfig ciphertext produced by [`crate::vault::seal`].
///
/// The only field of a record holding credential material. `Debug` prints the length only.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedKubeconfig(Vec<u8>);

impl SealedKubeconfig {
    pub fn new(sealed: Vec<u8>) -> Self {
        Self(sealed)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for SealedKubeconfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedKubeconfig({} bytes)", self.0.len())
    }
}

/// A persisted cluster identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRecord {
    pub id: Uuid,
    pub name: String,
    pub sealed_kubeconfig: SealedKubeconfig,
    pub provider: String,
    pub environment: String,
    pub region: String,
    pub description: String,
    pub status: ClusterStatus,
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: ClusterSource,
}

/// Input of [`ClusterStore::create`]. The store assigns timestamps, and an id when none is
/// given.
#[derive(Debug, Clone)]
pub struct NewClusterRecord {
    pub id: Option<Uuid>,
    pub name: String,
    pub sealed_kubeconfig: SealedKubeconfig,
    pub provider: String,
    pub environment: String,
    pub region: String,
    pub description: String,
    pub status: ClusterStatus,
    pub labels: BTreeMap<String, String>,
    pub source: ClusterSource,
}

#[derive(Debug, Error)]
pub enum ClusterStoreError {
    #[error("cluster {0} was not found")]
    NotFound(Uuid),

    #[error("cluster named `{0}` was not found")]
    NameNotFound(String),

    #[error("a cluster named `{0}` already exists")]
    Duplicate(String),

    #[error("a cluster with id {0} already exists")]
    DuplicateId(Uuid),

    #[error("error while interacting with Postgres for clusters: {0}")]
    Database(#[from] sqlx::Error),

    #[error("a stored cluster row is invalid: {0}")]
    InvalidRow(String),
}

/// Storage of [`ClusterRecord`]s.
///
/// Kubeconfigs arrive already sealed; stores never encrypt or decrypt. Every operation is
/// atomic with respect to other operations on the same id and names are unique across all
/// records.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Inserts a record, failing with [`ClusterStoreError::Duplicate`] on a name collision.
    async fn create(&self, record: NewClusterRecord) -> Result<ClusterRecord, ClusterStoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<ClusterRecord, ClusterStoreError>;

    async fn get_by_name(&self, name: &str) -> Result<ClusterRecord, ClusterStoreError>;

    /// Returns every record ordered by creation time, oldest first.
    async fn list(&self) -> Result<Vec<ClusterRecord>, ClusterStoreError>;

    /// Replaces the mutable fields of the record with the same id and refreshes `updated_at`.
    ///
    /// `created_at` and `source` are kept from the stored record.
    async fn update(&self, record: ClusterRecord) -> Result<ClusterRecord, ClusterStoreError>;

    /// Deletes the record, failing with [`ClusterStoreError::NotFound`] if it is already gone.
    async fn delete_by_id(&self, id: Uuid) -> Result<(), ClusterStoreError>;
}
