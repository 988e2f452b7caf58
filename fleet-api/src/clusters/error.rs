use thiserror::Error;
use uuid::Uuid;

use crate::db::ClusterStoreError;
use crate::k8s::{ClientFactoryError, ProbeError};
use crate::vault::VaultError;

/// Every failure the cluster core reports to its callers.
///
/// The type is `Clone` so a single build failure can be handed to every caller waiting on it.
/// Messages are operator-readable and never embed credentials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("cluster {0} was not found")]
    NotFound(Uuid),

    #[error("cluster named `{0}` was not found")]
    NameNotFound(String),

    #[error("a cluster named `{0}` already exists")]
    Duplicate(String),

    #[error("a cluster with id {0} already exists")]
    DuplicateId(Uuid),

    #[error("{0}")]
    Malformed(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Unreachable(String),

    #[error("{0}")]
    AuthFailure(String),

    #[error("cluster {0} is declared in the configuration file and cannot be modified")]
    ReadOnly(Uuid),

    #[error("no active cluster is selected")]
    NoActive,

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("{0}")]
    Internal(String),
}

impl From<ClusterStoreError> for ClusterError {
    fn from(err: ClusterStoreError) -> Self {
        match err {
            ClusterStoreError::NotFound(id) => ClusterError::NotFound(id),
            ClusterStoreError::NameNotFound(name) => ClusterError::NameNotFound(name),
            ClusterStoreError::Duplicate(name) => ClusterError::Duplicate(name),
            ClusterStoreError::DuplicateId(id) => ClusterError::DuplicateId(id),
            err @ (ClusterStoreError::Database(_) | ClusterStoreError::InvalidRow(_)) => {
                ClusterError::Internal(err.to_string())
            }
        }
    }
}

impl From<ClientFactoryError> for ClusterError {
    fn from(err: ClientFactoryError) -> Self {
        match err {
            ClientFactoryError::Malformed(_) => ClusterError::Malformed(err.to_string()),
            ClientFactoryError::Unsupported(_) => ClusterError::Unsupported(err.to_string()),
        }
    }
}

impl From<ProbeError> for ClusterError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Unreachable(_) => ClusterError::Unreachable(err.to_string()),
            ProbeError::AuthFailure(_) => ClusterError::AuthFailure(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_core_taxonomy() {
        let id = Uuid::new_v4();

        assert_eq!(
            ClusterError::from(ClusterStoreError::NotFound(id)),
            ClusterError::NotFound(id)
        );
        assert_eq!(
            ClusterError::from(ClusterStoreError::Duplicate("prod".to_owned())),
            ClusterError::Duplicate("prod".to_owned())
        );
        assert_eq!(
            ClusterError::from(ClusterStoreError::DuplicateId(id)).to_string(),
            format!("a cluster with id {id} already exists")
        );
        assert!(matches!(
            ClusterError::from(ClusterStoreError::InvalidRow("bad status".to_owned())),
            ClusterError::Internal(_)
        ));
    }

    #[test]
    fn probe_errors_keep_their_kind() {
        let err = ClusterError::from(ProbeError::AuthFailure("Unauthorized (401)".to_owned()));

        assert!(matches!(err, ClusterError::AuthFailure(msg) if msg.contains("401")));
    }
}
