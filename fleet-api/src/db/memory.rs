use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::clusters::{ClusterRecord, ClusterStore, ClusterStoreError, NewClusterRecord};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<Uuid, ClusterRecord>,
    /// Insertion sequence per id, breaks ties between equal `created_at` values.
    insertion_order: HashMap<Uuid, u64>,
    next_seq: u64,
}

impl Inner {
    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.records
            .values()
            .any(|record| record.name == name && Some(record.id) != except)
    }
}

/// Volatile [`ClusterStore`] used when no database is configured.
///
/// Contents are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryClusterStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterStore for MemoryClusterStore {
    async fn create(&self, record: NewClusterRecord) -> Result<ClusterRecord, ClusterStoreError> {
        let mut inner = self.inner.write().await;

        if inner.name_taken(&record.name, None) {
            return Err(ClusterStoreError::Duplicate(record.name));
        }

        let id = record.id.unwrap_or_else(Uuid::new_v4);
        if inner.records.contains_key(&id) {
            return Err(ClusterStoreError::DuplicateId(id));
        }

        let now = Utc::now();
        let created = ClusterRecord {
            id,
            name: record.name,
            sealed_kubeconfig: record.sealed_kubeconfig,
            provider: record.provider,
            environment: record.environment,
            region: record.region,
            description: record.description,
            status: record.status,
            labels: record.labels,
            created_at: now,
            updated_at: now,
            source: record.source,
        };

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.insertion_order.insert(id, seq);
        inner.records.insert(id, created.clone());

        Ok(created)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<ClusterRecord, ClusterStoreError> {
        let inner = self.inner.read().await;

        inner
            .records
            .get(&id)
            .cloned()
            .ok_or(ClusterStoreError::NotFound(id))
    }

    async fn get_by_name(&self, name: &str) -> Result<ClusterRecord, ClusterStoreError> {
        let inner = self.inner.read().await;

        inner
            .records
            .values()
            .find(|record| record.name == name)
            .cloned()
            .ok_or_else(|| ClusterStoreError::NameNotFound(name.to_owned()))
    }

    async fn list(&self) -> Result<Vec<ClusterRecord>, ClusterStoreError> {
        let inner = self.inner.read().await;

        let mut records: Vec<_> = inner.records.values().cloned().collect();
        records.sort_by_key(|record| {
            let seq = inner
                .insertion_order
                .get(&record.id)
                .copied()
                .unwrap_or(u64::MAX);
            (record.created_at, seq)
        });

        Ok(records)
    }

    async fn update(&self, record: ClusterRecord) -> Result<ClusterRecord, ClusterStoreError> {
        let mut inner = self.inner.write().await;

        if inner.name_taken(&record.name, Some(record.id)) {
            return Err(ClusterStoreError::Duplicate(record.name));
        }

        let Some(existing) = inner.records.get_mut(&record.id) else {
            return Err(ClusterStoreError::NotFound(record.id));
        };

        // `updated_at` never moves backwards, even if the wall clock does.
        let updated_at = Utc::now().max(existing.updated_at);
        *existing = ClusterRecord {
            created_at: existing.created_at,
            source: existing.source,
            updated_at,
            ..record
        };

        Ok(existing.clone())
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<(), ClusterStoreError> {
        let mut inner = self.inner.write().await;

        if inner.records.remove(&id).is_none() {
            return Err(ClusterStoreError::NotFound(id));
        }
        inner.insertion_order.remove(&id);

        Ok(())
    }
}
