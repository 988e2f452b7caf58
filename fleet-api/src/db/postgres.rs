use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::db::clusters::{
    ClusterRecord, ClusterStore, ClusterStoreError, NewClusterRecord, SealedKubeconfig,
};
use crate::db::utils::unique_violation_constraint;

const PRIMARY_KEY_CONSTRAINT: &str = "clusters_pkey";

const CLUSTER_COLUMNS: &str = "id, name, sealed_kubeconfig, provider, environment, region, \
     description, status, labels, source, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ClusterRow {
    id: Uuid,
    name: String,
    sealed_kubeconfig: Vec<u8>,
    provider: String,
    environment: String,
    region: String,
    description: String,
    status: String,
    labels: Json<BTreeMap<String, String>>,
    source: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ClusterRow> for ClusterRecord {
    type Error = ClusterStoreError;

    fn try_from(row: ClusterRow) -> Result<Self, Self::Error> {
        Ok(ClusterRecord {
            id: row.id,
            name: row.name,
            sealed_kubeconfig: SealedKubeconfig::new(row.sealed_kubeconfig),
            provider: row.provider,
            environment: row.environment,
            region: row.region,
            description: row.description,
            status: row.status.parse()?,
            labels: row.labels.0,
            source: row.source.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Durable [`ClusterStore`] backed by the `clusters` table.
#[derive(Debug, Clone)]
pub struct PgClusterStore {
    pool: PgPool,
}

impl PgClusterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled migrations to the connected database.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn map_write_error(err: sqlx::Error, id: Uuid, name: &str) -> ClusterStoreError {
    match unique_violation_constraint(&err) {
        Some(PRIMARY_KEY_CONSTRAINT) => ClusterStoreError::DuplicateId(id),
        Some(_) => ClusterStoreError::Duplicate(name.to_owned()),
        None => ClusterStoreError::Database(err),
    }
}

#[async_trait]
impl ClusterStore for PgClusterStore {
    async fn create(&self, record: NewClusterRecord) -> Result<ClusterRecord, ClusterStoreError> {
        let id = record.id.unwrap_or_else(Uuid::new_v4);
        let query = format!(
            r#"
            insert into clusters
                (id, name, sealed_kubeconfig, provider, environment, region, description,
                 status, labels, source)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            returning {CLUSTER_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, ClusterRow>(&query)
            .bind(id)
            .bind(&record.name)
            .bind(record.sealed_kubeconfig.as_bytes())
            .bind(&record.provider)
            .bind(&record.environment)
            .bind(&record.region)
            .bind(&record.description)
            .bind(record.status.as_str())
            .bind(Json(&record.labels))
            .bind(record.source.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_write_error(err, id, &record.name))?;

        row.try_into()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<ClusterRecord, ClusterStoreError> {
        let query = format!("select {CLUSTER_COLUMNS} from clusters where id = $1");

        let row = sqlx::query_as::<_, ClusterRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(ClusterStoreError::NotFound(id))?.try_into()
    }

    async fn get_by_name(&self, name: &str) -> Result<ClusterRecord, ClusterStoreError> {
        let query = format!("select {CLUSTER_COLUMNS} from clusters where name = $1");

        let row = sqlx::query_as::<_, ClusterRow>(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| ClusterStoreError::NameNotFound(name.to_owned()))?
            .try_into()
    }

    async fn list(&self) -> Result<Vec<ClusterRecord>, ClusterStoreError> {
        let query = format!("select {CLUSTER_COLUMNS} from clusters order by created_at, id");

        let rows = sqlx::query_as::<_, ClusterRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ClusterRecord::try_from).collect()
    }

    async fn update(&self, record: ClusterRecord) -> Result<ClusterRecord, ClusterStoreError> {
        let query = format!(
            r#"
            update clusters
            set name = $2, sealed_kubeconfig = $3, provider = $4, environment = $5,
                region = $6, description = $7, status = $8, labels = $9,
                updated_at = greatest(now(), updated_at)
            where id = $1
            returning {CLUSTER_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, ClusterRow>(&query)
            .bind(record.id)
            .bind(&record.name)
            .bind(record.sealed_kubeconfig.as_bytes())
            .bind(&record.provider)
            .bind(&record.environment)
            .bind(&record.region)
            .bind(&record.description)
            .bind(record.status.as_str())
            .bind(Json(&record.labels))
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_write_error(err, record.id, &record.name))?;

        row.ok_or(ClusterStoreError::NotFound(record.id))?
            .try_into()
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<(), ClusterStoreError> {
        let result = sqlx::query("delete from clusters where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ClusterStoreError::NotFound(id));
        }

        Ok(())
    }
}
