use std::collections::BTreeMap;

use actix_web::{
    HttpResponse, Responder, ResponseError, delete, get,
    http::StatusCode,
    post,
    web::{Data, Json, Path},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clusters::{
    ClusterChanges, ClusterDetail, ClusterError, ClusterManager, ClusterMetadata, ClusterSummary,
    RegisterCluster,
};
use crate::db::ClusterStatus;
use crate::k8s::ServerVersion;
use crate::routes::ErrorMessage;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct ClusterApiError(#[from] ClusterError);

impl ClusterApiError {
    pub fn to_message(&self) -> String {
        match &self.0 {
            // Do not expose store or crypto details in error messages
            ClusterError::Internal(_) | ClusterError::Vault(_) => {
                "internal server error".to_string()
            }
            // Every other message is ok, as they do not divulge sensitive information
            e => e.to_string(),
        }
    }
}

impl ResponseError for ClusterApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            ClusterError::NotFound(_) | ClusterError::NameNotFound(_) => StatusCode::NOT_FOUND,
            ClusterError::Duplicate(_) | ClusterError::DuplicateId(_) | ClusterError::NoActive => {
                StatusCode::CONFLICT
            }
            ClusterError::Malformed(_) | ClusterError::Unsupported(_) => StatusCode::BAD_REQUEST,
            ClusterError::ReadOnly(_) => StatusCode::FORBIDDEN,
            ClusterError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ClusterError::AuthFailure(_) => StatusCode::BAD_GATEWAY,
            ClusterError::Vault(_) | ClusterError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorMessage {
            error: self.to_message(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateClusterRequest {
    #[schema(example = "prod-eu", required = true)]
    pub name: String,
    /// Base64 of the kubeconfig document.
    #[schema(example = "YXBpVmVyc2lvbjogdjEKa2luZDogQ29uZmlnCg==", required = true)]
    pub kubeconfig: String,
    #[serde(default)]
    #[schema(example = "eks")]
    pub provider: String,
    #[serde(default)]
    #[schema(example = "production")]
    pub environment: String,
    #[serde(default)]
    #[schema(example = "eu-west-1")]
    pub region: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ClusterStatus,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateClusterRequest {
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

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadClustersResponse {
    pub clusters: Vec<ClusterSummary>,
}

#[utoipa::path(
    summary = "Register a cluster",
    description = "Connects to the cluster described by the kubeconfig and, on success, stores the kubeconfig encrypted.",
    request_body = CreateClusterRequest,
    responses(
        (status = 200, description = "Cluster registered successfully", body = ClusterDetail),
        (status = 400, description = "Malformed or unsupported kubeconfig", body = ErrorMessage),
        (status = 409, description = "A cluster with this name already exists", body = ErrorMessage),
        (status = 502, description = "The cluster rejected the credentials", body = ErrorMessage),
        (status = 503, description = "The cluster could not be reached", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage)
    ),
    tag = "Clusters"
)]
#[post("/clusters")]
pub async fn create_cluster(
    manager: Data<ClusterManager>,
    cluster: Json<CreateClusterRequest>,
) -> Result<impl Responder, ClusterApiError> {
    let cluster = cluster.into_inner();

    let detail = manager
        .register(RegisterCluster {
            name: cluster.name,
            kubeconfig: cluster.kubeconfig,
            metadata: ClusterMetadata {
                provider: cluster.provider,
                environment: cluster.environment,
                region: cluster.region,
                description: cluster.description,
                status: cluster.status,
                labels: cluster.labels,
            },
        })
        .await?;

    Ok(Json(detail))
}

#[utoipa::path(
    summary = "List clusters",
    description = "Returns every cluster, oldest first, with its latest known health.",
    responses(
        (status = 200, description = "Clusters listed successfully", body = ReadClustersResponse),
        (status = 500, description = "Internal server error", body = ErrorMessage)
    ),
    tag = "Clusters"
)]
#[get("/clusters")]
pub async fn read_all_clusters(
    manager: Data<ClusterManager>,
) -> Result<impl Responder, ClusterApiError> {
    let clusters = manager.list().await?;

    Ok(Json(ReadClustersResponse { clusters }))
}

#[utoipa::path(
    summary = "Retrieve a cluster",
    description = "Returns a cluster identified by its ID. The kubeconfig is never returned.",
    params(
        ("cluster_id" = Uuid, Path, description = "Unique ID of the cluster"),
    ),
    responses(
        (status = 200, description = "Cluster retrieved successfully", body = ClusterDetail),
        (status = 404, description = "Cluster not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage)
    ),
    tag = "Clusters"
)]
#[get("/clusters/{cluster_id}")]
pub async fn read_cluster(
    manager: Data<ClusterManager>,
    cluster_id: Path<Uuid>,
) -> Result<impl Responder, ClusterApiError> {
    let detail = manager.get_detail(cluster_id.into_inner()).await?;

    Ok(Json(detail))
}

#[utoipa::path(
    summary = "Update a cluster",
    description = "Updates the given fields of a cluster. A new kubeconfig is validated against the cluster before it is stored.",
    request_body = UpdateClusterRequest,
    params(
        ("cluster_id" = Uuid, Path, description = "Unique ID of the cluster"),
    ),
    responses(
        (status = 200, description = "Cluster updated successfully", body = ClusterDetail),
        (status = 400, description = "Malformed or unsupported kubeconfig", body = ErrorMessage),
        (status = 403, description = "The cluster is declared in the configuration file", body = ErrorMessage),
        (status = 404, description = "Cluster not found", body = ErrorMessage),
        (status = 409, description = "A cluster with this name already exists", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage)
    ),
    tag = "Clusters"
)]
#[post("/clusters/{cluster_id}")]
pub async fn update_cluster(
    manager: Data<ClusterManager>,
    cluster_id: Path<Uuid>,
    cluster: Json<UpdateClusterRequest>,
) -> Result<impl Responder, ClusterApiError> {
    let cluster = cluster.into_inner();

    let detail = manager
        .update(
            cluster_id.into_inner(),
            ClusterChanges {
                name: cluster.name,
                kubeconfig: cluster.kubeconfig,
                provider: cluster.provider,
                environment: cluster.environment,
                region: cluster.region,
                description: cluster.description,
                status: cluster.status,
                labels: cluster.labels,
            },
        )
        .await?;

    Ok(Json(detail))
}

#[utoipa::path(
    summary = "Delete a cluster",
    description = "Deletes a cluster and drops its cached client.",
    params(
        ("cluster_id" = Uuid, Path, description = "Unique ID of the cluster"),
    ),
    responses(
        (status = 200, description = "Cluster deleted successfully"),
        (status = 403, description = "The cluster is declared in the configuration file", body = ErrorMessage),
        (status = 404, description = "Cluster not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage)
    ),
    tag = "Clusters"
)]
#[delete("/clusters/{cluster_id}")]
pub async fn delete_cluster(
    manager: Data<ClusterManager>,
    cluster_id: Path<Uuid>,
) -> Result<impl Responder, ClusterApiError> {
    manager.delete(cluster_id.into_inner()).await?;

    Ok(HttpResponse::Ok().finish())
}

#[utoipa::path(
    summary = "Reconnect to a cluster",
    description = "Drops the cached client of a cluster and connects again.",
    params(
        ("cluster_id" = Uuid, Path, description = "Unique ID of the cluster"),
    ),
    responses(
        (status = 200, description = "Cluster client rebuilt", body = ClusterDetail),
        (status = 404, description = "Cluster not found", body = ErrorMessage),
        (status = 502, description = "The cluster rejected the credentials", body = ErrorMessage),
        (status = 503, description = "The cluster could not be reached", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage)
    ),
    tag = "Clusters"
)]
#[post("/clusters/{cluster_id}/refresh")]
pub async fn refresh_cluster(
    manager: Data<ClusterManager>,
    cluster_id: Path<Uuid>,
) -> Result<impl Responder, ClusterApiError> {
    let detail = manager.refresh(cluster_id.into_inner()).await?;

    Ok(Json(detail))
}

#[utoipa::path(
    summary = "Get a cluster's server version",
    description = "Asks the cluster's API server for its version using the cached client.",
    params(
        ("cluster_id" = Uuid, Path, description = "Unique ID of the cluster"),
    ),
    responses(
        (status = 200, description = "Version retrieved successfully", body = ServerVersion),
        (status = 404, description = "Cluster not found", body = ErrorMessage),
        (status = 502, description = "The cluster rejected the credentials", body = ErrorMessage),
        (status = 503, description = "The cluster could not be reached", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage)
    ),
    tag = "Clusters"
)]
#[get("/clusters/{cluster_id}/version")]
pub async fn read_cluster_version(
    manager: Data<ClusterManager>,
    cluster_id: Path<Uuid>,
) -> Result<impl Responder, ClusterApiError> {
    let version = manager.server_version(cluster_id.into_inner()).await?;

    Ok(Json(version))
}
