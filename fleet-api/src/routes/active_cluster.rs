use actix_web::{
    HttpResponse, Responder, get, post,
    web::{Data, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clusters::ClusterManager;
use crate::routes::ErrorMessage;
use crate::routes::clusters::ClusterApiError;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadActiveClusterResponse {
    /// `null` when no cluster is selected.
    pub active_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetActiveClusterRequest {
    #[schema(required = true)]
    pub id: Uuid,
}

#[utoipa::path(
    summary = "Get the active cluster",
    description = "Returns the id of the cluster requests are routed to when no cluster is named.",
    responses(
        (status = 200, description = "Active cluster returned", body = ReadActiveClusterResponse),
    ),
    tag = "Clusters"
)]
#[get("/active-cluster")]
pub async fn read_active_cluster(manager: Data<ClusterManager>) -> impl Responder {
    Json(ReadActiveClusterResponse {
        active_id: manager.get_active_id(),
    })
}

#[utoipa::path(
    summary = "Select the active cluster",
    description = "Selects the active cluster and persists the choice to the configuration file.",
    request_body = SetActiveClusterRequest,
    responses(
        (status = 200, description = "Active cluster selected"),
        (status = 404, description = "Cluster not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage)
    ),
    tag = "Clusters"
)]
#[post("/active-cluster")]
pub async fn set_active_cluster(
    manager: Data<ClusterManager>,
    request: Json<SetActiveClusterRequest>,
) -> Result<impl Responder, ClusterApiError> {
    manager.set_active(request.into_inner().id).await?;

    Ok(HttpResponse::Ok().finish())
}
