use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod active_cluster;
pub mod clusters;
pub mod health_check;
pub mod metrics;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorMessage {
    #[schema(example = "an error occurred in the api")]
    pub error: String,
}
