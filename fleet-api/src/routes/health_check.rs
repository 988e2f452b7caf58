use actix_web::{HttpResponse, Responder, get};

#[utoipa::path(
    summary = "API health status",
    description = "Returns 'ok' while the service accepts requests. Cluster connectivity is not checked.",
    responses(
        (status = 200, description = "The service is up; returns 'ok'.", body = String),
    ),
    tag = "Health",
)]
#[get("/health_check")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("ok")
}
