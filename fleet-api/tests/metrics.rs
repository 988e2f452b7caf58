use fleet_telemetry::tracing::init_test_tracing;
use uuid::Uuid;

use crate::support::mocks::new_create_cluster_request;
use crate::support::test_app::spawn_test_app;

mod support;

#[tokio::test(flavor = "multi_thread")]
async fn metrics_endpoint_returns_200() {
    init_test_tracing();
    // Arrange
    let app = spawn_test_app().await;

    // Act
    let response = app
        .api_client
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    // Assert
    assert!(response.status().is_success());
}

#[tokio::test(flavor = "multi_thread")]
async fn metrics_report_cluster_builds() {
    init_test_tracing();
    // Arrange
    let app = spawn_test_app().await;
    let response = app
        .create_cluster(&new_create_cluster_request("metrics"))
        .await;
    let detail: serde_json::Value = response.json().await.expect("failed to deserialize response");
    let cluster_id: Uuid = detail["id"].as_str().unwrap().parse().unwrap();
    let response = app.read_cluster_version(cluster_id).await;
    assert!(response.status().is_success());

    // Act
    let response = app
        .api_client
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    // Assert
    let body = response.text().await.unwrap();
    assert!(body.contains("fleet_cluster_builds_total"));
}
