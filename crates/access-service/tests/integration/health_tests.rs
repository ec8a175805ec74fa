//! Health and metrics endpoints.

use access_test_utils::TestAccessServer;
use reqwest::StatusCode;
use sqlx::PgPool;

#[sqlx::test(migrations = "../../migrations")]
async fn test_health_reports_database(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAccessServer::spawn(pool).await?;

    let response = server
        .client()
        .get(format!("{}/health", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "healthy");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_health_unhealthy_when_database_closed(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAccessServer::spawn(pool.clone()).await?;
    pool.close().await;

    let response = server
        .client()
        .get(format!("{}/health", server.url()))
        .send()
        .await?;

    // Still 200 so probes can read the body.
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "unhealthy");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_metrics_endpoint_is_public(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAccessServer::spawn(pool).await?;

    let response = server
        .client()
        .get(format!("{}/metrics", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_unknown_route_is_404(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAccessServer::spawn(pool).await?;

    let response = server
        .client()
        .get(format!("{}/nope", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
