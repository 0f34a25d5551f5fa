//! Router tests that never reach the database: every request here is answered
//! before a connection is needed, so the pool is created lazily and unused.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower::ServiceExt;

use rust_installment_api::config::Config;
use rust_installment_api::handlers::AppState;
use rust_installment_api::routes::router;

const BOUNDARY: &str = "installment-test-boundary";

fn app() -> Router {
    let config = Config {
        database_url: "postgres://localhost:1/unused".to_string(),
        port: 0,
        public_dir: std::env::temp_dir().join("installment-router-smoke"),
        max_upload_bytes: 1024 * 1024,
        db_max_connections: 1,
    };
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy(&config.database_url)
        .expect("lazy pool");
    router(Arc::new(AppState::new(pool, config))).expect("router")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::empty())
        .unwrap()
}

fn multipart(method: &str, uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            BOUNDARY, name, value
        ));
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));

    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.7")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let response = app().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!({ "status": "OK" }));
}

#[tokio::test]
async fn health_does_not_need_client_ip() {
    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn docs_are_served() {
    let response = app().oneshot(get("/api-docs/openapi.yml")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).starts_with("openapi: 3"));

    let response = app().oneshot(get("/docs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_customer_without_required_fields_is_bad_request() {
    let request = multipart("POST", "/api/customers", &[("name", "Somchai")]);
    let response = app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("phone"));
}

#[tokio::test]
async fn create_customer_with_invalid_phone_is_bad_request() {
    let request = multipart(
        "POST",
        "/api/customers",
        &[
            ("name", "Somchai"),
            ("phone", "12"),
            ("address", "Bangkok"),
            ("id_card_number", "1103700012345"),
        ],
    );
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_installment_with_zero_term_is_bad_request() {
    let request = multipart(
        "POST",
        "/api/installments",
        &[
            ("customer_id", "1"),
            ("credit_card_id", "1"),
            ("name", "iPhone 15"),
            ("price", "12000"),
            ("term_months", "0"),
            ("due_date", "5"),
        ],
    );
    let response = app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("term_months"));
}

#[tokio::test]
async fn contract_upload_without_file_is_bad_request() {
    let request = multipart("POST", "/api/installments/1/contract", &[("customerId", "1")]);
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_installment_status_filter_is_bad_request() {
    let response = app()
        .oneshot(get("/api/installments?status=bogus"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_pagination_is_bad_request() {
    let response = app()
        .oneshot(get("/api/customers?limit=abc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_upload_is_not_found() {
    let response = app()
        .oneshot(get("/uploads/does-not-exist.png"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
