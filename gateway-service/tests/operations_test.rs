//! Operations endpoint integration tests.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::TestApp;
use gateway_service::{compose_modules, services::DecisionPolicy, Dependencies};

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn readycheck_answers_ready() {
    let app = TestApp::spawn();
    let (status, body) = app.send(get("/readycheck")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ready");
}

#[tokio::test]
async fn health_reports_backends() {
    let app = TestApp::spawn();

    let (status, body) = app.send(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"], "up");
    assert_eq!(body["checks"]["cache"], "up");
    assert_eq!(body["checks"]["queue"], "up");

    app.cache.set_unavailable(true);
    let (status, body) = app.send(get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["cache"], "down");
}

#[tokio::test]
async fn health_reports_unreachable_queue() {
    let app = TestApp::spawn();
    app.jobs.set_unavailable(true);

    let (status, body) = app.send(get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["database"], "up");
    assert_eq!(body["checks"]["queue"], "down");
}

#[tokio::test]
async fn module_shutdown_releases_cache() {
    let app = TestApp::spawn();
    let modules = compose_modules(Dependencies {
        codec: app.codec.clone(),
        store: app.store.clone(),
        cache: app.cache.clone(),
        jobs: app.jobs.clone(),
        policy: DecisionPolicy {
            ttl_seconds: 60,
            negative_ttl_seconds: 0,
            superuser_email_domain: None,
        },
    });

    let names: Vec<_> = modules.iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["authorization", "actions", "operations"]);

    for module in &modules {
        module.shutdown().await;
    }

    let (status, _) = app.send(get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::spawn();
    let (status, _) = app.send(get("/hasura/unknown")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_endpoint_is_served() {
    let app = TestApp::spawn();
    let (status, _) = app.send(get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
}
