#![allow(clippy::unwrap_used, clippy::expect_used)]

//! The composed router against a mock backend, with the mock token provider.

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use portal_server::{AppConfig, compose, routes};
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;

fn app(backend: &MockServer) -> Router {
    let mut config = AppConfig::default();
    config.backend.base_url = Some(Url::parse(&backend.url("/v1/")).unwrap());
    config.auth.dispatch.allow_insecure_http = true;
    config.auth.mock.latency = Duration::from_millis(1);

    let portal = compose(&config).unwrap();
    routes::router(portal, &config.auth.guard.api_prefix)
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn api_without_authorization_is_rejected_before_backend() {
    let backend = MockServer::start();
    let api = backend.mock(|when, then| {
        when.any_request();
        then.status(200);
    });

    let resp = app(&backend)
        .oneshot(Request::get("/api/accounts").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["status"], 401);
    api.assert_hits(0);
}

#[tokio::test]
async fn authorized_request_is_proxied_with_service_token() {
    let backend = MockServer::start();
    let api = backend.mock(|when, then| {
        when.method(POST)
            .path("/v1/submissions")
            .query_param("draft", "true")
            .header_exists("authorization")
            .json_body(json!({"title": "Q3 report"}));
        then.status(201)
            .header("content-type", "application/json")
            .json_body(json!({"id": 42}));
    });

    let resp = app(&backend)
        .oneshot(
            Request::post("/api/submissions?draft=true")
                .header("authorization", "Bearer user-session")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"title":"Q3 report"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(json_body(resp).await["id"], 42);
    api.assert_hits(1);
}

#[tokio::test]
async fn health_is_public() {
    let backend = MockServer::start();

    let resp = app(&backend)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["token_valid"], true);
}

#[tokio::test]
async fn repeated_backend_rejection_surfaces_as_401() {
    let backend = MockServer::start();
    let api = backend.mock(|when, then| {
        when.method(GET).path("/v1/accounts");
        then.status(401);
    });

    let resp = app(&backend)
        .oneshot(
            Request::get("/api/accounts")
                .header("authorization", "Bearer user-session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(resp).await;
    assert!(
        body["error"].as_str().unwrap().contains("refreshed token"),
        "{body}"
    );
    api.assert_hits(2);
}

#[tokio::test]
async fn backend_errors_pass_through() {
    let backend = MockServer::start();
    let api = backend.mock(|when, then| {
        when.method(GET).path("/v1/accounts/7");
        then.status(503).body("down");
    });

    let resp = app(&backend)
        .oneshot(
            Request::get("/api/accounts/7")
                .header("authorization", "Bearer user-session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    api.assert_hits(1);
}

#[tokio::test]
async fn absolute_url_in_path_never_reaches_another_host() {
    let backend = MockServer::start();
    let elsewhere = MockServer::start();
    let api = backend.mock(|when, then| {
        when.any_request();
        then.status(200);
    });
    let stolen = elsewhere.mock(|when, then| {
        when.any_request();
        then.status(200);
    });

    let resp = app(&backend)
        .oneshot(
            Request::get(format!("/api/{}", elsewhere.url("/steal")))
                .header("authorization", "x")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    stolen.assert_hits(0);
    api.assert_hits(0);
}

#[tokio::test]
async fn dot_segments_cannot_leave_the_backend_base_path() {
    let backend = MockServer::start();
    let admin = backend.mock(|when, then| {
        when.any_request();
        then.status(200);
    });

    let resp = app(&backend)
        .oneshot(
            Request::get("/api/accounts/..%2F..%2Fadmin")
                .header("authorization", "Bearer user-session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    admin.assert_hits(0);
}
