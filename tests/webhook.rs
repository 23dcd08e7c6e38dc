// tests/webhook.rs

//! Webhook endpoint behaviors: method/event gating, HMAC verification,
//! and signal coalescing.

mod common;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use lure_index::server::webhook::SECRET_ENV;
use lure_index::server::{create_router, ServerState};
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

fn test_app(sig_tx: mpsc::Sender<()>) -> axum::Router {
    create_router(Arc::new(ServerState { sig_tx }))
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4321))))
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn push_request(event: &str, signature: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("X-GitHub-Event", event)
        .header("X-Hub-Signature-256", signature)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_wrong_method_is_405() {
    let (tx, _rx) = mpsc::channel(1);
    let response = test_app(tx)
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/webhook")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_non_push_event_is_400() {
    let (tx, mut rx) = mpsc::channel(1);
    let response = test_app(tx)
        .oneshot(push_request("ping", &sign("s", b"hello"), "hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(rx.try_recv().is_err());
}

// The env-var-backed secret is process-global, so the scenarios that
// depend on it run in one ordered test.
#[tokio::test]
async fn test_signature_verification_and_coalescing() {
    let (tx, mut rx) = mpsc::channel(1);

    // Missing secret: 500
    std::env::remove_var(SECRET_ENV);
    let response = test_app(tx.clone())
        .oneshot(push_request("push", &sign("s", b"hello"), "hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(rx.try_recv().is_err());

    std::env::set_var(SECRET_ENV, "s");

    // Signature from the wrong secret: 500
    let response = test_app(tx.clone())
        .oneshot(push_request("push", &sign("wrong", b"hello"), "hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(rx.try_recv().is_err());

    // Valid signature: 200 and exactly one token enqueued
    let response = test_app(tx.clone())
        .oneshot(push_request("push", &sign("s", b"hello"), "hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());

    // Two rapid accepted events coalesce into the single slot
    for _ in 0..2 {
        let response = test_app(tx.clone())
            .oneshot(push_request("push", &sign("s", b"hello"), "hello"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_health_endpoint() {
    let (tx, _rx) = mpsc::channel(1);
    let response = test_app(tx)
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
