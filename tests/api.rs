//! HTTP surface integration tests

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use robot_head::api::ApiServerBuilder;
use robot_head::Envelope;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tower::ServiceExt;

mod common;
use common::{recv, send, speaking_pipeline, start_with};

async fn get(router: axum::Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), 4096).await.unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

#[tokio::test]
async fn health_and_root_respond() {
    let server = ApiServerBuilder::new(speaking_pipeline()).build();

    assert_eq!(
        get(server.router(), "/health").await,
        (StatusCode::OK, "Server is healthy!".to_string())
    );
    assert_eq!(
        get(server.router(), "/").await,
        (StatusCode::OK, "Hello from Robot Head Server!".to_string())
    );
}

#[tokio::test]
async fn plain_get_on_ws_is_rejected() {
    let server = ApiServerBuilder::new(speaking_pipeline()).build();

    let (status, _) = get(server.router(), "/ws").await;

    assert!(status.is_client_error(), "{status}");
}

#[tokio::test]
async fn origin_allowlist_is_enforced() {
    let server = start_with(
        ApiServerBuilder::new(speaking_pipeline())
            .allowed_origins(vec!["http://robot.local".to_string()]),
    )
    .await;

    let mut request = server.url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("http://evil.example"));
    match tokio_tungstenite::connect_async(request).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), StatusCode::FORBIDDEN.as_u16());
        }
        Err(other) => panic!("expected HTTP rejection, got {other}"),
        Ok(_) => panic!("foreign origin was accepted"),
    }

    let mut request = server.url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("http://robot.local"));
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    send(&mut ws, &Envelope::user_input("hello")).await;
    assert_eq!(recv(&mut ws).await.kind(), robot_head::MessageKind::Audio);

    server.shutdown().await.unwrap();
}
