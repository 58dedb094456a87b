//! Health check endpoints

use axum::{Router, routing::get};

/// Greeting served at `/`
async fn root() -> &'static str {
    "Hello from Robot Head Server!"
}

/// Liveness probe
async fn health() -> &'static str {
    "Server is healthy!"
}

/// Build health router (no state needed)
pub fn router() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    async fn get_text(uri: &str) -> (StatusCode, String) {
        let response = router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        assert_eq!(
            get_text("/health").await,
            (StatusCode::OK, "Server is healthy!".to_string())
        );
    }

    #[tokio::test]
    async fn root_greets() {
        assert_eq!(
            get_text("/").await,
            (StatusCode::OK, "Hello from Robot Head Server!".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        assert_eq!(get_text("/nope").await.0, StatusCode::NOT_FOUND);
    }
}
