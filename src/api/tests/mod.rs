use super::*;
use crate::Config;
use crate::store::{JobStore, MemoryJobStore};
use crate::worker::{JobQueue, MemoryQueue};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

mod jobs;

struct TestApi {
    store: Arc<MemoryJobStore>,
    queue: Arc<MemoryQueue>,
    state: AppState,
}

fn test_api(config: Config) -> TestApi {
    let store = Arc::new(MemoryJobStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let state = AppState::new(
        store.clone(),
        Some(queue.clone() as Arc<dyn JobQueue>),
        Arc::new(config),
    );
    TestApi {
        store,
        queue,
        state,
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns_and_stops() {
    let mut config = Config::default();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let api = test_api(config);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(start_api_server(api.state, shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cors_enabled() {
    let mut config = Config::default();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["*".to_string()];
    let app = create_router(test_api(config).state);

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let mut config = Config::default();
    config.api.cors_enabled = false;
    let app = create_router(test_api(config).state);

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_specific_origin() {
    let mut config = Config::default();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["https://ops.example.com".to_string()];
    let app = create_router(test_api(config).state);

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "https://ops.example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "https://ops.example.com"
    );
}
