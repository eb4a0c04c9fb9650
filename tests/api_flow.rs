//! A job submitted over the REST API is picked up by the worker and its
//! progress becomes visible through the same API.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use nfe_harvester::api::{AppState, create_router};
use nfe_harvester::clock::ManualClock;
use nfe_harvester::store::{JobStore, MemoryJobStore};
use nfe_harvester::worker::{Disposition, JobQueue, LoggingControlPlane, MemoryQueue, Worker};
use nfe_harvester::{JobRunner, JobStatus};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn submitted_job_runs_and_is_visible_over_the_api() {
    let root = temp_root();
    let config = Arc::new(test_config(root.path()));
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let queue = Arc::new(MemoryQueue::new());

    let app = create_router(AppState::new(
        store.clone(),
        Some(queue.clone() as Arc<dyn JobQueue>),
        config.clone(),
    ));

    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("Content-Type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({
                "stores": [3],
                "document_type": "NFCe",
                "start_date": "01/02/2024",
                "end_date": "29/02/2024",
                "gms_login_url": "https://erp.example.com/login",
                "gms_user": "fiscal",
                "gms_password": "s3nha"
            }))
            .unwrap(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let runner = JobRunner::new(
        config,
        Arc::new(FakeErp::new("s3nha").with_no_data("Nenhum registro encontrado")),
        Arc::new(selectors()),
        Arc::new(ManualClock::new()),
    );
    let worker = Worker::new(
        queue.clone(),
        Arc::new(runner),
        Arc::new(LoggingControlPlane),
        store,
        Duration::from_millis(10),
    );
    let delivery = queue.next_delivery(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(
        worker.handle(&delivery, &CancellationToken::new()).await,
        Disposition::Acknowledged(JobStatus::CompletedNoInvoices)
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["state"], "completed_no_invoices");
    assert_eq!(job["progress"], 100);
    assert_eq!(job["result"]["status"], "completed_no_invoices");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{job_id}/logs?tail=1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let logs = body_json(response).await;
    assert_eq!(logs.as_array().unwrap().len(), 1);
}
