use super::*;
use crate::store::{JobRecord, JobState, LogEntry};
use crate::types::{JobId, LogLevel};
use crate::worker::decode_message;
use serde_json::json;

fn params() -> serde_json::Value {
    json!({
        "stores": [4, 7],
        "document_type": "NFe",
        "start_date": "01/05/2024",
        "end_date": "31/05/2024",
        "gms_login_url": "https://erp.example.com/login",
        "gms_password": "s3cret"
    })
}

fn post_job(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn test_submit_job_queues_and_records() {
    let api = test_api(Config::default());
    let app = create_router(api.state.clone());

    let response = app.oneshot(post_job(params())).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["state"], "queued");
    let job_id = JobId::from(json["job_id"].as_str().unwrap());

    let record = api.store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Queued);
    assert_eq!(record.progress, 0);

    assert_eq!(api.queue.pending(), 1);
    let delivery = api
        .queue
        .next_delivery(Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    let message = decode_message(&delivery.body).unwrap();
    assert_eq!(message.job_id, job_id);
    assert_eq!(message.parameters.stores, vec![4, 7]);
    assert_eq!(
        message.parameters.password.as_deref(),
        Some("s3cret"),
        "password must reach the worker"
    );
}

#[tokio::test]
async fn test_submit_job_missing_fields() {
    let api = test_api(Config::default());
    let app = create_router(api.state.clone());
    let mut body = params();
    body.as_object_mut().unwrap().remove("document_type");

    let response = app.oneshot(post_job(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "missing_fields");
    assert_eq!(json["error"]["details"]["fields"], json!(["document_type"]));
    assert_eq!(api.queue.pending(), 0);
    assert!(api.store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_submit_job_invalid_date() {
    let app = create_router(test_api(Config::default()).state);
    let mut body = params();
    body["end_date"] = json!("2024-05-31");

    let response = app.oneshot(post_job(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "invalid_field");
    assert_eq!(json["error"]["details"]["field"], "end_date");
}

#[tokio::test]
async fn test_submit_job_rejects_non_object_body() {
    let app = create_router(test_api(Config::default()).state);

    let response = app.oneshot(post_job(json!([1, 2, 3]))).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "malformed_message");
}

#[tokio::test]
async fn test_submit_job_without_queue() {
    let state = AppState::new(
        Arc::new(MemoryJobStore::new()),
        None,
        Arc::new(Config::default()),
    );
    let app = create_router(state);

    let response = app.oneshot(post_job(params())).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "queue_error");
}

#[tokio::test]
async fn test_get_unknown_job() {
    let app = create_router(test_api(Config::default()).state);

    let response = app.oneshot(get("/jobs/nope")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "not_found");
    assert_eq!(json["error"]["details"]["job_id"], "nope");
}

#[tokio::test]
async fn test_get_job_and_logs() {
    let api = test_api(Config::default());
    let id = JobId::from("job-42");
    let mut record = JobRecord::queued(id.clone());
    record.start();
    api.store.set(record).await.unwrap();
    for (level, line) in [
        (LogLevel::Info, "[5%] Starting"),
        (LogLevel::Warning, "slow page"),
        (LogLevel::Info, "[20%] Logging in"),
    ] {
        api.store
            .append_log(&id, LogEntry::now(level, line))
            .await
            .unwrap();
    }

    let app = create_router(api.state.clone());
    let response = app.clone().oneshot(get("/jobs/job-42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["job_id"], "job-42");
    assert_eq!(json["state"], "running");

    let response = app
        .clone()
        .oneshot(get("/jobs/job-42/logs?tail=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let lines = json.as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["level"], "WARNING");
    assert_eq!(lines[1]["message"], "[20%] Logging in");

    let response = app.oneshot(get("/jobs/job-42/logs")).await.unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_logs_for_unknown_job() {
    let app = create_router(test_api(Config::default()).state);

    let response = app.oneshot(get("/jobs/ghost/logs")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_jobs() {
    let api = test_api(Config::default());
    let app = create_router(api.state.clone());

    let response = app.clone().oneshot(get("/jobs")).await.unwrap();
    assert_eq!(body_json(response).await, json!([]));

    for _ in 0..2 {
        let response = app.clone().oneshot(post_job(params())).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = app.oneshot(get("/jobs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let jobs = body_json(response).await;
    assert_eq!(jobs.as_array().unwrap().len(), 2);
    assert!(jobs.as_array().unwrap().iter().all(|j| j["state"] == "queued"));
}
