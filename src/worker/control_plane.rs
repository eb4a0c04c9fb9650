//! Lifecycle reporting to the control-plane API.
//!
//! Reports are best effort: failures are logged and never abort a job.

use crate::config::ControlPlaneConfig;
use crate::error::{Error, Result};
use crate::types::{JobId, JobParameters, JobResult, LogLevel, format_br_date};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Receiver of job lifecycle events
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// A worker picked the job up
    async fn start(&self, job_id: &JobId, params: &JobParameters);

    /// Human-readable progress line
    async fn log(&self, job_id: &JobId, level: LogLevel, message: &str);

    /// Terminal status and result
    async fn finish(&self, job_id: &JobId, result: &JobResult);
}

#[derive(Debug, Serialize)]
struct StartPayload<'a> {
    worker_id: &'a str,
    document_type: &'a str,
    start_date: String,
    end_date: String,
    stores: &'a [u64],
}

#[derive(Debug, Serialize)]
struct LogPayload<'a> {
    level: LogLevel,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct FinishPayload<'a> {
    status: &'static str,
    result: &'a JobResult,
}

/// Reports over HTTP: `POST {base}/jobs/{id}/start|log|finish`
#[derive(Clone, Debug)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
    auth_header: Option<String>,
    worker_id: String,
}

impl HttpControlPlane {
    /// Build a reporter for `config.base_url`
    pub fn new(config: &ControlPlaneConfig, worker_id: impl Into<String>) -> Result<Self> {
        let raw = config.base_url.as_deref().ok_or_else(|| Error::Config {
            message: "control_plane.base_url is required for HTTP reporting".to_string(),
            key: Some("control_plane.base_url".to_string()),
        })?;

        let mut base = Url::parse(raw).map_err(|e| Error::Config {
            message: format!("invalid control plane URL '{raw}': {e}"),
            key: Some("control_plane.base_url".to_string()),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base,
            timeout: config.timeout,
            auth_header: config.auth_header.clone(),
            worker_id: worker_id.into(),
        })
    }

    fn endpoint(&self, job_id: &JobId, action: &str) -> Option<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["jobs", job_id.as_str(), action]);
        Some(url)
    }

    async fn post<T: Serialize + Sync>(&self, job_id: &JobId, action: &str, payload: &T) {
        let Some(url) = self.endpoint(job_id, action) else {
            warn!(base = %self.base, "control plane URL cannot take a path");
            return;
        };

        let mut request = self
            .client
            .post(url.clone())
            .json(payload)
            .timeout(self.timeout);
        if let Some(auth) = &self.auth_header {
            request = request.header("Authorization", auth);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url = %url, "control plane report sent");
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error_msg = format!("control plane returned status {}: {}", status, body);
                warn!(url = %url, job_id = %job_id, error = %error_msg, "control plane report failed");
            }
            Err(e) => {
                let error_msg = if e.is_timeout() {
                    format!("control plane timed out after {:?}", self.timeout)
                } else {
                    format!("failed to reach control plane: {}", e)
                };
                warn!(url = %url, job_id = %job_id, error = %error_msg, "control plane report failed");
            }
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn start(&self, job_id: &JobId, params: &JobParameters) {
        let payload = StartPayload {
            worker_id: &self.worker_id,
            document_type: &params.document_type,
            start_date: format_br_date(params.start_date),
            end_date: format_br_date(params.end_date),
            stores: &params.stores,
        };
        self.post(job_id, "start", &payload).await;
    }

    async fn log(&self, job_id: &JobId, level: LogLevel, message: &str) {
        self.post(job_id, "log", &LogPayload { level, message }).await;
    }

    async fn finish(&self, job_id: &JobId, result: &JobResult) {
        let payload = FinishPayload {
            status: result.status.as_str(),
            result,
        };
        self.post(job_id, "finish", &payload).await;
    }
}

/// Reporter used when no control plane is configured: events go to the log
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingControlPlane;

#[async_trait]
impl ControlPlane for LoggingControlPlane {
    async fn start(&self, job_id: &JobId, params: &JobParameters) {
        info!(
            %job_id,
            document_type = %params.document_type,
            stores = ?params.stores,
            "job started"
        );
    }

    async fn log(&self, job_id: &JobId, level: LogLevel, message: &str) {
        debug!(%job_id, level = level.as_str(), %message, "job log");
    }

    async fn finish(&self, job_id: &JobId, result: &JobResult) {
        info!(
            %job_id,
            status = result.status.as_str(),
            duration_seconds = result.duration_seconds,
            "job finished"
        );
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FiscalSummary, JobOutcome};
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reporter(server: &MockServer, auth: Option<&str>) -> HttpControlPlane {
        let config = ControlPlaneConfig {
            base_url: Some(format!("{}/api", server.uri())),
            timeout: Duration::from_secs(2),
            auth_header: auth.map(str::to_string),
        };
        HttpControlPlane::new(&config, "worker-1").unwrap()
    }

    fn params() -> JobParameters {
        serde_json::from_value(json!({
            "stores": [3, 9],
            "document_type": "NFCe",
            "start_date": "01/02/2024",
            "end_date": "29/02/2024",
            "gms_login_url": "https://erp.example.com"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn start_log_and_finish_hit_their_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/jobs/job-1/start"))
            .and(header("Authorization", "Bearer t0k3n"))
            .and(body_partial_json(json!({
                "worker_id": "worker-1",
                "document_type": "NFCe",
                "start_date": "01/02/2024",
                "stores": [3, 9]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/jobs/job-1/log"))
            .and(body_partial_json(json!({"level": "INFO", "message": "Logging in"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/jobs/job-1/finish"))
            .and(body_partial_json(json!({
                "status": "completed",
                "result": {"status": "completed", "error": null}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let plane = reporter(&server, Some("Bearer t0k3n"));
        let id = JobId::from("job-1");
        plane.start(&id, &params()).await;
        plane.log(&id, LogLevel::Info, "Logging in").await;
        let now = Utc::now();
        plane
            .finish(
                &id,
                &JobOutcome::Success(FiscalSummary::default()).into_result(now, now),
            )
            .await;
    }

    #[tokio::test]
    async fn server_errors_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .expect(1)
            .mount(&server)
            .await;

        let plane = reporter(&server, None);
        plane
            .log(&JobId::from("job-2"), LogLevel::Error, "still reported")
            .await;
    }

    #[tokio::test]
    async fn unreachable_control_plane_does_not_fail() {
        let config = ControlPlaneConfig {
            base_url: Some("http://127.0.0.1:9".to_string()),
            timeout: Duration::from_millis(200),
            auth_header: None,
        };
        let plane = HttpControlPlane::new(&config, "w").unwrap();
        let start = std::time::Instant::now();
        plane.start(&JobId::from("job-3"), &params()).await;
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn endpoints_are_built_under_the_base_path() {
        let config = ControlPlaneConfig {
            base_url: Some("https://maestro.example.com/api/v1".to_string()),
            ..ControlPlaneConfig::default()
        };
        let plane = HttpControlPlane::new(&config, "w").unwrap();
        assert_eq!(
            plane.endpoint(&JobId::from("a b"), "finish").unwrap().as_str(),
            "https://maestro.example.com/api/v1/jobs/a%20b/finish"
        );
    }

    #[test]
    fn missing_base_url_is_a_config_error() {
        let err = HttpControlPlane::new(&ControlPlaneConfig::default(), "w").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
