use crate::classifier::{Acknowledgment, Intent, classify};
use crate::config::Listener;
use crate::metrics_defs::REQUESTS;
use crate::pipeline::Pipeline;
use crate::types::{JobKind, JobOutcome, RetrievalJob, RetrievalRequest};
use crate::worker::Worker;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;
use shared::counter;
use std::sync::Arc;
use tokio::net::TcpListener;

const CORS_HEADERS: [(HeaderName, &str); 2] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"),
];

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{path} only accepts {expected} jobs")]
    WrongJobKind {
        path: &'static str,
        expected: &'static str,
    },
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub worker: Arc<Worker>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/submit", post(submit))
        .route("/jobs/file", post(file_job))
        .route("/jobs/record", post(record_job))
        .with_state(state)
}

pub async fn serve(listener: Listener, state: AppState) -> Result<(), ApiError> {
    let app = router(state);

    let addr = format!("{}:{}", listener.host, listener.port);
    tracing::info!(%addr, "retrieval api listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

impl IntoResponse for Acknowledgment {
    fn into_response(self) -> Response {
        (self.status, CORS_HEADERS, self.message).into_response()
    }
}

/// Classifies, acknowledges, and leaves the retrieval running in the background.
async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<RetrievalRequest>, JsonRejection>,
) -> Response {
    // Unreadable bodies still get the CORS headers
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable submission");
            counter!(REQUESTS, "intent" => Intent::Rejected.as_str()).increment(1);
            return Acknowledgment::new(Intent::Rejected, &RetrievalRequest::default())
                .into_response();
        }
    };

    if request.honeypot {
        tracing::debug!("discarding honeypot submission");
        return (StatusCode::NO_CONTENT, CORS_HEADERS).into_response();
    }

    let intent = classify(&request);
    counter!(REQUESTS, "intent" => intent.as_str()).increment(1);
    let ack = Acknowledgment::new(intent, &request);

    if intent != Intent::Rejected {
        let pipeline = state.pipeline.clone();
        let request = Arc::new(request);

        tokio::spawn(async move {
            match pipeline.run(request, intent).await {
                Ok(jobs) => {
                    let outcomes = jobs.join_all().await;
                    let failed = outcomes.iter().filter(|o| o.is_failure()).count();
                    tracing::info!(
                        intent = intent.as_str(),
                        jobs = outcomes.len(),
                        failed,
                        "request complete"
                    );
                }
                Err(e) => {
                    tracing::error!(intent = intent.as_str(), error = %e, "request failed")
                }
            }
        });
    }

    ack.into_response()
}

async fn file_job(
    State(state): State<AppState>,
    Json(job): Json<RetrievalJob>,
) -> Result<Json<JobOutcome>, ApiError> {
    if !matches!(job.kind, JobKind::File) {
        return Err(ApiError::WrongJobKind {
            path: "/jobs/file",
            expected: "file",
        });
    }
    Ok(Json(state.worker.run(&job).await))
}

async fn record_job(
    State(state): State<AppState>,
    Json(job): Json<RetrievalJob>,
) -> Result<Json<JobOutcome>, ApiError> {
    if !matches!(job.kind, JobKind::Record { .. }) {
        return Err(ApiError::WrongJobKind {
            path: "/jobs/record",
            expected: "record",
        });
    }
    Ok(Json(state.worker.run(&job).await))
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::WrongJobKind { .. } => StatusCode::BAD_REQUEST,
        };

        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryRouter;
    use crate::orchestrator::{InProcessDispatcher, Orchestrator};
    use crate::testutils::{MemoryStore, RecordingMailer, file_request, test_config};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(store: &Arc<MemoryStore>, mailer: &Arc<RecordingMailer>) -> Router {
        let config = Arc::new(test_config());
        let delivery = Arc::new(DeliveryRouter::new(
            config.delivery.clone(),
            store.clone(),
            mailer.clone(),
        ));
        let worker = Arc::new(Worker::new(store.clone(), delivery.clone(), &config.extraction));
        let orchestrator = Orchestrator::new(
            Arc::new(InProcessDispatcher::new(worker.clone())),
            delivery.clone(),
        );
        let pipeline = Arc::new(Pipeline::new(config, store.clone(), delivery, orchestrator));

        router(AppState { pipeline, worker })
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Waits for the background pipeline to send `count` emails.
    async fn wait_for_mail(mailer: &RecordingMailer, count: usize) {
        for _ in 0..200 {
            if mailer.sent().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} emails, got {}", mailer.sent().len());
    }

    #[tokio::test]
    async fn test_submit_file_request() {
        let store = Arc::new(MemoryStore::default());
        store.put(
            "company.messagelogs",
            "fileList.txt",
            b"logs-2024-01-15-acme.csv.gz\n",
        );
        store.put("archive", "logs-2024-01-15-acme.csv.gz", b"january");
        let mailer = Arc::new(RecordingMailer::default());

        let response = app(&store, &mailer)
            .oneshot(post_json(
                "/submit",
                r#"{"company": "acme", "shortcode": "12345", "email": "ops@example.com"}"#.into(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );
        assert_eq!(
            body_string(response).await,
            "Files for acme 12345 are being retrieved"
        );

        // File list plus one attachment
        wait_for_mail(&mailer, 2).await;
    }

    #[tokio::test]
    async fn test_submit_record_request_acknowledges() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(RecordingMailer::default());

        let response = app(&store, &mailer)
            .oneshot(post_json(
                "/submit",
                r#"{"primaryId": "5551234567", "messageType": "SMS", "email": "ops@example.com"}"#
                    .into(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            "Messages for 5551234567 SMS are being retrieved"
        );

        // No manifest in the store: the requester hears that nothing was found
        wait_for_mail(&mailer, 1).await;
    }

    #[tokio::test]
    async fn test_submit_rejected() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(RecordingMailer::default());

        let response = app(&store, &mailer)
            .oneshot(post_json("/submit", r#"{"email": "ops@example.com"}"#.into()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            body_string(response).await,
            "The proper information was not supplied"
        );
    }

    #[tokio::test]
    async fn test_submit_unreadable_body_keeps_cors_headers() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(RecordingMailer::default());

        for body in ["not json", "42", r#"{"company": "acme""#] {
            let response = app(&store, &mailer)
                .oneshot(post_json("/submit", body.into()))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_GATEWAY, "{body}");
            assert_eq!(
                response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
                "*"
            );
            assert_eq!(
                body_string(response).await,
                "The proper information was not supplied"
            );
        }
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_honeypot_is_discarded() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(RecordingMailer::default());

        let response = app(&store, &mailer)
            .oneshot(post_json(
                "/submit",
                r#"{"company": "acme", "email": "ops@example.com", "honeypot": "gotcha"}"#.into(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(body_string(response).await.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_file_job_endpoint() {
        let store = Arc::new(MemoryStore::default());
        store.put("archive", "a.csv.gz", b"data");
        let mailer = Arc::new(RecordingMailer::default());

        let job = RetrievalJob::file(Arc::new(file_request("acme")), "archive", "a.csv.gz");
        let response = app(&store, &mailer)
            .oneshot(post_json("/jobs/file", serde_json::to_string(&job).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let outcome: JobOutcome = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Attached {
                key: "a.csv.gz".into(),
                bytes: 4
            }
        );
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_job_endpoint_rejects_wrong_kind() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(RecordingMailer::default());

        let job = RetrievalJob::file(Arc::new(file_request("acme")), "archive", "a.csv.gz");
        let response = app(&store, &mailer)
            .oneshot(post_json("/jobs/record", serde_json::to_string(&job).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("only accepts record jobs"));
        assert!(mailer.sent().is_empty());
    }
}
