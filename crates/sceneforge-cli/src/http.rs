//! HTTP surface: task submission, task event stream, manual fixes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::stream;
use sceneforge_core::app::{App, Heartbeat, StreamGateway};
use sceneforge_core::domain::{JobId, TaskId, TaskSnapshot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    app: Arc<App>,
    gateway: StreamGateway,
    heartbeat: Option<watch::Receiver<Heartbeat>>,
}

impl AppState {
    pub fn new(app: Arc<App>, gateway: StreamGateway, heartbeat: Option<watch::Receiver<Heartbeat>>) -> Self {
        Self {
            app,
            gateway,
            heartbeat,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", post(create_task))
        .route("/tasks/{task_id}", get(get_task))
        .route("/tasks/{task_id}/stream", get(stream_task))
        .route("/tasks/{task_id}/cancel", post(cancel_task))
        .route("/build-jobs/{job_id}/fix", post(fix_build_job))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    #[serde(default)]
    task_id: Option<String>,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct CreateTaskResponse {
    task_id: TaskId,
}

#[derive(Debug, Default, Deserialize)]
struct CancelRequest {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FixRequest {
    #[serde(default)]
    source: Option<String>,
}

/// Optional JSON body: empty means `T::default()`.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}

async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".into()));
    }
    let snapshot = state
        .app
        .submit_task(request.task_id.map(TaskId::new), &request.prompt)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            task_id: snapshot.task_id,
        }),
    ))
}

async fn known_task(state: &AppState, raw: String) -> Result<TaskSnapshot, ApiError> {
    let task_id = TaskId::new(raw);
    if !task_id.is_valid() {
        return Err(ApiError::BadRequest(format!("invalid task id: {task_id:?}")));
    }
    let snapshot = state.app.tasks().get_task_status(&task_id).await?;
    if snapshot.is_unknown() {
        return Err(ApiError::NotFound(format!("task not found: {task_id}")));
    }
    Ok(snapshot)
}

async fn get_task(State(state): State<AppState>, Path(task_id): Path<String>) -> Result<Json<TaskSnapshot>, ApiError> {
    known_task(&state, task_id).await.map(Json)
}

async fn stream_task(State(state): State<AppState>, Path(task_id): Path<String>) -> Result<Response, ApiError> {
    let session = state.gateway.open(&TaskId::new(task_id)).await?;

    let events = stream::unfold(session, |mut session| async move {
        let event = session.next_event().await?;
        let frame = match event.data() {
            Ok(data) => Event::default()
                .id(event.id.to_string())
                .event(event.event_name())
                .data(data),
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "stream event could not be encoded");
                Event::default().comment("unencodable event skipped")
            }
        };
        Some((Ok::<_, Infallible>(frame), session))
    });

    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform")),
        (header::CONNECTION, HeaderValue::from_static("keep-alive")),
        (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
    ];
    Ok((headers, Sse::new(events).keep_alive(KeepAlive::default())).into_response())
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let CancelRequest { reason } = optional_body(&body)?;
    let snapshot = known_task(&state, task_id).await?;
    let delivery = state.app.request_cancel(&snapshot.task_id, reason)?;
    info!(task_id = %snapshot.task_id, routed = delivery.is_routed(), "cancel requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "task_id": snapshot.task_id, "routed": delivery.is_routed() })),
    ))
}

async fn fix_build_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job_id: JobId = job_id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    let FixRequest { source } = optional_body(&body)?;
    let job = state.app.fix_build_job(job_id, source).await?;
    Ok(Json(json!({
        "job_id": job.id,
        "status": job.status,
        "retry_count": job.retry_count,
    })))
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let heartbeat = state
        .heartbeat
        .as_ref()
        .map(|rx| rx.borrow().clone())
        .unwrap_or_default();
    let age_ms = heartbeat.age(Utc::now()).map(|age| age.num_milliseconds());
    Json(json!({
        "status": "ok",
        "heartbeat": heartbeat,
        "heartbeat_age_ms": age_ms,
        "open_streams": state.gateway.open_sessions(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use sceneforge_core::app::{AppBuilder, GatewayConfig, ProcessorConfig, RetryPolicy};
    use sceneforge_core::domain::{BuildJobStatus, ComponentBuildJob};
    use tower::ServiceExt;

    fn state() -> AppState {
        let app = Arc::new(AppBuilder::new().retry_policy(RetryPolicy::immediate(3)).build().unwrap());
        let gateway = app.gateway(GatewayConfig {
            status_poll_interval: Duration::from_millis(20),
        });
        AppState::new(app, gateway, None)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_then_get_task() {
        let state = state();
        let response = router(state.clone())
            .oneshot(post_json("/tasks", json!({ "task_id": "T1", "prompt": "a red ball" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["task_id"], "T1");

        let response = router(state)
            .oneshot(Request::get("/tasks/T1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["state"], "submitted");
    }

    #[tokio::test]
    async fn duplicate_task_id_conflicts() {
        let state = state();
        let request = || post_json("/tasks", json!({ "task_id": "T1", "prompt": "p" }));
        router(state.clone()).oneshot(request()).await.unwrap();
        let response = router(state).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_task_stream_is_404_with_error_body() {
        let response = router(state())
            .oneshot(Request::get("/tasks/nope/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn blank_task_id_stream_is_400() {
        let response = router(state())
            .oneshot(Request::get("/tasks/%20/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_sends_sse_frames_and_ends_with_the_task() {
        let state = state();
        let task_id = TaskId::new("T1");
        state.app.submit_task(Some(task_id.clone()), "p").await.unwrap();
        state.app.tasks().cancel_task(&task_id, "stop").await.unwrap();

        let response = router(state)
            .oneshot(Request::get("/tasks/T1/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
        assert_eq!(headers["x-accel-buffering"], "no");

        let bytes = tokio::time::timeout(
            Duration::from_secs(2),
            axum::body::to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .expect("stream ended")
        .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: task_status_update\n"), "{text}");
        assert!(text.contains("\"state\":\"canceled\""), "{text}");
        assert!(text.contains("id: "), "{text}");
    }

    #[tokio::test]
    async fn fix_requires_a_failed_job() {
        let state = state();
        let job = ComponentBuildJob::new("p", "Foo", "src");
        state.app.context().build_jobs.insert(job.clone()).await.unwrap();

        let response = router(state.clone())
            .oneshot(Request::post(format!("/build-jobs/{}/fix", job.id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let mut failed = ComponentBuildJob::new("p", "Bar", "src");
        failed.start_building().unwrap();
        failed.fail("boom").unwrap();
        state.app.context().build_jobs.insert(failed.clone()).await.unwrap();

        let response = router(state)
            .oneshot(post_json(
                &format!("/build-jobs/{}/fix", failed.id),
                json!({ "source": "export default function Bar() {}" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!(BuildJobStatus::Building));
        assert_eq!(body["retry_count"], 1);
    }

    #[tokio::test]
    async fn malformed_job_id_is_400() {
        let response = router(state())
            .oneshot(Request::post("/build-jobs/not-a-job/fix").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancel_routes_to_the_coordinator() {
        let state = state();
        let processor = state.app.init(ProcessorConfig::immediate());
        state.app.submit_task(Some(TaskId::new("T1")), "p").await.unwrap();

        let response = router(state.clone())
            .oneshot(post_json("/tasks/T1/cancel", json!({ "reason": "no longer needed" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["routed"], true);

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snap = state.app.tasks().get_task_status(&TaskId::new("T1")).await.unwrap();
                if snap.state == sceneforge_core::domain::TaskState::Canceled {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task canceled");
        processor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn healthz_reports_heartbeat() {
        let app = Arc::new(AppBuilder::new().build().unwrap());
        let processor = app.init(ProcessorConfig::immediate());
        let gateway = app.gateway(GatewayConfig::default());
        let mut hb = processor.heartbeat();
        hb.changed().await.unwrap();
        let state = AppState::new(app, gateway, Some(processor.heartbeat()));

        let response = router(state)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["heartbeat"]["beats"].as_u64().unwrap() >= 1);
        processor.shutdown().await.unwrap();
    }
}
