#![forbid(unsafe_code)]

use std::{env, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use coursegate_adapter::{
    AdapterError, AdapterHealthResponse, AdapterRuntime, CourseGateResponse, LessonRowsRequest,
    LessonRowsResponse, ProgressTouchRequest,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: String,
    reason: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let bind = env::var("COURSEGATE_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let addr: SocketAddr = bind.parse()?;
    let runtime = Arc::new(AdapterRuntime::default_from_env()?);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/courses/:course_id/gate", get(course_gate))
        .route("/v1/courses/:course_id/orders", post(place_order))
        .route("/v1/courses/:course_id/lessons/rows", post(lesson_rows))
        .route("/v1/enrollments/refresh", post(refresh_enrollments))
        .route("/v1/progress/touch", post(touch_progress))
        .with_state(runtime);

    info!(%addr, "coursegate_adapter_http listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn error_response(err: AdapterError) -> Response {
    let code = match &err {
        AdapterError::InvalidCourseId(_) => StatusCode::BAD_REQUEST,
        AdapterError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AdapterError::Backend(_) | AdapterError::Refresh(_) => err
            .upstream_status()
            .filter(|code| (400..500).contains(code))
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::BAD_GATEWAY),
    };
    warn!(error = %err, status = code.as_u16(), "request failed");
    (
        code,
        Json(ErrorResponse {
            status: "error".to_string(),
            reason: err.user_message(),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(result: Result<T, AdapterError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn healthz(State(runtime): State<Arc<AdapterRuntime>>) -> Json<AdapterHealthResponse> {
    Json(runtime.health_report())
}

async fn course_gate(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(course_id): Path<String>,
) -> Json<CourseGateResponse> {
    Json(runtime.course_gate(&course_id).await)
}

async fn place_order(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(course_id): Path<String>,
) -> Response {
    respond(runtime.place_order(&course_id).await)
}

async fn lesson_rows(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(course_id): Path<String>,
    Json(request): Json<LessonRowsRequest>,
) -> Json<LessonRowsResponse> {
    Json(runtime.lesson_rows(&course_id, &request))
}

async fn refresh_enrollments(State(runtime): State<Arc<AdapterRuntime>>) -> Response {
    respond(runtime.refresh_enrollments().await)
}

async fn touch_progress(
    State(runtime): State<Arc<AdapterRuntime>>,
    Json(request): Json<ProgressTouchRequest>,
) -> StatusCode {
    runtime.touch_progress(&request);
    StatusCode::ACCEPTED
}
