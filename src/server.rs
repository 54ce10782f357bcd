//! HTTP server exposing the generation, status, verification, and batch
//! endpoints.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::OrchestratorError,
    llm::HttpLlmClient,
    model::{
        BatchPostRequest, PostGenerationRequest, PostVerificationRequest, Task, TaskStatus,
        VerificationReport,
    },
    orchestrator::Orchestrator,
    search::HttpSearchClient,
    settings::Settings,
    store::TaskStore,
};

/// Minutes of estimated wall-clock per post, used for the completion
/// estimate in accept responses.
const ESTIMATED_MINUTES_PER_POST: i64 = 3;

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub settings: Settings,
    pub start_time: std::time::Instant,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    timestamp: DateTime<Utc>,
    services: HashMap<&'static str, &'static str>,
}

#[derive(Serialize)]
struct PostGenerationResponse {
    task_id: String,
    status: TaskStatus,
    message: String,
    estimated_completion_time: DateTime<Utc>,
}

#[derive(Serialize)]
struct BatchPostResponse {
    batch_id: String,
    total_posts: usize,
    task_ids: Vec<String>,
    status: TaskStatus,
    estimated_completion_time: DateTime<Utc>,
}

#[derive(Serialize)]
struct PostVerificationResponse {
    verification_id: String,
    post_content: String,
    verification_report: VerificationReport,
    approved: bool,
    verified_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    timestamp: DateTime<Utc>,
}

/// Error wrapper mapping the taxonomy onto HTTP status codes.
struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::AlreadyExists(_) => StatusCode::CONFLICT,
            OrchestratorError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            OrchestratorError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::RecursionExceeded(_)
            | OrchestratorError::Serialization(_)
            | OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

fn validation(message: impl Into<String>) -> ApiError {
    ApiError(OrchestratorError::Validation(message.into()))
}

const TARGET_AUDIENCES: &[&str] = &["academic", "professional", "general"];
const TONES: &[&str] = &["professional", "casual", "enthusiastic", "academic"];
const VERIFICATION_TYPES: &[&str] = &["technical", "style", "both"];

fn validate_generation_request(request: &PostGenerationRequest) -> Result<(), ApiError> {
    let title = request.paper_title.trim();
    if title.len() < 5 || title.len() > 500 {
        return Err(validation(
            "paper_title must be between 5 and 500 characters",
        ));
    }
    if let Some(context) = &request.additional_context {
        if context.len() > 1000 {
            return Err(validation("additional_context must be at most 1000 characters"));
        }
    }
    if request.max_hashtags < 1 || request.max_hashtags > 20 {
        return Err(validation("max_hashtags must be between 1 and 20"));
    }
    if !TARGET_AUDIENCES.contains(&request.target_audience.as_str()) {
        return Err(validation(format!(
            "target_audience must be one of {:?}",
            TARGET_AUDIENCES
        )));
    }
    if !TONES.contains(&request.tone.as_str()) {
        return Err(validation(format!("tone must be one of {:?}", TONES)));
    }
    Ok(())
}

fn validate_verification_request(request: &PostVerificationRequest) -> Result<(), ApiError> {
    let length = request.post_content.chars().count();
    if !(10..=3000).contains(&length) {
        return Err(validation(
            "post_content must be between 10 and 3000 characters",
        ));
    }
    if let Some(reference) = &request.paper_reference {
        if reference.len() > 1000 {
            return Err(validation("paper_reference must be at most 1000 characters"));
        }
    }
    if !VERIFICATION_TYPES.contains(&request.verification_type.as_str()) {
        return Err(validation(format!(
            "verification_type must be one of {:?}",
            VERIFICATION_TYPES
        )));
    }
    Ok(())
}

fn validate_batch_request(request: &BatchPostRequest) -> Result<(), ApiError> {
    if request.papers.is_empty() || request.papers.len() > 5 {
        return Err(validation("papers must contain between 1 and 5 entries"));
    }
    if !(30..=1440).contains(&request.time_interval_minutes) {
        return Err(validation(
            "time_interval_minutes must be between 30 and 1440",
        ));
    }
    for paper in &request.papers {
        validate_generation_request(paper)?;
    }
    Ok(())
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let body_limit =
        RequestBodyLimitLayer::new(state.settings.server.max_request_size_mb * 1024 * 1024);

    let mut app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/generate-post", post(generate_post))
        .route("/status/:task_id", get(task_status))
        .route("/tasks", get(list_tasks))
        .route("/verify-post", post(verify_post))
        .route("/batch-generate", post(batch_generate))
        .with_state(state.clone())
        .layer(body_limit);

    if state.settings.server.enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app
}

/// Health check endpoint.
#[instrument(skip(state))]
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let services = state.orchestrator.service_health();
    let status = if services
        .values()
        .all(|s| *s == "connected" || *s == "not_available")
    {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: Utc::now(),
        services,
    })
}

/// Accept a post generation request; the workflow runs in the background.
#[instrument(skip(state, request))]
async fn generate_post(
    State(state): State<AppState>,
    Json(request): Json<PostGenerationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_generation_request(&request)?;

    let task_id = state.orchestrator.submit(&request).await?;
    info!("Accepted generation task {}", task_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(PostGenerationResponse {
            task_id,
            status: TaskStatus::Pending,
            message: "LinkedIn post generation started successfully".to_string(),
            estimated_completion_time: Utc::now()
                + ChronoDuration::minutes(ESTIMATED_MINUTES_PER_POST),
        }),
    ))
}

/// Full task snapshot.
#[instrument(skip(state))]
async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    match state.orchestrator.store().get(&task_id).await? {
        Some(task) => Ok(Json(task)),
        None => {
            warn!("Status requested for unknown task {}", task_id);
            Err(ApiError(OrchestratorError::NotFound(task_id)))
        }
    }
}

/// All live tasks.
#[instrument(skip(state))]
async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state.orchestrator.store().list().await?;
    Ok(Json(tasks))
}

/// Synchronous verification of an existing post.
#[instrument(skip(state, request))]
async fn verify_post(
    State(state): State<AppState>,
    Json(request): Json<PostVerificationRequest>,
) -> Result<Json<PostVerificationResponse>, ApiError> {
    validate_verification_request(&request)?;

    let report = state.orchestrator.verify(&request).await?;
    let approved = report.overall_score >= 0.7;

    Ok(Json(PostVerificationResponse {
        verification_id: Uuid::new_v4().to_string(),
        post_content: request.post_content,
        verification_report: report,
        approved,
        verified_at: Utc::now(),
    }))
}

/// Accept a batch of generation requests.
#[instrument(skip(state, request))]
async fn batch_generate(
    State(state): State<AppState>,
    Json(request): Json<BatchPostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_batch_request(&request)?;

    let (batch_id, task_ids) = state.orchestrator.submit_batch(&request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchPostResponse {
            batch_id,
            total_posts: task_ids.len(),
            task_ids,
            status: TaskStatus::Pending,
            estimated_completion_time: Utc::now()
                + ChronoDuration::minutes(
                    ESTIMATED_MINUTES_PER_POST * request.papers.len() as i64,
                ),
        }),
    ))
}

/// Start the HTTP server and wait for a shutdown signal.
pub async fn serve(settings: Settings) -> Result<()> {
    info!("Starting HTTP server on port {}", settings.server.port);

    let store = Arc::new(TaskStore::connect(&settings.store_url, settings.store_ttl()).await);
    let llm = Arc::new(HttpLlmClient::new(&settings)?);
    let search = Arc::new(HttpSearchClient::new(&settings)?);
    let orchestrator = Arc::new(Orchestrator::new(
        settings.clone(),
        store,
        llm,
        search,
    ));

    let state = AppState {
        orchestrator: orchestrator.clone(),
        settings: settings.clone(),
        start_time: std::time::Instant::now(),
    };

    let app = create_router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    info!("HTTP server listening on {}", addr);

    let graceful = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(orchestrator.clone()));

    if let Err(e) = graceful.await {
        error!("HTTP server error: {}", e);
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Wait for SIGTERM/SIGINT, then stop in-flight jobs.
async fn wait_for_shutdown(orchestrator: Arc<Orchestrator>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT (Ctrl+C), shutting down gracefully");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down gracefully");
    }

    orchestrator.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str) -> PostGenerationRequest {
        PostGenerationRequest {
            paper_title: title.to_string(),
            additional_context: None,
            target_audience: "professional".to_string(),
            include_technical_details: true,
            max_hashtags: 10,
            tone: "professional".to_string(),
        }
    }

    #[test]
    fn generation_validation_bounds() {
        assert!(validate_generation_request(&request("Attention Is All You Need")).is_ok());
        assert!(validate_generation_request(&request("hi")).is_err());
        assert!(validate_generation_request(&request(&"x".repeat(501))).is_err());

        let mut bad_hashtags = request("A valid paper title");
        bad_hashtags.max_hashtags = 0;
        assert!(validate_generation_request(&bad_hashtags).is_err());

        let mut bad_tone = request("A valid paper title");
        bad_tone.tone = "sarcastic".to_string();
        assert!(validate_generation_request(&bad_tone).is_err());

        let mut bad_audience = request("A valid paper title");
        bad_audience.target_audience = "everyone".to_string();
        assert!(validate_generation_request(&bad_audience).is_err());
    }

    #[test]
    fn verification_validation_bounds() {
        let ok = PostVerificationRequest {
            post_content: "A post that is long enough".to_string(),
            paper_reference: None,
            verification_type: "both".to_string(),
        };
        assert!(validate_verification_request(&ok).is_ok());

        let short = PostVerificationRequest {
            post_content: "short".to_string(),
            ..ok.clone()
        };
        assert!(validate_verification_request(&short).is_err());

        let bad_type = PostVerificationRequest {
            verification_type: "vibes".to_string(),
            ..ok
        };
        assert!(validate_verification_request(&bad_type).is_err());
    }

    #[test]
    fn batch_validation_bounds() {
        let ok = BatchPostRequest {
            papers: vec![request("A valid paper title")],
            schedule_posts: false,
            time_interval_minutes: 60,
        };
        assert!(validate_batch_request(&ok).is_ok());

        let empty = BatchPostRequest {
            papers: vec![],
            ..ok.clone()
        };
        assert!(validate_batch_request(&empty).is_err());

        let too_many = BatchPostRequest {
            papers: vec![request("A valid paper title"); 6],
            ..ok.clone()
        };
        assert!(validate_batch_request(&too_many).is_err());

        let bad_interval = BatchPostRequest {
            time_interval_minutes: 10,
            ..ok
        };
        assert!(validate_batch_request(&bad_interval).is_err());
    }
}
