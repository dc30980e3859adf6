use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

use crate::{
    batch::{BatchController, BatchState},
    config::AppConfig,
    encoding::ReferenceImage,
    error::{ApiError, GenerationError},
    extract::{ApiJson, ApiPath, OptionalJson},
    generator::Generator,
    poller::PollerConfig,
    sink::{Delivery, MemorySink},
    tools::{Strategy, ToolInput, ToolKind},
    video::{CredentialState, CredentialStatus, VideoController, VideoInput, VideoJob},
};

#[derive(Clone)]
pub struct AppState {
    pub tools: Arc<HashMap<ToolKind, BatchController>>,
    pub videos: Arc<VideoController>,
    pub credentials: Arc<CredentialState>,
    pub generator: Arc<dyn Generator>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(generator: Arc<dyn Generator>, config: AppConfig) -> Self {
        let tools = ToolKind::ALL
            .into_iter()
            .map(|tool| {
                let controller =
                    BatchController::new(tool, generator.clone(), config.batch_size, config.request_timeout);
                (tool, controller)
            })
            .collect();
        let credentials = Arc::new(CredentialState::default());
        let videos = VideoController::new(generator.clone(), PollerConfig::from(&config), credentials.clone());
        Self {
            tools: Arc::new(tools),
            videos: Arc::new(videos),
            credentials,
            generator,
            config: Arc::new(config),
        }
    }

    fn tool(&self, tool: ToolKind) -> Result<&BatchController, ApiError> {
        self.tools.get(&tool).ok_or_else(|| ApiError::NotFound(format!("unknown tool {}", tool.slug())))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/tools", get(list_tools))
        .route("/api/tools/:tool/batch", get(get_batch).post(start_batch).delete(reset_batch))
        .route("/api/tools/:tool/batch/slots/:index", post(regenerate_slot))
        .route("/api/tools/:tool/batch/slots/:index/copy", post(copy_slot))
        .route("/api/tools/:tool/batch/slots/:index/download", get(download_slot))
        .route("/api/tools/:tool/export", get(export_text))
        .route("/api/tools/:tool/export/pdf", get(export_pdf))
        .route("/api/video", post(submit_video).get(list_videos))
        .route("/api/video/:id", get(get_video).delete(cancel_video))
        .route("/api/video/:id/download", get(download_video))
        .route("/api/analyze", post(analyze_image))
        .route("/api/credentials", get(get_credentials).put(put_credentials))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ToolSummary {
    pub slug: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub strategy: Strategy,
    pub batch_size: usize,
}

pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolSummary>> {
    let tools = ToolKind::ALL
        .into_iter()
        .map(|tool| ToolSummary {
            slug: tool.slug(),
            title: tool.title(),
            description: tool.description(),
            strategy: tool.strategy(),
            batch_size: state.config.batch_size,
        })
        .collect();
    Json(tools)
}

pub async fn get_batch(
    ApiPath(tool): ApiPath<ToolKind>,
    State(state): State<AppState>,
) -> Result<Json<BatchState>, ApiError> {
    Ok(Json(state.tool(tool)?.snapshot()))
}

pub async fn start_batch(
    ApiPath(tool): ApiPath<ToolKind>,
    State(state): State<AppState>,
    ApiJson(input): ApiJson<ToolInput>,
) -> Result<(StatusCode, Json<BatchState>), ApiError> {
    let controller = state.tool(tool)?;
    controller.start_batch(&input)?;
    Ok((StatusCode::ACCEPTED, Json(controller.snapshot())))
}

pub async fn reset_batch(
    ApiPath(tool): ApiPath<ToolKind>,
    State(state): State<AppState>,
) -> Result<Json<BatchState>, ApiError> {
    let controller = state.tool(tool)?;
    controller.reset();
    Ok(Json(controller.snapshot()))
}

/// The body is optional: without one the batch's own parameters are reused.
pub async fn regenerate_slot(
    ApiPath((tool, index)): ApiPath<(ToolKind, usize)>,
    State(state): State<AppState>,
    OptionalJson(input): OptionalJson<ToolInput>,
) -> Result<(StatusCode, Json<BatchState>), ApiError> {
    let controller = state.tool(tool)?;
    controller.regenerate_slot(index, input.as_ref())?;
    Ok((StatusCode::ACCEPTED, Json(controller.snapshot())))
}

pub async fn copy_slot(
    ApiPath((tool, index)): ApiPath<(ToolKind, usize)>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let sink = MemorySink::default();
    state.tool(tool)?.copy_slot(index, &sink)?;
    deliver(sink.take())
}

pub async fn download_slot(
    ApiPath((tool, index)): ApiPath<(ToolKind, usize)>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let sink = MemorySink::default();
    state.tool(tool)?.download_slot(index, &sink)?;
    deliver(sink.take())
}

pub async fn export_text(
    ApiPath(tool): ApiPath<ToolKind>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let sink = MemorySink::default();
    state.tool(tool)?.export_text(&sink)?;
    deliver(sink.take())
}

pub async fn export_pdf(ApiPath(tool): ApiPath<ToolKind>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let sink = MemorySink::default();
    state.tool(tool)?.export_pdf(&sink)?;
    deliver(sink.take())
}

fn deliver(delivery: Option<Delivery>) -> Result<Response, ApiError> {
    let response = match delivery.ok_or_else(|| ApiError::Export("nothing was delivered".into()))? {
        Delivery::Text { name, content } => attachment(&name, "text/plain; charset=utf-8", content.into_bytes()),
        Delivery::Bytes { name, media_type, bytes } => attachment(&name, &media_type, bytes),
        Delivery::Clipboard(text) => Json(json!({ "text": text })).into_response(),
    };
    Ok(response)
}

fn attachment(name: &str, media_type: &str, body: Vec<u8>) -> Response {
    let headers = [
        (header::CONTENT_TYPE, media_type.to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
    ];
    (StatusCode::OK, headers, body).into_response()
}

pub async fn submit_video(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<VideoInput>,
) -> Result<(StatusCode, Json<VideoJob>), ApiError> {
    let (job, _task) = state.videos.submit(&input).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn list_videos(State(state): State<AppState>) -> Json<Vec<VideoJob>> {
    Json(state.videos.list())
}

pub async fn get_video(ApiPath(id): ApiPath<Uuid>, State(state): State<AppState>) -> Result<Json<VideoJob>, ApiError> {
    state.videos.get(id).map(Json).ok_or_else(|| ApiError::NotFound(format!("video job {id} not found")))
}

pub async fn cancel_video(
    ApiPath(id): ApiPath<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<VideoJob>, ApiError> {
    Ok(Json(state.videos.cancel(id)?))
}

pub async fn download_video(ApiPath(id): ApiPath<Uuid>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let video = state.videos.video(id)?;
    Ok(attachment(&format!("video-{id}.mp4"), &video.media_type, video.data.to_vec()))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    #[serde(default)]
    pub image: Option<ReferenceImage>,
}

pub async fn analyze_image(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<AnalyzeBody>,
) -> Result<Json<Value>, ApiError> {
    let image = body.image.ok_or_else(|| GenerationError::Validation("image".into()))?.encode()?;
    tracing::info!("🔍 Analyzing {} image", image.media_type);
    let timeout = state.config.request_timeout;
    let analysis = tokio::time::timeout(timeout, state.generator.analyze_image(&image))
        .await
        .map_err(|_| GenerationError::Timeout(timeout))??;
    Ok(Json(json!({ "analysis": analysis })))
}

pub async fn get_credentials(State(state): State<AppState>) -> Json<CredentialStatus> {
    Json(state.credentials.status())
}

#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    pub api_key: String,
}

pub async fn put_credentials(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CredentialsBody>,
) -> Result<Json<CredentialStatus>, ApiError> {
    state.credentials.reselect(state.generator.as_ref(), body.api_key)?;
    Ok(Json(state.credentials.status()))
}
