//! Crawler task REST endpoints under `/api/v1/crawler`.

use axum::extract::{Extension, Path, Query};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use task_orchestrator::{
    ErrorEntry, JobFilter, JobId, JobRecord, JobSpec, JobStatus, LogEntry, MAX_PAGE_SIZE,
};
use tracing::info;

use crate::common::{ApiResponse, PaginatedResponse, Platform};
use crate::kernel::SimulatedCrawl;
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;

type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCrawlerRequest {
    pub platform: String,
    #[serde(rename = "type")]
    pub crawler_type: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCrawlerResponse {
    pub task_id: JobId,
    pub platform: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub progress: u8,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: JobId,
    pub platform: String,
    #[serde(rename = "type")]
    pub crawler_type: String,
    pub status: JobStatus,
    pub config: Value,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub items_collected: u64,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for TaskResponse {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            platform: record.platform.clone(),
            crawler_type: record.crawler_type.clone(),
            status: record.status,
            config: record.config.clone(),
            start_time: record.started_at,
            end_time: record.ended_at,
            items_collected: record.items_collected,
            progress: record.progress,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: TaskResponse,
    /// Whole seconds between start and end, once the task has ended
    pub duration: Option<i64>,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<ErrorEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_id: JobId,
    pub progress: u8,
    pub status: JobStatus,
    pub items_collected: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub status: Option<String>,
    pub platform: Option<String>,
}

impl TaskListQuery {
    fn into_filter(self) -> Result<JobFilter, ApiError> {
        let defaults = JobFilter::default();

        let page = self.page.unwrap_or(defaults.page);
        if page == 0 {
            return Err(ApiError::bad_request("page must be at least 1"));
        }

        let page_size = self.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ApiError::bad_request(format!(
                "pageSize must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let status = self
            .status
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<JobStatus>().map_err(ApiError::BadRequest))
            .transpose()?;

        Ok(JobFilter {
            status,
            platform: self.platform.filter(|p| !p.is_empty()),
            page,
            page_size,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListItem {
    pub id: JobId,
    pub platform: String,
    #[serde(rename = "type")]
    pub crawler_type: String,
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub progress: u8,
    pub items_collected: u64,
    pub config: Value,
}

impl From<JobRecord> for TaskListItem {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            platform: record.platform,
            crawler_type: record.crawler_type,
            status: record.status,
            start_time: record.started_at,
            progress: record.progress,
            items_collected: record.items_collected,
            config: record.config,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub id: Platform,
    pub name: String,
    pub features: Vec<String>,
}

/// Parse a task id from a path segment. Malformed ids are reported as unknown.
pub(crate) fn parse_task_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse().map_err(|_| ApiError::UnknownTask)
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /api/v1/crawler/platforms
pub async fn list_platforms_handler() -> ApiResponse<Vec<PlatformInfo>> {
    ApiResponse::ok(
        Platform::ALL
            .into_iter()
            .map(|p| PlatformInfo {
                id: p,
                name: p.display_name().to_string(),
                features: p.features().iter().map(|f| f.to_string()).collect(),
            })
            .collect(),
    )
}

/// POST /api/v1/crawler/start
pub async fn start_crawler_handler(
    Extension(state): Extension<AxumAppState>,
    axum::Json(request): axum::Json<StartCrawlerRequest>,
) -> ApiResult<StartCrawlerResponse> {
    let platform: Platform = request
        .platform
        .parse()
        .map_err(|e: crate::common::UnknownPlatform| ApiError::bad_request(e.to_string()))?;
    if request.crawler_type.trim().is_empty() {
        return Err(ApiError::bad_request("type must not be empty"));
    }

    let keyword = request
        .config
        .get("keyword")
        .and_then(Value::as_str)
        .map(String::from);
    let work = SimulatedCrawl::new(platform, state.crawl_step_delay).with_keyword(keyword);
    let spec = JobSpec::new(platform.as_str(), &request.crawler_type, work)
        .with_config(request.config);

    let task_id = state.orchestrator.submit(spec).await?;
    let record = state.orchestrator.get(task_id).await?;
    info!(task_id = %task_id, platform = %platform, "crawler task started");

    Ok(ApiResponse::ok(StartCrawlerResponse {
        task_id,
        platform: record.platform,
        status: record.status,
        start_time: record.created_at,
        progress: record.progress,
    }))
}

/// POST /api/v1/crawler/pause/:task_id
pub async fn pause_task_handler(
    Extension(state): Extension<AxumAppState>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskResponse> {
    let record = state.orchestrator.pause(parse_task_id(&task_id)?).await?;
    Ok(ApiResponse::ok(TaskResponse::from(&record)))
}

/// POST /api/v1/crawler/resume/:task_id
pub async fn resume_task_handler(
    Extension(state): Extension<AxumAppState>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskResponse> {
    let record = state.orchestrator.resume(parse_task_id(&task_id)?).await?;
    Ok(ApiResponse::ok(TaskResponse::from(&record)))
}

/// POST /api/v1/crawler/cancel/:task_id
///
/// Cancellation takes effect once the current increment finishes, so the
/// returned record may still show the task as running.
pub async fn cancel_task_handler(
    Extension(state): Extension<AxumAppState>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskResponse> {
    let task_id = parse_task_id(&task_id)?;
    state.orchestrator.cancel(task_id).await?;
    let record = state.orchestrator.get(task_id).await?;
    Ok(ApiResponse::ok(TaskResponse::from(&record)).with_message("Cancellation requested"))
}

/// GET /api/v1/crawler/tasks
pub async fn list_tasks_handler(
    Extension(state): Extension<AxumAppState>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<PaginatedResponse<TaskListItem>> {
    let filter = query.into_filter()?;
    let page = state.orchestrator.list(&filter).await?;

    Ok(ApiResponse::ok(PaginatedResponse {
        items: page.items.into_iter().map(TaskListItem::from).collect(),
        total: page.total,
        page: page.page,
        page_size: page.page_size,
        total_pages: page.total_pages,
    }))
}

/// GET /api/v1/crawler/task/:task_id
pub async fn task_detail_handler(
    Extension(state): Extension<AxumAppState>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskDetail> {
    let record = state.orchestrator.get(parse_task_id(&task_id)?).await?;

    Ok(ApiResponse::ok(TaskDetail {
        task: TaskResponse::from(&record),
        duration: record.duration_secs(),
        logs: record.logs.into_iter().collect(),
        errors: record.errors,
    }))
}

/// GET /api/v1/crawler/progress/:task_id
pub async fn task_progress_handler(
    Extension(state): Extension<AxumAppState>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskProgress> {
    let record = state.orchestrator.get(parse_task_id(&task_id)?).await?;

    Ok(ApiResponse::ok(TaskProgress {
        task_id: record.id,
        progress: record.progress,
        status: record.status,
        items_collected: record.items_collected,
    }))
}

/// DELETE /api/v1/crawler/task/:task_id
pub async fn delete_task_handler(
    Extension(state): Extension<AxumAppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Value> {
    let task_id = parse_task_id(&task_id)?;
    state.orchestrator.remove(task_id).await?;
    info!(task_id = %task_id, "task deleted");

    Ok(ApiResponse::ok(serde_json::json!({ "taskId": task_id })).with_message("Task deleted successfully"))
}
