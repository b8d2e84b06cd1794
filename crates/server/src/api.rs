//! REST surface for the change request workflow.
//!
//! Resource routes are scoped under `/projects/{project_id}`; lifecycle
//! transitions hang off `/change-requests/{id}`. The acting principal arrives
//! as `X-Actor-Id` / `X-Actor-Name` / `X-Actor-Role` headers set by the
//! upstream identity layer; this service treats them as trusted input.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use changeflow_core::domain::change_request::{
    Category, ChangeRequest, ChangeRequestId, ChangeRequestStatus, Priority, ProjectId,
};
use changeflow_core::domain::comment::Comment;
use changeflow_core::domain::impact::Impact;
use changeflow_core::domain::principal::{Principal, Role};
use changeflow_core::errors::DomainError;
use changeflow_core::workflow::{DraftPatch, NewChangeRequest, NewImpact};
use changeflow_db::repositories::RequestFilter;
use changeflow_engine::{ChangeRequestDetail, ChangeRequestStats, EngineError, WorkflowEngine};

#[derive(Clone)]
pub struct ApiState {
    engine: Arc<WorkflowEngine>,
}

pub fn router(engine: Arc<WorkflowEngine>) -> Router {
    Router::new()
        .route(
            "/projects/{project_id}/change-requests",
            get(list_requests).post(create_request),
        )
        .route("/projects/{project_id}/change-requests/stats", get(project_stats))
        .route(
            "/projects/{project_id}/change-requests/{id}",
            get(get_request).patch(patch_request).delete(delete_request),
        )
        .route("/change-requests/{id}/submit", post(submit_request))
        .route("/change-requests/{id}/approve", post(approve_request))
        .route("/change-requests/{id}/reject", post(reject_request))
        .route("/change-requests/{id}/implement", post(implement_request))
        .route("/change-requests/{id}/comments", get(list_comments).post(add_comment))
        .route("/change-requests/{id}/impacts", post(add_impact))
        .with_state(ApiState { engine })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message.clone()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Engine(engine_error) => match engine_error {
                EngineError::Domain(DomainError::Validation { .. }) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, engine_error.to_string())
                }
                EngineError::Domain(DomainError::InvalidTransition { .. })
                | EngineError::AlreadyDecided { .. } => {
                    (StatusCode::CONFLICT, engine_error.to_string())
                }
                EngineError::Domain(DomainError::Forbidden { .. }) => {
                    (StatusCode::FORBIDDEN, engine_error.to_string())
                }
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, engine_error.to_string()),
                EngineError::Storage(storage_error) => {
                    error!(
                        event_name = "api.storage_error",
                        error = %storage_error,
                        "storage failure while handling request"
                    );
                    (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable".to_string())
                }
            },
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

fn principal(headers: &HeaderMap) -> Result<Principal, ApiError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let id = header("x-actor-id")
        .ok_or_else(|| ApiError::Unauthorized("missing X-Actor-Id header".to_string()))?;
    let name = header("x-actor-name")
        .ok_or_else(|| ApiError::Unauthorized("missing X-Actor-Name header".to_string()))?;
    let role_raw = header("x-actor-role")
        .ok_or_else(|| ApiError::Unauthorized("missing X-Actor-Role header".to_string()))?;
    let role = Role::parse(role_raw)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown actor role `{role_raw}`")))?;

    Ok(Principal::new(id, name, role))
}

// ---------------------------------------------------------------------------
// Request / query types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListQuery {
    fn into_filter(self) -> Result<RequestFilter, ApiError> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let status = match non_empty(self.status) {
            None => None,
            Some(raw) => Some(
                ChangeRequestStatus::parse(&raw)
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown status `{raw}`")))?,
            ),
        };
        let category = match non_empty(self.category) {
            None => None,
            Some(raw) => Some(
                Category::parse(&raw)
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown category `{raw}`")))?,
            ),
        };
        let priority = match non_empty(self.priority) {
            None => None,
            Some(raw) => Some(
                Priority::parse(&raw)
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown priority `{raw}`")))?,
            ),
        };

        Ok(RequestFilter {
            status,
            category,
            priority,
            search: non_empty(self.search),
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionBody {
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    pub content: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_requests(
    Path(project_id): Path<String>,
    Query(query): Query<ListQuery>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<ChangeRequest>>, ApiError> {
    let filter = query.into_filter()?;
    let requests = state.engine.list(&ProjectId(project_id), &filter).await?;
    Ok(Json(requests))
}

async fn create_request(
    Path(project_id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NewChangeRequest>,
) -> Result<(StatusCode, Json<ChangeRequest>), ApiError> {
    let actor = principal(&headers)?;
    let created = state.engine.create_request(ProjectId(project_id), body, &actor).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn project_stats(
    Path(project_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<ChangeRequestStats>, ApiError> {
    let stats = state.engine.stats(&ProjectId(project_id)).await?;
    Ok(Json(stats))
}

async fn get_request(
    Path((project_id, id)): Path<(String, String)>,
    State(state): State<ApiState>,
) -> Result<Json<ChangeRequestDetail>, ApiError> {
    let detail = scoped_detail(&state, &project_id, ChangeRequestId(id)).await?;
    Ok(Json(detail))
}

async fn patch_request(
    Path((project_id, id)): Path<(String, String)>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(patch): Json<DraftPatch>,
) -> Result<Json<ChangeRequest>, ApiError> {
    let actor = principal(&headers)?;
    let id = ChangeRequestId(id);
    scoped_detail(&state, &project_id, id.clone()).await?;
    let updated = state.engine.update_draft(&id, patch, &actor).await?;
    Ok(Json(updated))
}

async fn delete_request(
    Path((project_id, id)): Path<(String, String)>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let actor = principal(&headers)?;
    let id = ChangeRequestId(id);
    scoped_detail(&state, &project_id, id.clone()).await?;
    state.engine.delete(&id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_request(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<ChangeRequest>, ApiError> {
    let actor = principal(&headers)?;
    let submitted = state.engine.submit(&ChangeRequestId(id), &actor).await?;
    Ok(Json(submitted))
}

async fn approve_request(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Option<Json<DecisionBody>>,
) -> Result<Json<ChangeRequest>, ApiError> {
    let actor = principal(&headers)?;
    let comments = body.and_then(|Json(decision)| decision.comments);
    let approved = state.engine.approve(&ChangeRequestId(id), &actor, comments).await?;
    Ok(Json(approved))
}

async fn reject_request(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Option<Json<DecisionBody>>,
) -> Result<Json<ChangeRequest>, ApiError> {
    let actor = principal(&headers)?;
    let comments = body.and_then(|Json(decision)| decision.comments);
    let rejected = state.engine.reject(&ChangeRequestId(id), &actor, comments).await?;
    Ok(Json(rejected))
}

async fn implement_request(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<ChangeRequest>, ApiError> {
    let actor = principal(&headers)?;
    let implemented = state.engine.implement(&ChangeRequestId(id), &actor).await?;
    Ok(Json(implemented))
}

async fn add_comment(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CommentBody>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let actor = principal(&headers)?;
    let comment = state.engine.add_comment(&ChangeRequestId(id), &actor, body.content).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn list_comments(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    let comments = state.engine.list_comments(&ChangeRequestId(id)).await?;
    Ok(Json(comments))
}

async fn add_impact(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NewImpact>,
) -> Result<(StatusCode, Json<Impact>), ApiError> {
    let actor = principal(&headers)?;
    let impact = state.engine.add_impact(&ChangeRequestId(id), &actor, body).await?;
    Ok((StatusCode::CREATED, Json(impact)))
}

/// Resolve a request and confirm it belongs to the project in the path;
/// requests from other projects read as not found.
async fn scoped_detail(
    state: &ApiState,
    project_id: &str,
    id: ChangeRequestId,
) -> Result<ChangeRequestDetail, ApiError> {
    let detail = state.engine.get(&id).await?;
    if detail.request.project_id.0 != project_id {
        return Err(EngineError::NotFound(id).into());
    }
    Ok(detail)
}
