use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use uuid::Uuid;

use bx_db::models::Redirector;

use crate::auth::RequestContext;
use crate::dto::{CreateRedirectorRequest, ListQuery, RedirectorResponse};
use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_redirectors(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RedirectorResponse>>, ApiError> {
    let redirectors = Redirector::list(&state.db).await?;
    Ok(Json(
        redirectors
            .into_iter()
            .filter(|r| query.project.is_none_or(|p| r.project == p))
            .map(RedirectorResponse::from)
            .collect(),
    ))
}

pub async fn create_redirector(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateRedirectorRequest>,
) -> Result<(StatusCode, Json<RedirectorResponse>), ApiError> {
    let redirector = state.orchestrator.create_redirector(&ctx, req.into()).await?;
    Ok((StatusCode::CREATED, Json(redirector.into())))
}

pub async fn delete_redirector(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.delete_redirector(&ctx, id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn resync_redirector(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<RedirectorResponse>), ApiError> {
    let redirector = state.orchestrator.resync_redirector(&ctx, id).await?;
    Ok((StatusCode::ACCEPTED, Json(redirector.into())))
}
