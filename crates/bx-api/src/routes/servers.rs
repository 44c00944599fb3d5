use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use uuid::Uuid;

use bx_db::models::Server;

use crate::auth::RequestContext;
use crate::dto::{
    CreateServerRequest, InstanceResponse, ListQuery, RemoveAllResponse, ServerResponse,
    UpdateRolesRequest,
};
use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_servers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ServerResponse>>, ApiError> {
    let servers = match query.project {
        Some(project) => Server::list_for_project(&state.db, project).await?,
        None => Server::list(&state.db).await?,
    };
    Ok(Json(servers.into_iter().map(ServerResponse::from).collect()))
}

pub async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServerResponse>, ApiError> {
    let server = Server::get_by_id(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(server.into()))
}

/// Accepts the server and returns it in `Deploying`; the rest of the
/// lifecycle is reported over the websocket.
pub async fn create_server(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateServerRequest>,
) -> Result<(StatusCode, Json<ServerResponse>), ApiError> {
    let server = state.orchestrator.create_server(&ctx, req.into()).await?;
    Ok((StatusCode::ACCEPTED, Json(server.into())))
}

pub async fn remove_server(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.remove_server(&ctx, id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn remove_all_servers(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<RemoveAllResponse>, ApiError> {
    if state.config.in_production {
        return Err(ApiError::Forbidden("removing all servers is disabled in production".into()));
    }

    tracing::warn!(user = %ctx.username, "removing all servers");
    let deleted = state.orchestrator.remove_all_servers(&ctx).await?;
    Ok(Json(RemoveAllResponse { deleted }))
}

pub async fn provision_server(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ServerResponse>), ApiError> {
    let server = state.orchestrator.provision_server(&ctx, id).await?;
    Ok((StatusCode::ACCEPTED, Json(server.into())))
}

pub async fn update_roles(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRolesRequest>,
) -> Result<(StatusCode, Json<ServerResponse>), ApiError> {
    let server = state
        .orchestrator
        .update_server_roles(&ctx, id, &req.roles)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(server.into())))
}

pub async fn list_instances(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<Vec<InstanceResponse>>, ApiError> {
    let instances = state.orchestrator.list_instances(&provider).await?;
    Ok(Json(instances.into_iter().map(InstanceResponse::from).collect()))
}
