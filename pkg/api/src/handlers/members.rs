use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use pkg_types::member::{ClusterMember, CreateMemberRequest, UpdateMemberRequest};
use pkg_types::user::UserProfile;

use crate::AppState;
use crate::error::ApiError;

pub async fn list_members(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(cluster): Path<String>,
) -> Result<Json<Vec<ClusterMember>>, ApiError> {
    Ok(Json(state.lifecycle.list_members(&user, &cluster).await?))
}

/// POST /api/v1/clusters/{name}/members: bind roles and issue a credential.
pub async fn add_member(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(cluster): Path<String>,
    Json(request): Json<CreateMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        "User {} adding member {} to cluster {}",
        user.name, request.name, cluster
    );
    let member = state.lifecycle.add_member(&user, &cluster, request).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn get_member(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, member)): Path<(String, String)>,
) -> Result<Json<ClusterMember>, ApiError> {
    Ok(Json(state.lifecycle.get_member(&user, &cluster, &member).await?))
}

/// PUT /api/v1/clusters/{name}/members/{member}: replace the member's roles.
pub async fn update_member(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, member)): Path<(String, String)>,
    Json(request): Json<UpdateMemberRequest>,
) -> Result<Json<ClusterMember>, ApiError> {
    info!(
        "User {} updating roles of {} on cluster {}",
        user.name, member, cluster
    );
    Ok(Json(
        state
            .lifecycle
            .update_member(&user, &cluster, &member, request)
            .await?,
    ))
}

pub async fn delete_member(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, member)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    info!(
        "User {} removing member {} from cluster {}",
        user.name, member, cluster
    );
    state.lifecycle.delete_member(&user, &cluster, &member).await?;
    Ok(StatusCode::NO_CONTENT)
}
