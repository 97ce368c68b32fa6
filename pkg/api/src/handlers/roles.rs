use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use pkg_types::rbac::{ClusterRole, UpdateClusterRoleRequest};
use pkg_types::user::UserProfile;

use crate::AppState;
use crate::error::ApiError;

/// GET /api/v1/clusters/{name}/clusterroles
pub async fn list_cluster_roles(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(cluster): Path<String>,
) -> Result<Json<Vec<ClusterRole>>, ApiError> {
    Ok(Json(state.lifecycle.list_cluster_roles(&user, &cluster).await?))
}

/// POST /api/v1/clusters/{name}/clusterroles: create a custom role.
pub async fn create_cluster_role(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(cluster): Path<String>,
    Json(role): Json<ClusterRole>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        "User {} creating cluster role {} on {}",
        user.name, role.name, cluster
    );
    let role = state
        .lifecycle
        .create_cluster_role(&user, &cluster, role)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn update_cluster_role(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, role)): Path<(String, String)>,
    Json(request): Json<UpdateClusterRoleRequest>,
) -> Result<Json<ClusterRole>, ApiError> {
    Ok(Json(
        state
            .lifecycle
            .update_cluster_role(&user, &cluster, &role, request)
            .await?,
    ))
}

pub async fn delete_cluster_role(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, role)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    info!(
        "User {} deleting cluster role {} on {}",
        user.name, role, cluster
    );
    state
        .lifecycle
        .delete_cluster_role(&user, &cluster, &role)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
