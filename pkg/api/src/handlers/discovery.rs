use axum::{
    Extension, Json,
    extract::{Path, State},
};

use pkg_types::discovery::{ApiGroup, ApiResource};
use pkg_types::user::UserProfile;

use crate::AppState;
use crate::error::ApiError;

/// GET /api/v1/clusters/{name}/apigroups
pub async fn list_api_groups(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(cluster): Path<String>,
) -> Result<Json<Vec<ApiGroup>>, ApiError> {
    Ok(Json(state.lifecycle.api_groups(&user, &cluster).await?))
}

/// GET /api/v1/clusters/{name}/apigroups/{*group}: resources served by one
/// group version, e.g. `v1` or `apps/v1`.
pub async fn list_group_resources(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, group)): Path<(String, String)>,
) -> Result<Json<Vec<ApiResource>>, ApiError> {
    Ok(Json(
        state
            .lifecycle
            .group_resources(&user, &cluster, &group)
            .await?,
    ))
}

/// GET /api/v1/clusters/{name}/namespaces
pub async fn list_namespaces(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(cluster): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.lifecycle.namespaces(&user, &cluster).await?))
}
