use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use pkg_types::cluster::{ClusterView, CreateClusterRequest, SearchConditions};
use pkg_types::page::PageQuery;
use pkg_types::user::UserProfile;

use crate::AppState;
use crate::error::ApiError;

/// Body of a successful DELETE.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteClusterResponse {
    pub name: String,
    pub bindings_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// POST /api/v1/clusters: admit a new cluster.
///
/// Returns once the cluster is committed in phase `Saved`; provisioning
/// continues in the background.
pub async fn register_cluster(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Json(request): Json<CreateClusterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("User {} registering cluster {}", user.name, request.name);

    // Cancelled if the client goes away mid-preflight.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let registered = state.lifecycle.register(&user, request, &cancel).await?;
    let view = ClusterView::from_cluster(&registered.cluster, false);
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/clusters
pub async fn list_clusters(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<Vec<ClusterView>>, ApiError> {
    Ok(Json(state.lifecycle.list(&user).await?))
}

/// GET /api/v1/clusters/{name}
pub async fn get_cluster(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(name): Path<String>,
) -> Result<Json<ClusterView>, ApiError> {
    Ok(Json(state.lifecycle.get(&user, &name).await?))
}

/// DELETE /api/v1/clusters/{name}
pub async fn delete_cluster(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(name): Path<String>,
) -> Result<Json<DeleteClusterResponse>, ApiError> {
    info!("User {} deleting cluster {}", user.name, name);
    let deleted = state.lifecycle.delete(&user, &name).await?;
    Ok(Json(DeleteClusterResponse {
        name: deleted.name,
        bindings_removed: deleted.bindings_removed,
        warning: deleted.cleanup_warning,
    }))
}

/// POST /api/v1/clusters/search?pageNum&pageSize
pub async fn search_clusters(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Query(page): Query<PageQuery>,
    Json(conditions): Json<SearchConditions>,
) -> Result<impl IntoResponse, ApiError> {
    let window = page
        .window()
        .map_err(|e| ApiError::BadRequest(format!("{:#}", e)))?;
    let page = state.lifecycle.search(&user, &conditions, window).await?;
    Ok(Json(page))
}
