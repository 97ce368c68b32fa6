use axum::{
    Extension,
    body::to_bytes,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use pkg_constants::gateway::MAX_PROXY_BODY_BYTES;
use pkg_proxy::ProxyContext;
use pkg_proxy::path::GatewayQuery;
use pkg_types::user::UserProfile;

use crate::AppState;
use crate::error::ApiError;

/// ANY /api/v1/proxy/{name}/k8s/{*path}: forward a Kubernetes API call to
/// a managed cluster as the caller.
pub async fn proxy_request(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, path)): Path<(String, String)>,
    req: Request,
) -> Result<Response, ApiError> {
    let method = req.method().clone();
    let query = GatewayQuery::parse(req.uri().query())?;
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = to_bytes(req.into_body(), MAX_PROXY_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {}", e)))?;

    debug!("Proxying {} /{} on {} for {}", method, path, cluster, user.name);

    // Dropping this handler (client disconnect) cancels any fan-out.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let response = state
        .gateway
        .proxy(ProxyContext {
            cluster,
            caller: user,
            method,
            path: format!("/{}", path.trim_start_matches('/')),
            query,
            body,
            content_type,
            cancel,
        })
        .await?;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut headers = HeaderMap::new();
    if let Some(value) = response
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    Ok((status, headers, response.body).into_response())
}
