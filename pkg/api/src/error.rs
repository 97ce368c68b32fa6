use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{debug, error};

use pkg_controllers::ClusterError;
use pkg_proxy::GatewayError;

/// Error returned by every API handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Malformed path or query parameters
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Cluster(e) => match e {
                ClusterError::Validation(_) => StatusCode::BAD_REQUEST,
                ClusterError::Forbidden(_) => StatusCode::FORBIDDEN,
                ClusterError::NotFound(_) => StatusCode::NOT_FOUND,
                ClusterError::Conflict(_) => StatusCode::CONFLICT,
                ClusterError::Connectivity(_)
                | ClusterError::Capability(_)
                | ClusterError::Persistence(_)
                | ClusterError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            // A sole-namespace 403 lands in the same class as every other
            // downstream failure.
            ApiError::Gateway(e) => match e {
                GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
                GatewayError::ClusterNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected ({}): {}", status, self);
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_error_classes_to_status_codes() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (
                ApiError::Unauthorized("x".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ClusterError::Validation("bad".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                ClusterError::NotFound("cluster a".into()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                ClusterError::Conflict("cluster a".into()).into(),
                StatusCode::CONFLICT,
            ),
            (
                ClusterError::Forbidden("user bob may not manage cluster a".into()).into(),
                StatusCode::FORBIDDEN,
            ),
            (
                ClusterError::Capability("pods-get".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                GatewayError::Validation("pageNum".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                GatewayError::ClusterNotFound("a".into()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                GatewayError::Forbidden("team-a".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                GatewayError::NoBinding {
                    cluster: "a".into(),
                    user: "bob".into(),
                }
                .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status(), expected, "{}", err);
        }
    }

    #[test]
    fn message_is_the_display_text() {
        let err: ApiError = ClusterError::Capability("pods-delete".into()).into();
        assert_eq!(err.to_string(), "missing required permission: pods-delete");
    }
}
