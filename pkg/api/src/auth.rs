use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::AppState;
use crate::error::ApiError;

fn bearer_token(req: &Request) -> Result<&str, ApiError> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".into()))?;
    let value = value
        .to_str()
        .map_err(|_| ApiError::Unauthorized("malformed Authorization header".into()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("expected a Bearer token".into()))
}

/// Middleware: resolves the Bearer token to a `UserProfile` and injects it
/// into the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req)?;
    let user = match state.tokens.get(token) {
        Some(user) => user.clone(),
        None => {
            warn!("Invalid Bearer token provided");
            return Err(ApiError::Unauthorized("invalid token".into()));
        }
    };

    debug!("Authenticated request as {}", user.name);
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
