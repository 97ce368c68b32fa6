pub mod auth;
pub mod error;
pub mod handlers;
pub mod request_id;
pub mod server;

use std::collections::HashMap;
use std::sync::Arc;

use pkg_controllers::ClusterLifecycle;
use pkg_proxy::Gateway;
use pkg_types::user::UserProfile;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: ClusterLifecycle,
    pub gateway: Gateway,
    /// Bearer token to the user it authenticates.
    pub tokens: Arc<HashMap<String, UserProfile>>,
}
