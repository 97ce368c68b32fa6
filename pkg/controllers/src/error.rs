use pkg_kube::KubeError;

/// Failures of cluster lifecycle and membership operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Malformed request or an operation the cluster's state does not allow
    #[error("{0}")]
    Validation(String),

    /// The cluster could not be reached or did not answer sensibly
    #[error("cluster unreachable: {0}")]
    Connectivity(String),

    /// The control plane lacks a required permission, as `<resource>-<verb>`
    #[error("missing required permission: {0}")]
    Capability(String),

    #[error("storage failure: {0}")]
    Persistence(String),

    /// The cluster rejected a provisioning or signing call
    #[error("cluster request failed: {0}")]
    Upstream(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    /// The caller lacks the fleetgate-side right to the operation
    #[error("{0}")]
    Forbidden(String),
}

impl ClusterError {
    pub(crate) fn persistence(e: anyhow::Error) -> Self {
        ClusterError::Persistence(format!("{:#}", e))
    }

    pub(crate) fn upstream(e: KubeError) -> Self {
        ClusterError::Upstream(e.to_string())
    }

    pub(crate) fn connectivity(e: KubeError) -> Self {
        ClusterError::Connectivity(e.to_string())
    }

    /// Map a downstream `404`/`409` on `what` to `NotFound`/`Conflict`.
    pub(crate) fn from_status(e: KubeError, what: String) -> Self {
        match e.status_code() {
            Some(404) => ClusterError::NotFound(what),
            Some(409) => ClusterError::Conflict(what),
            _ => ClusterError::upstream(e),
        }
    }
}
