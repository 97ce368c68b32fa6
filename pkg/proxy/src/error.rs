/// Failures of a proxied call.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed gateway parameters (`namespace`, `pageNum`, `pageSize`)
    #[error("{0}")]
    Validation(String),

    #[error("cluster {0} not found")]
    ClusterNotFound(String),

    /// The caller holds no credential for the cluster
    #[error("user {user} has no access to cluster {cluster}")]
    NoBinding { cluster: String, user: String },

    #[error("storage failure: {0}")]
    Persistence(String),

    /// Scope discovery or response decoding failed
    #[error("cluster request failed: {0}")]
    Upstream(String),

    /// The only namespace fanned out to refused the caller
    #[error("access to namespace {0} is forbidden")]
    Forbidden(String),

    /// A namespace answered with a non-success status other than 403
    #[error("namespace request returned {status}: {body}")]
    MergeAbort { status: u16, body: String },

    /// The request could not be sent or its response not read
    #[error("transport error: {0}")]
    Transport(String),
}
