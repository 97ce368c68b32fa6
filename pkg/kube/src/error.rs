/// Errors talking to a managed cluster.
#[derive(Debug, thiserror::Error)]
pub enum KubeError {
    /// Transport-level failure (connect, TLS, I/O)
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API server answered with a non-success status
    #[error("{method} {path} returned {code}: {body}")]
    Status {
        method: String,
        path: String,
        code: u16,
        body: String,
    },

    /// Response body did not have the expected shape
    #[error("unexpected response from {path}: {message}")]
    Decode { path: String, message: String },

    /// Connection settings are unusable
    #[error("invalid cluster configuration: {0}")]
    Config(String),

    /// Key or certificate handling failed
    #[error("key material error: {0}")]
    Pki(String),

    /// A polled operation did not finish in time
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// A spawned check died without producing a result
    #[error("check task failed: {0}")]
    Task(String),
}

impl KubeError {
    /// HTTP status code, if the server produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            KubeError::Status { code, .. } => Some(*code),
            KubeError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
