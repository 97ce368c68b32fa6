use serde::{Deserialize, Serialize};

/// Authenticated caller identity.
///
/// Resolved once by the auth middleware and passed explicitly to every
/// controller and gateway operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
}

impl UserProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
