use serde::{Deserialize, Serialize};

/// One API group served by a cluster. The core group has an empty name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGroup {
    pub name: String,
    /// `group/version` strings, e.g. `apps/v1`; plain `v1` for the core group.
    pub versions: Vec<String>,
    pub preferred_version: String,
}

/// A resource served under one group version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    pub namespaced: bool,
    #[serde(default)]
    pub verbs: Vec<String>,
}
