use pkg_types::discovery::{ApiGroup, ApiResource};
use pkg_types::user::UserProfile;

use crate::access;
use crate::error::ClusterError;
use crate::lifecycle::ClusterLifecycle;

impl ClusterLifecycle {
    /// API groups served by `cluster`. Open to the cluster's members.
    pub async fn api_groups(
        &self,
        caller: &UserProfile,
        cluster: &str,
    ) -> Result<Vec<ApiGroup>, ClusterError> {
        let cluster = self.load(cluster).await?;
        access::require_member(&self.store, caller, &cluster).await?;
        self.client_for(&cluster)?
            .list_api_groups()
            .await
            .map_err(ClusterError::upstream)
    }

    pub async fn group_resources(
        &self,
        caller: &UserProfile,
        cluster: &str,
        group_version: &str,
    ) -> Result<Vec<ApiResource>, ClusterError> {
        let group_version = group_version.trim_matches('/');
        if group_version.is_empty() {
            return Err(ClusterError::Validation("group version must not be empty".into()));
        }
        let cluster = self.load(cluster).await?;
        access::require_member(&self.store, caller, &cluster).await?;
        self.client_for(&cluster)?
            .list_group_resources(group_version)
            .await
            .map_err(|e| ClusterError::from_status(e, format!("api group version {}", group_version)))
    }

    pub async fn namespaces(
        &self,
        caller: &UserProfile,
        cluster: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let cluster = self.load(cluster).await?;
        access::require_member(&self.store, caller, &cluster).await?;
        self.client_for(&cluster)?
            .list_namespaces()
            .await
            .map_err(ClusterError::upstream)
    }
}
