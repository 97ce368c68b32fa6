use pkg_constants::cluster::ADMIN_CLUSTER_ROLE;
use pkg_state::client::KvRead;
use pkg_state::repo;
use pkg_types::cluster::Cluster;
use pkg_types::user::UserProfile;

use crate::error::ClusterError;

/// The caller registered `cluster` or holds `admin-cluster` on it.
pub(crate) async fn require_admin(
    reader: &impl KvRead,
    caller: &UserProfile,
    cluster: &Cluster,
) -> Result<(), ClusterError> {
    if cluster.created_by == caller.name {
        return Ok(());
    }
    let binding = repo::get_binding(reader, &cluster.name, &caller.name)
        .await
        .map_err(ClusterError::persistence)?;
    match binding {
        Some(b) if b.cluster_roles.iter().any(|r| r == ADMIN_CLUSTER_ROLE) => Ok(()),
        _ => Err(ClusterError::Forbidden(format!(
            "user {} may not manage cluster {}",
            caller.name, cluster.name
        ))),
    }
}

/// The caller registered `cluster` or holds any binding on it.
pub(crate) async fn require_member(
    reader: &impl KvRead,
    caller: &UserProfile,
    cluster: &Cluster,
) -> Result<(), ClusterError> {
    if cluster.created_by == caller.name {
        return Ok(());
    }
    let binding = repo::get_binding(reader, &cluster.name, &caller.name)
        .await
        .map_err(ClusterError::persistence)?;
    if binding.is_some() {
        Ok(())
    } else {
        Err(ClusterError::Forbidden(format!(
            "user {} is not a member of cluster {}",
            caller.name, cluster.name
        )))
    }
}
