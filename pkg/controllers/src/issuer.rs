use tracing::{debug, info};

use pkg_kube::ClusterClient;
use pkg_pki::key::ClusterKey;
use pkg_state::client::StateStore;
use pkg_state::repo;
use pkg_types::cluster::{Cluster, ClusterBinding};
use pkg_types::member::NamespaceGrant;

use crate::error::ClusterError;

/// Have the cluster sign a certificate for `username` and persist the
/// resulting binding.
///
/// Creates exactly one binding row. If the cluster is gone by the time the
/// certificate arrives, nothing is written (`NotFound`); if a binding for
/// the pair already exists it is left untouched (`Conflict`).
pub async fn issue_binding(
    store: &StateStore,
    client: &dyn ClusterClient,
    cluster: &Cluster,
    username: &str,
    cluster_roles: Vec<String>,
    namespace_roles: Vec<NamespaceGrant>,
) -> Result<ClusterBinding, ClusterError> {
    let certificate = client
        .create_common_user(username)
        .await
        .map_err(ClusterError::upstream)?;
    pkg_pki::identity::validate_certificate_pem(&certificate).map_err(|e| {
        ClusterError::Upstream(format!("cluster returned an unusable certificate: {:#}", e))
    })?;
    let key = ClusterKey::from_pem(&cluster.private_key)
        .map_err(|e| ClusterError::Persistence(format!("cluster {}: {:#}", cluster.name, e)))?;
    let matches = pkg_pki::identity::certificate_matches_key(&certificate, &key).map_err(|e| {
        ClusterError::Upstream(format!("cluster returned an unusable certificate: {:#}", e))
    })?;
    if !matches {
        return Err(ClusterError::Upstream(format!(
            "certificate issued for {} does not match the key of cluster {}",
            username, cluster.name
        )));
    }

    let binding = ClusterBinding::new(&cluster.name, username, certificate)
        .with_roles(cluster_roles)
        .with_namespace_roles(namespace_roles);

    let mut tx = store.begin().await;
    let cluster_exists = repo::get_cluster(&tx, &cluster.name)
        .await
        .map_err(ClusterError::persistence)?
        .is_some();
    if !cluster_exists {
        tx.rollback();
        return Err(ClusterError::NotFound(format!("cluster {}", cluster.name)));
    }
    let existing = repo::get_binding(&tx, &cluster.name, username)
        .await
        .map_err(ClusterError::persistence)?;
    if existing.is_some() {
        tx.rollback();
        return Err(ClusterError::Conflict(format!(
            "binding {}",
            ClusterBinding::name_for(&cluster.name, username)
        )));
    }
    repo::put_binding(&mut tx, &binding).map_err(ClusterError::persistence)?;
    tx.commit().await.map_err(ClusterError::persistence)?;

    info!("Issued binding {} for {}", binding.name, username);
    Ok(binding)
}

/// Return the existing binding for `(cluster, username)`, issuing one if
/// there is none.
pub async fn ensure_binding(
    store: &StateStore,
    client: &dyn ClusterClient,
    cluster: &Cluster,
    username: &str,
    cluster_roles: Vec<String>,
) -> Result<ClusterBinding, ClusterError> {
    if let Some(existing) = repo::get_binding(store, &cluster.name, username)
        .await
        .map_err(ClusterError::persistence)?
    {
        debug!("Binding {} already present", existing.name);
        return Ok(existing);
    }
    match issue_binding(store, client, cluster, username, cluster_roles, Vec::new()).await {
        // Lost a race with a concurrent issue; the stored one wins.
        Err(ClusterError::Conflict(_)) => repo::get_binding(store, &cluster.name, username)
            .await
            .map_err(ClusterError::persistence)?
            .ok_or_else(|| ClusterError::NotFound(format!("binding for {}", username))),
        other => other,
    }
}
