use tracing::{info, warn};

use pkg_constants::cluster::{
    ADMIN_CLUSTER_ROLE, MANAGE_NAMESPACE_ROLE, VIEW_CLUSTER_ROLE, VIEW_NAMESPACE_ROLE,
};
use pkg_kube::{ClusterClient, KubeError};
use pkg_state::repo;
use pkg_types::cluster::ClusterPhase;
use pkg_types::member::{
    ClusterMember, CreateMemberRequest, NamespaceGrant, UpdateMemberRequest, validate_grants,
};
use pkg_types::rbac::is_builtin_role;
use pkg_types::user::UserProfile;

use crate::access;
use crate::error::ClusterError;
use crate::issuer;
use crate::lifecycle::ClusterLifecycle;

/// Built-in roles a member can be granted cluster-wide.
const CLUSTER_GRANTABLE: &[&str] = &[ADMIN_CLUSTER_ROLE, VIEW_CLUSTER_ROLE];

/// Built-in roles a member can be granted inside a namespace.
const NAMESPACE_GRANTABLE: &[&str] = &[MANAGE_NAMESPACE_ROLE, VIEW_NAMESPACE_ROLE];

/// Check requested roles against the built-ins and, when something else is
/// asked for, the custom roles fleetgate manages on the cluster.
async fn check_roles(
    client: &dyn ClusterClient,
    cluster_roles: &[String],
    namespace_roles: &[NamespaceGrant],
) -> Result<(), ClusterError> {
    let needs_lookup = cluster_roles
        .iter()
        .any(|r| !CLUSTER_GRANTABLE.contains(&r.as_str()))
        || namespace_roles
            .iter()
            .any(|g| !NAMESPACE_GRANTABLE.contains(&g.role.as_str()));
    let custom: Vec<String> = if needs_lookup {
        client
            .list_cluster_roles()
            .await
            .map_err(ClusterError::upstream)?
            .into_iter()
            .map(|r| r.name)
            .filter(|name| !is_builtin_role(name))
            .collect()
    } else {
        Vec::new()
    };

    if let Some(bad) = cluster_roles.iter().find(|r| {
        !CLUSTER_GRANTABLE.contains(&r.as_str()) && !custom.iter().any(|c| c == *r)
    }) {
        return Err(ClusterError::Validation(format!(
            "role {} cannot be granted to members",
            bad
        )));
    }
    let mut allowed: Vec<&str> = NAMESPACE_GRANTABLE.to_vec();
    allowed.extend(custom.iter().map(String::as_str));
    validate_grants(namespace_roles, &allowed)
        .map_err(|e| ClusterError::Validation(format!("{:#}", e)))
}

async fn bind_all(
    client: &dyn ClusterClient,
    user: &str,
    cluster_roles: &[String],
    namespace_roles: &[NamespaceGrant],
) -> Result<(), KubeError> {
    for role in cluster_roles {
        client
            .create_or_update_cluster_role_binding(role, user, true)
            .await?;
    }
    for grant in namespace_roles {
        client
            .create_or_update_role_binding(&grant.namespace, &grant.role, user)
            .await?;
    }
    Ok(())
}

/// Best-effort removal of grants made for an add that did not complete.
async fn withdraw_grants(client: &dyn ClusterClient, cluster: &str, user: &str) {
    match client.remove_user_role_bindings(user).await {
        Ok(n) => info!(
            "Withdrew {} role binding(s) of {} on {} after a failed add",
            n, user, cluster
        ),
        Err(e) => warn!(
            "Role bindings of {} on {} may be orphaned, withdrawal failed: {}",
            user, cluster, e
        ),
    }
}

/// Put back the grants a member held before a role update that failed
/// halfway.
async fn restore_grants(
    client: &dyn ClusterClient,
    cluster: &str,
    user: &str,
    cluster_roles: &[String],
    namespace_roles: &[NamespaceGrant],
) {
    if let Err(e) = client.remove_user_role_bindings(user).await {
        warn!(
            "Could not clear partial grants of {} on {}: {}",
            user, cluster, e
        );
    }
    match bind_all(client, user, cluster_roles, namespace_roles).await {
        Ok(()) => info!(
            "Restored previous role bindings of {} on {} after a failed update",
            user, cluster
        ),
        Err(e) => warn!(
            "Role bindings of {} on {} no longer match the stored roles, restore failed: {}",
            user, cluster, e
        ),
    }
}

impl ClusterLifecycle {
    /// Grant `request.name` access to `cluster`: bind the requested roles
    /// downstream, then issue the member's credential. With no roles at all
    /// the member gets `view-cluster`. If any step fails the grants made so
    /// far are withdrawn.
    pub async fn add_member(
        &self,
        caller: &UserProfile,
        cluster: &str,
        request: CreateMemberRequest,
    ) -> Result<ClusterMember, ClusterError> {
        let username = request.name.trim().to_string();
        if username.is_empty() {
            return Err(ClusterError::Validation("member name must not be empty".into()));
        }
        let mut cluster_roles = request.cluster_roles;
        let namespace_roles = request.namespace_roles;
        if cluster_roles.is_empty() && namespace_roles.is_empty() {
            cluster_roles.push(VIEW_CLUSTER_ROLE.to_string());
        }

        let cluster = self.load(cluster).await?;
        access::require_admin(&self.store, caller, &cluster).await?;
        if cluster.status.phase != ClusterPhase::Completed {
            return Err(ClusterError::Validation(format!(
                "cluster {} is not ready (phase {})",
                cluster.name, cluster.status.phase
            )));
        }
        if repo::get_binding(&self.store, &cluster.name, &username)
            .await
            .map_err(ClusterError::persistence)?
            .is_some()
        {
            return Err(ClusterError::Conflict(format!(
                "member {} of cluster {}",
                username, cluster.name
            )));
        }

        let client = self.client_for(&cluster)?;
        check_roles(client.as_ref(), &cluster_roles, &namespace_roles).await?;
        if let Err(e) = bind_all(client.as_ref(), &username, &cluster_roles, &namespace_roles).await {
            withdraw_grants(client.as_ref(), &cluster.name, &username).await;
            return Err(ClusterError::upstream(e));
        }
        let issued = issuer::issue_binding(
            &self.store,
            client.as_ref(),
            &cluster,
            &username,
            cluster_roles,
            namespace_roles,
        )
        .await;
        let binding = match issued {
            Ok(binding) => binding,
            // A concurrent add won; its grants are the live ones.
            Err(e @ ClusterError::Conflict(_)) => return Err(e),
            Err(e) => {
                withdraw_grants(client.as_ref(), &cluster.name, &username).await;
                return Err(e);
            }
        };
        info!(
            "User {} added member {} to cluster {}",
            caller.name, username, cluster.name
        );
        Ok(ClusterMember::from_binding(&binding))
    }

    /// Replace a member's roles. Existing downstream grants are removed and
    /// the new set bound before the stored binding is updated. If binding the
    /// new set fails, the previous grants are restored so the cluster keeps
    /// matching the stored roles.
    pub async fn update_member(
        &self,
        caller: &UserProfile,
        cluster: &str,
        user: &str,
        request: UpdateMemberRequest,
    ) -> Result<ClusterMember, ClusterError> {
        if request.cluster_roles.is_empty() && request.namespace_roles.is_empty() {
            return Err(ClusterError::Validation(
                "a member needs at least one role".into(),
            ));
        }
        let cluster = self.load(cluster).await?;
        access::require_admin(&self.store, caller, &cluster).await?;
        let Some(previous) = repo::get_binding(&self.store, &cluster.name, user)
            .await
            .map_err(ClusterError::persistence)?
        else {
            return Err(ClusterError::NotFound(format!(
                "member {} of cluster {}",
                user, cluster.name
            )));
        };

        let client = self.client_for(&cluster)?;
        check_roles(client.as_ref(), &request.cluster_roles, &request.namespace_roles).await?;
        client
            .remove_user_role_bindings(user)
            .await
            .map_err(ClusterError::upstream)?;
        if let Err(e) =
            bind_all(client.as_ref(), user, &request.cluster_roles, &request.namespace_roles).await
        {
            restore_grants(
                client.as_ref(),
                &cluster.name,
                user,
                &previous.cluster_roles,
                &previous.namespace_roles,
            )
            .await;
            return Err(ClusterError::upstream(e));
        }

        let mut tx = self.store.begin().await;
        let Some(mut binding) = repo::get_binding(&tx, &cluster.name, user)
            .await
            .map_err(ClusterError::persistence)?
        else {
            tx.rollback();
            return Err(ClusterError::NotFound(format!(
                "member {} of cluster {}",
                user, cluster.name
            )));
        };
        binding.cluster_roles = request.cluster_roles;
        binding.namespace_roles = request.namespace_roles;
        repo::put_binding(&mut tx, &binding).map_err(ClusterError::persistence)?;
        tx.commit().await.map_err(ClusterError::persistence)?;
        info!(
            "User {} updated roles of member {} on cluster {}",
            caller.name, user, cluster.name
        );
        Ok(ClusterMember::from_binding(&binding))
    }

    pub async fn list_members(
        &self,
        caller: &UserProfile,
        cluster: &str,
    ) -> Result<Vec<ClusterMember>, ClusterError> {
        let cluster = self.load(cluster).await?;
        access::require_member(&self.store, caller, &cluster).await?;
        let bindings = repo::list_bindings(&self.store, &cluster.name)
            .await
            .map_err(ClusterError::persistence)?;
        Ok(bindings.iter().map(ClusterMember::from_binding).collect())
    }

    pub async fn get_member(
        &self,
        caller: &UserProfile,
        cluster: &str,
        user: &str,
    ) -> Result<ClusterMember, ClusterError> {
        let cluster = self.load(cluster).await?;
        access::require_member(&self.store, caller, &cluster).await?;
        repo::get_binding(&self.store, &cluster.name, user)
            .await
            .map_err(ClusterError::persistence)?
            .map(|b| ClusterMember::from_binding(&b))
            .ok_or_else(|| {
                ClusterError::NotFound(format!("member {} of cluster {}", user, cluster.name))
            })
    }

    /// Revoke a member: their downstream role bindings go first, then the
    /// stored binding. A downstream failure leaves the member in place.
    pub async fn delete_member(
        &self,
        caller: &UserProfile,
        cluster: &str,
        user: &str,
    ) -> Result<(), ClusterError> {
        let cluster = self.load(cluster).await?;
        access::require_admin(&self.store, caller, &cluster).await?;
        if repo::get_binding(&self.store, &cluster.name, user)
            .await
            .map_err(ClusterError::persistence)?
            .is_none()
        {
            return Err(ClusterError::NotFound(format!(
                "member {} of cluster {}",
                user, cluster.name
            )));
        }

        let client = self.client_for(&cluster)?;
        let removed = client
            .remove_user_role_bindings(user)
            .await
            .map_err(ClusterError::upstream)?;

        let mut tx = self.store.begin().await;
        repo::delete_binding(&mut tx, &cluster.name, user);
        tx.commit().await.map_err(ClusterError::persistence)?;
        info!(
            "User {} removed member {} from cluster {} ({} role binding(s) withdrawn)",
            caller.name, user, cluster.name, removed
        );
        Ok(())
    }
}
