use tracing::info;

use pkg_kube::ClusterClient;
use pkg_types::rbac::{ClusterRole, UpdateClusterRoleRequest, is_builtin_role};
use pkg_types::user::UserProfile;

use crate::access;
use crate::error::ClusterError;
use crate::lifecycle::ClusterLifecycle;

fn refuse_builtin(name: &str) -> Result<(), ClusterError> {
    if is_builtin_role(name) {
        return Err(ClusterError::Validation(format!(
            "cluster role {} is provisioned by fleetgate and cannot be changed",
            name
        )));
    }
    Ok(())
}

/// Roles created outside fleetgate are invisible to it.
async fn require_managed_role(
    client: &dyn ClusterClient,
    cluster: &str,
    name: &str,
) -> Result<(), ClusterError> {
    let managed = client
        .list_cluster_roles()
        .await
        .map_err(ClusterError::upstream)?;
    if managed.iter().any(|r| r.name == name) {
        Ok(())
    } else {
        Err(ClusterError::NotFound(format!(
            "cluster role {} on cluster {}",
            name, cluster
        )))
    }
}

impl ClusterLifecycle {
    /// Cluster roles fleetgate manages on `cluster`, built-ins included.
    pub async fn list_cluster_roles(
        &self,
        caller: &UserProfile,
        cluster: &str,
    ) -> Result<Vec<ClusterRole>, ClusterError> {
        let cluster = self.load(cluster).await?;
        access::require_member(&self.store, caller, &cluster).await?;
        self.client_for(&cluster)?
            .list_cluster_roles()
            .await
            .map_err(ClusterError::upstream)
    }

    pub async fn create_cluster_role(
        &self,
        caller: &UserProfile,
        cluster: &str,
        role: ClusterRole,
    ) -> Result<ClusterRole, ClusterError> {
        role.validate()
            .map_err(|e| ClusterError::Validation(format!("{:#}", e)))?;
        refuse_builtin(&role.name)?;
        let cluster = self.load(cluster).await?;
        access::require_admin(&self.store, caller, &cluster).await?;
        self.client_for(&cluster)?
            .create_cluster_role(&role)
            .await
            .map_err(|e| ClusterError::from_status(e, format!("cluster role {}", role.name)))?;
        info!(
            "User {} created cluster role {} on {}",
            caller.name, role.name, cluster.name
        );
        Ok(role)
    }

    /// Replace the rules of a custom cluster role fleetgate manages.
    pub async fn update_cluster_role(
        &self,
        caller: &UserProfile,
        cluster: &str,
        name: &str,
        request: UpdateClusterRoleRequest,
    ) -> Result<ClusterRole, ClusterError> {
        let role = ClusterRole {
            name: name.to_string(),
            rules: request.rules,
        };
        role.validate()
            .map_err(|e| ClusterError::Validation(format!("{:#}", e)))?;
        refuse_builtin(name)?;
        let cluster = self.load(cluster).await?;
        access::require_admin(&self.store, caller, &cluster).await?;
        let client = self.client_for(&cluster)?;
        require_managed_role(client.as_ref(), &cluster.name, name).await?;
        client
            .update_cluster_role(&role)
            .await
            .map_err(|e| ClusterError::from_status(e, format!("cluster role {}", name)))?;
        info!(
            "User {} updated cluster role {} on {}",
            caller.name, name, cluster.name
        );
        Ok(role)
    }

    pub async fn delete_cluster_role(
        &self,
        caller: &UserProfile,
        cluster: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        refuse_builtin(name)?;
        let cluster = self.load(cluster).await?;
        access::require_admin(&self.store, caller, &cluster).await?;
        let client = self.client_for(&cluster)?;
        require_managed_role(client.as_ref(), &cluster.name, name).await?;
        client
            .delete_cluster_role(name)
            .await
            .map_err(ClusterError::upstream)?;
        info!(
            "User {} deleted cluster role {} on {}",
            caller.name, name, cluster.name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use pkg_kube::fake::FakeClientFactory;
    use pkg_state::client::StateStore;
    use pkg_types::cluster::{Authentication, ClusterSpec, ConnectSpec, CreateClusterRequest};
    use pkg_types::rbac::PolicyRule;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn ready_cluster() -> (ClusterLifecycle, FakeClientFactory) {
        let store = StateStore::in_memory().await.unwrap();
        let factory = FakeClientFactory::new();
        let lc = ClusterLifecycle::new(store, Arc::new(factory.clone()), LifecycleConfig::default());
        let mut connect = ConnectSpec::default();
        connect.forward.api_server = "https://10.0.0.1:6443".into();
        let request = CreateClusterRequest {
            name: "prod".into(),
            spec: ClusterSpec {
                connect,
                authentication: Authentication::Bearer { token: "t".into() },
                ca_data: None,
            },
        };
        let reg = lc
            .register(&UserProfile::new("alice"), request, &CancellationToken::new())
            .await
            .unwrap();
        reg.provisioning.await.unwrap();
        (lc, factory)
    }

    fn pod_reader(verbs: &[&str]) -> ClusterRole {
        ClusterRole {
            name: "pod-reader".into(),
            rules: vec![PolicyRule {
                api_groups: vec!["".into()],
                resources: vec!["pods".into()],
                verbs: verbs.iter().map(|v| v.to_string()).collect(),
            }],
        }
    }

    #[tokio::test]
    async fn create_update_delete_custom_role() {
        let (lc, factory) = ready_cluster().await;
        let alice = UserProfile::new("alice");

        let names: Vec<String> = lc
            .list_cluster_roles(&alice, "prod")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(
            names,
            vec!["admin-cluster", "manage-namespace", "view-cluster", "view-namespace"]
        );

        lc.create_cluster_role(&alice, "prod", pod_reader(&["get"]))
            .await
            .unwrap();
        let err = lc
            .create_cluster_role(&alice, "prod", pod_reader(&["get"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Conflict(_)));

        let updated = lc
            .update_cluster_role(
                &alice,
                "prod",
                "pod-reader",
                UpdateClusterRoleRequest {
                    rules: pod_reader(&["get", "list"]).rules,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated, pod_reader(&["get", "list"]));
        assert_eq!(
            factory.state().cluster_roles.get("pod-reader"),
            Some(&pod_reader(&["get", "list"]))
        );

        lc.delete_cluster_role(&alice, "prod", "pod-reader")
            .await
            .unwrap();
        assert!(!factory.state().cluster_roles.contains_key("pod-reader"));
        let err = lc
            .delete_cluster_role(&alice, "prod", "pod-reader")
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NotFound(_)));
    }

    #[tokio::test]
    async fn builtin_and_invalid_roles_are_refused() {
        let (lc, _factory) = ready_cluster().await;
        let alice = UserProfile::new("alice");
        let err = lc
            .delete_cluster_role(&alice, "prod", "admin-cluster")
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Validation(_)));
        let err = lc
            .create_cluster_role(&alice, "prod", pod_reader(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Validation(_)));
        let err = lc
            .update_cluster_role(
                &alice,
                "prod",
                "never-created",
                UpdateClusterRoleRequest {
                    rules: pod_reader(&["get"]).rules,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NotFound(_)));
    }

    #[tokio::test]
    async fn role_changes_need_cluster_admin() {
        let (lc, factory) = ready_cluster().await;
        let bob = UserProfile::new("bob");
        let err = lc
            .create_cluster_role(&bob, "prod", pod_reader(&["get"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Forbidden(_)));
        let err = lc.list_cluster_roles(&bob, "prod").await.unwrap_err();
        assert!(matches!(err, ClusterError::Forbidden(_)));
        assert_eq!(factory.state().count("role-create:"), 0);
    }
}
