//! Capability interface to a managed cluster's API server.
//!
//! Everything fleetgate needs from a downstream cluster goes through
//! [`ClusterClient`]. Controllers and the gateway obtain clients from a
//! [`ClientFactory`], which is the seam tests replace with
//! [`fake::FakeClusterClient`].

pub mod error;
pub mod http;
pub mod kubeconfig;
pub mod manifests;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

use async_trait::async_trait;
use pkg_types::cluster::Cluster;
use pkg_types::discovery::{ApiGroup, ApiResource};
use pkg_types::rbac::ClusterRole;
use std::sync::Arc;

pub use error::KubeError;

pub type Result<T, E = KubeError> = std::result::Result<T, E>;

/// Outcome of a single access review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheckResult {
    pub resource: String,
    pub verb: String,
    pub allowed: bool,
}

impl PermissionCheckResult {
    /// `"<resource>-<verb>"`, the identifier reported for a missing capability.
    pub fn identifier(&self) -> String {
        format!("{}-{}", self.resource, self.verb)
    }
}

/// Connection details the client resolved for its cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the API server.
    pub host: String,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Reachability check.
    async fn ping(&self) -> Result<()>;

    /// Server git version, e.g. `v1.30.2`.
    async fn version(&self) -> Result<String>;

    /// Connection details, including the endpoint taken from a kubeconfig.
    async fn config(&self) -> Result<ClientConfig>;

    /// Bind `role` to `user` cluster-wide, replacing an existing binding of
    /// the same name. `cluster_scoped` is recorded on the binding so cleanup
    /// and membership views can tell cluster grants from namespace grants.
    async fn create_or_update_cluster_role_binding(
        &self,
        role: &str,
        user: &str,
        cluster_scoped: bool,
    ) -> Result<()>;

    /// Bind cluster role `role` to `user` inside `namespace` only.
    async fn create_or_update_role_binding(
        &self,
        namespace: &str,
        role: &str,
        user: &str,
    ) -> Result<()>;

    /// Delete every fleetgate-managed role binding, cluster-wide or
    /// namespaced, whose subject is `user`. Returns how many were removed.
    async fn remove_user_role_bindings(&self, user: &str) -> Result<usize>;

    /// Create or refresh fleetgate's built-in cluster roles.
    async fn create_default_cluster_roles(&self) -> Result<()>;

    /// Cluster roles carrying fleetgate's managed-by label.
    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>>;

    /// Create a managed cluster role. An existing role of that name is a
    /// `409` status error.
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<()>;

    /// Replace the rules of an existing cluster role. A missing role is a
    /// `404` status error.
    async fn update_cluster_role(&self, role: &ClusterRole) -> Result<()>;

    /// Delete a cluster role; a missing one is not an error.
    async fn delete_cluster_role(&self, name: &str) -> Result<()>;

    /// API groups the cluster serves, core group first.
    async fn list_api_groups(&self) -> Result<Vec<ApiGroup>>;

    /// Resources served under `group_version` (`v1`, `apps/v1`, ...).
    async fn list_group_resources(&self, group_version: &str) -> Result<Vec<ApiResource>>;

    /// Names of every namespace on the cluster, sorted.
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Have the cluster sign a client certificate for `username` over a CSR
    /// made with the cluster's private key. Returns the certificate PEM.
    async fn create_common_user(&self, username: &str) -> Result<String>;

    /// Whether the control plane's own identity may `verb` on `resource`.
    async fn has_permission(&self, resource: &str, verb: &str) -> Result<PermissionCheckResult>;

    /// Whether `resource` (plural name, e.g. `pods`) is namespace-scoped.
    async fn is_namespaced_resource(&self, resource: &str) -> Result<bool>;

    /// Whether `user` can see every namespace.
    async fn can_visit_all_namespace(&self, user: &str) -> Result<bool>;

    /// Namespaces in which `user` holds a fleetgate-managed role binding.
    async fn get_user_namespace_names(&self, user: &str) -> Result<Vec<String>>;

    /// Remove every RBAC object fleetgate created on the cluster.
    async fn clean_all_rbac_resource(&self) -> Result<()>;
}

/// Builds a client for a given cluster record.
pub trait ClientFactory: Send + Sync {
    fn for_cluster(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterClient>>;
}
