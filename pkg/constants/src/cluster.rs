//! Cluster onboarding and RBAC constants.

/// Capabilities the control plane must hold on every cluster it manages,
/// as `(resource, verbs)` pairs. Checked by the admission preflight.
pub const REQUIRED_CAPABILITIES: &[(&str, &[&str])] = &[
    ("namespaces", &["get", "create", "delete"]),
    ("clusterroles", &["get", "create", "delete"]),
    ("clusterrolebindings", &["get", "create", "delete"]),
    ("roles", &["get", "create", "delete"]),
    ("rolebindings", &["get", "create", "delete"]),
];

/// Cluster role granted to the user who registers a cluster.
pub const ADMIN_CLUSTER_ROLE: &str = "admin-cluster";

/// Read-only cluster role provisioned on every managed cluster.
pub const VIEW_CLUSTER_ROLE: &str = "view-cluster";

/// Namespace-level management role provisioned on every managed cluster.
pub const MANAGE_NAMESPACE_ROLE: &str = "manage-namespace";

/// Namespace-level read-only role provisioned on every managed cluster.
pub const VIEW_NAMESPACE_ROLE: &str = "view-namespace";

/// Label stamped on every RBAC object fleetgate creates downstream.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "fleetgate";

/// Label recording whether a role binding grants cluster-wide access.
pub const SCOPE_LABEL: &str = "fleetgate.io/scope";

/// Signer used for user client certificates.
pub const CLIENT_SIGNER_NAME: &str = "kubernetes.io/kube-apiserver-client";

/// How many times to poll a CSR for its issued certificate.
pub const CSR_POLL_ATTEMPTS: u32 = 20;

/// Delay between CSR polls, in milliseconds.
pub const CSR_POLL_INTERVAL_MS: u64 = 500;

/// Default ceiling on concurrent preflight permission checks.
pub const DEFAULT_PREFLIGHT_LIMIT: usize = 8;

/// Default number of attempts for background provisioning.
pub const DEFAULT_PROVISION_ATTEMPTS: usize = 3;

/// Default initial backoff between provisioning attempts, in milliseconds.
pub const DEFAULT_PROVISION_BACKOFF_MS: u64 = 500;

/// Upper bound on a single provisioning backoff, in milliseconds.
pub const MAX_PROVISION_BACKOFF_MS: u64 = 10_000;

/// Default bound, in seconds, on a downstream call made while the store's
/// writer lock is held.
pub const DEFAULT_DOWNSTREAM_TIMEOUT_SECS: u64 = 30;
