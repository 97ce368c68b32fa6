//! State store key layout.

/// Prefix for persisted `Cluster` records, keyed by cluster name.
pub const CLUSTER_PREFIX: &str = "/registry/clusters/";

/// Prefix for persisted `ClusterBinding` records, keyed by `<cluster>/<user>`.
pub const CLUSTER_BINDING_PREFIX: &str = "/registry/clusterbindings/";

/// Key of a single cluster record.
pub fn cluster_key(name: &str) -> String {
    format!("{}{}", CLUSTER_PREFIX, name)
}

/// Prefix covering every binding that belongs to one cluster.
pub fn cluster_bindings_prefix(cluster: &str) -> String {
    format!("{}{}/", CLUSTER_BINDING_PREFIX, cluster)
}

/// Key of the binding for one (cluster, user) pair.
pub fn cluster_binding_key(cluster: &str, user: &str) -> String {
    format!("{}{}/{}", CLUSTER_BINDING_PREFIX, cluster, user)
}
