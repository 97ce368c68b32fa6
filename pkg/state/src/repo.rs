//! Typed access to cluster and binding records.

use pkg_constants::state::{
    CLUSTER_PREFIX, cluster_binding_key, cluster_bindings_prefix, cluster_key,
};
use pkg_types::cluster::{Cluster, ClusterBinding};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::client::KvRead;
use crate::txn::Transaction;

async fn get_json<T: DeserializeOwned>(r: &impl KvRead, key: &str) -> anyhow::Result<Option<T>> {
    match r.get(key).await? {
        Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
        None => Ok(None),
    }
}

async fn list_json<T: DeserializeOwned>(r: &impl KvRead, prefix: &str) -> anyhow::Result<Vec<T>> {
    let entries = r.list_prefix(prefix).await?;
    Ok(entries
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_slice(&value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Skipping undecodable record {}: {}", key, e);
                None
            }
        })
        .collect())
}

// ============================================================
// Clusters
// ============================================================

pub async fn get_cluster(r: &impl KvRead, name: &str) -> anyhow::Result<Option<Cluster>> {
    get_json(r, &cluster_key(name)).await
}

pub async fn list_clusters(r: &impl KvRead) -> anyhow::Result<Vec<Cluster>> {
    list_json(r, CLUSTER_PREFIX).await
}

pub fn put_cluster(tx: &mut Transaction, cluster: &Cluster) -> anyhow::Result<()> {
    tx.put(&cluster_key(&cluster.name), serde_json::to_vec(cluster)?);
    Ok(())
}

pub fn delete_cluster(tx: &mut Transaction, name: &str) {
    tx.delete(&cluster_key(name));
}

// ============================================================
// Cluster bindings
// ============================================================

pub async fn get_binding(
    r: &impl KvRead,
    cluster: &str,
    user: &str,
) -> anyhow::Result<Option<ClusterBinding>> {
    get_json(r, &cluster_binding_key(cluster, user)).await
}

pub async fn list_bindings(r: &impl KvRead, cluster: &str) -> anyhow::Result<Vec<ClusterBinding>> {
    list_json(r, &cluster_bindings_prefix(cluster)).await
}

pub fn put_binding(tx: &mut Transaction, binding: &ClusterBinding) -> anyhow::Result<()> {
    tx.put(
        &cluster_binding_key(&binding.cluster_ref, &binding.user_ref),
        serde_json::to_vec(binding)?,
    );
    Ok(())
}

pub fn delete_binding(tx: &mut Transaction, cluster: &str, user: &str) {
    tx.delete(&cluster_binding_key(cluster, user));
}
