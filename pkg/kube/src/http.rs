use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use pkg_constants::cluster::{CSR_POLL_ATTEMPTS, CSR_POLL_INTERVAL_MS};
use pkg_pki::key::ClusterKey;
use pkg_types::cluster::Cluster;
use pkg_types::discovery::{ApiGroup, ApiResource};
use pkg_types::rbac::{ClusterRole, default_cluster_roles};

use crate::error::KubeError;
use crate::manifests;
use crate::transport::{Transport, admin_transport};
use crate::{ClientConfig, ClientFactory, ClusterClient, PermissionCheckResult, Result};

const RBAC_API: &str = "/apis/rbac.authorization.k8s.io/v1";
const CSR_API: &str = "/apis/certificates.k8s.io/v1/certificatesigningrequests";
const AUTHZ_API: &str = "/apis/authorization.k8s.io/v1";

/// [`ClusterClient`] speaking plain HTTP to a Kubernetes API server.
pub struct HttpClusterClient {
    cluster: String,
    transport: Transport,
    /// The cluster's own private key, used to sign user CSRs.
    private_key: String,
}

impl HttpClusterClient {
    pub fn new(cluster: impl Into<String>, transport: Transport, private_key: String) -> Self {
        Self {
            cluster: cluster.into(),
            transport,
            private_key,
        }
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{}", self.transport.base, path);
        let mut req = self.transport.client.request(method.clone(), &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(KubeError::Status {
                method: method.to_string(),
                path: path.to_string(),
                code: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| KubeError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.send(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// DELETE that treats an already-missing object as success.
    async fn delete(&self, path: &str) -> Result<()> {
        match self.send(Method::DELETE, path, None).await {
            Ok(_) => Ok(()),
            Err(e) if e.status_code() == Some(StatusCode::NOT_FOUND.as_u16()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// PUT `body` at `collection/name`, creating it with POST if it does
    /// not exist yet.
    async fn upsert(&self, collection: &str, name: &str, body: &Value) -> Result<()> {
        let item = format!("{}/{}", collection, name);
        match self.send(Method::PUT, &item, Some(body)).await {
            Ok(_) => Ok(()),
            Err(e) if e.status_code() == Some(StatusCode::NOT_FOUND.as_u16()) => {
                self.post(collection, body).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    async fn access_review(&self, path: &str, body: &Value) -> Result<bool> {
        let resp = self.post(path, body).await?;
        resp.pointer("/status/allowed")
            .and_then(Value::as_bool)
            .ok_or_else(|| KubeError::Decode {
                path: path.to_string(),
                message: "missing status.allowed".into(),
            })
    }

    /// Look `resource` up in one discovery document.
    async fn discover(&self, path: &str, resource: &str) -> Result<Option<bool>> {
        let doc = self.get(path).await?;
        let found = doc
            .get("resources")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|r| r.get("name").and_then(Value::as_str) == Some(resource))
            .map(|r| r.get("namespaced").and_then(Value::as_bool).unwrap_or(false));
        Ok(found)
    }

    async fn list_managed(&self, path: &str) -> Result<Vec<Value>> {
        let url = format!("{}?labelSelector={}", path, manifests::managed_selector());
        Ok(Self::items(self.get(&url).await?))
    }

    fn items(list: Value) -> Vec<Value> {
        match list {
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    async fn wait_for_certificate(&self, csr_path: &str) -> Result<String> {
        for _ in 0..CSR_POLL_ATTEMPTS {
            let csr = self.get(csr_path).await?;
            if let Some(encoded) = csr.pointer("/status/certificate").and_then(Value::as_str) {
                if !encoded.is_empty() {
                    let bytes = STANDARD.decode(encoded).map_err(|e| KubeError::Decode {
                        path: csr_path.to_string(),
                        message: format!("certificate is not base64: {}", e),
                    })?;
                    return String::from_utf8(bytes).map_err(|e| KubeError::Decode {
                        path: csr_path.to_string(),
                        message: e.to_string(),
                    });
                }
            }
            tokio::time::sleep(Duration::from_millis(CSR_POLL_INTERVAL_MS)).await;
        }
        Err(KubeError::Timeout(format!("certificate on {}", csr_path)))
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn ping(&self) -> Result<()> {
        self.get("/version").await.map(|_| ())
    }

    async fn version(&self) -> Result<String> {
        let v = self.get("/version").await?;
        v.get("gitVersion")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| KubeError::Decode {
                path: "/version".into(),
                message: "missing gitVersion".into(),
            })
    }

    async fn config(&self) -> Result<ClientConfig> {
        Ok(ClientConfig {
            host: self.transport.base.clone(),
        })
    }

    async fn create_or_update_cluster_role_binding(
        &self,
        role: &str,
        user: &str,
        cluster_scoped: bool,
    ) -> Result<()> {
        let body = manifests::cluster_role_binding(role, user, cluster_scoped);
        let name = manifests::cluster_role_binding_name(role, user);
        self.upsert(&format!("{}/clusterrolebindings", RBAC_API), &name, &body)
            .await?;
        info!(
            "Bound cluster role {} to {} on cluster {}",
            role, user, self.cluster
        );
        Ok(())
    }

    async fn create_or_update_role_binding(
        &self,
        namespace: &str,
        role: &str,
        user: &str,
    ) -> Result<()> {
        let body = manifests::role_binding(namespace, role, user);
        let name = manifests::cluster_role_binding_name(role, user);
        let collection = format!("{}/namespaces/{}/rolebindings", RBAC_API, namespace);
        self.upsert(&collection, &name, &body).await?;
        info!(
            "Bound role {} to {} in namespace {} on cluster {}",
            role, user, namespace, self.cluster
        );
        Ok(())
    }

    async fn remove_user_role_bindings(&self, user: &str) -> Result<usize> {
        let mut removed = 0;
        for binding in self.list_managed(&format!("{}/rolebindings", RBAC_API)).await? {
            if !manifests::binds_user(&binding, user) {
                continue;
            }
            let ns = binding.pointer("/metadata/namespace").and_then(Value::as_str);
            let name = binding.pointer("/metadata/name").and_then(Value::as_str);
            if let (Some(ns), Some(name)) = (ns, name) {
                self.delete(&format!("{}/namespaces/{}/rolebindings/{}", RBAC_API, ns, name))
                    .await?;
                removed += 1;
            }
        }
        let collection = format!("{}/clusterrolebindings", RBAC_API);
        for binding in self.list_managed(&collection).await? {
            if !manifests::binds_user(&binding, user) {
                continue;
            }
            if let Some(name) = binding.pointer("/metadata/name").and_then(Value::as_str) {
                self.delete(&format!("{}/{}", collection, name)).await?;
                removed += 1;
            }
        }
        info!(
            "Removed {} role binding(s) of {} on cluster {}",
            removed, user, self.cluster
        );
        Ok(removed)
    }

    async fn create_default_cluster_roles(&self) -> Result<()> {
        let collection = format!("{}/clusterroles", RBAC_API);
        for role in default_cluster_roles() {
            self.upsert(&collection, &role.name, &manifests::cluster_role(&role))
                .await?;
            debug!("Ensured cluster role {} on {}", role.name, self.cluster);
        }
        Ok(())
    }

    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>> {
        let items = self.list_managed(&format!("{}/clusterroles", RBAC_API)).await?;
        let mut roles: Vec<ClusterRole> = items.iter().filter_map(manifests::parse_cluster_role).collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<()> {
        self.post(&format!("{}/clusterroles", RBAC_API), &manifests::cluster_role(role))
            .await?;
        info!("Created cluster role {} on {}", role.name, self.cluster);
        Ok(())
    }

    async fn update_cluster_role(&self, role: &ClusterRole) -> Result<()> {
        let path = format!("{}/clusterroles/{}", RBAC_API, role.name);
        self.send(Method::PUT, &path, Some(&manifests::cluster_role(role)))
            .await?;
        info!("Updated cluster role {} on {}", role.name, self.cluster);
        Ok(())
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<()> {
        self.delete(&format!("{}/clusterroles/{}", RBAC_API, name))
            .await?;
        info!("Deleted cluster role {} on {}", name, self.cluster);
        Ok(())
    }

    async fn list_api_groups(&self) -> Result<Vec<ApiGroup>> {
        let core = self.get("/api").await?;
        let core_versions: Vec<String> = core
            .get("versions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        let mut groups = Vec::new();
        if let Some(preferred) = core_versions.first().cloned() {
            groups.push(ApiGroup {
                name: String::new(),
                versions: core_versions,
                preferred_version: preferred,
            });
        }

        let named = self.get("/apis").await?;
        for group in named
            .get("groups")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(name) = group.get("name").and_then(Value::as_str) else {
                continue;
            };
            let versions: Vec<String> = group
                .get("versions")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|v| v.get("groupVersion").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            let preferred_version = group
                .pointer("/preferredVersion/groupVersion")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| versions.first().cloned())
                .unwrap_or_default();
            groups.push(ApiGroup {
                name: name.to_string(),
                versions,
                preferred_version,
            });
        }
        Ok(groups)
    }

    async fn list_group_resources(&self, group_version: &str) -> Result<Vec<ApiResource>> {
        let path = if group_version.contains('/') {
            format!("/apis/{}", group_version)
        } else {
            format!("/api/{}", group_version)
        };
        let doc = self.get(&path).await?;
        let resources = doc
            .get("resources")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|r| serde_json::from_value::<ApiResource>(r.clone()).ok())
            // subresources such as pods/log
            .filter(|r| !r.name.contains('/'))
            .collect();
        Ok(resources)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let list = self.get("/api/v1/namespaces").await?;
        let names: BTreeSet<String> = Self::items(list)
            .iter()
            .filter_map(|ns| ns.pointer("/metadata/name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn create_common_user(&self, username: &str) -> Result<String> {
        let key =
            ClusterKey::from_pem(&self.private_key).map_err(|e| KubeError::Pki(format!("{:#}", e)))?;
        let csr_pem = key
            .user_csr(username)
            .map_err(|e| KubeError::Pki(format!("{:#}", e)))?;

        let simple = uuid::Uuid::new_v4().simple().to_string();
        let name = manifests::sanitize_name(&format!("fleetgate-{}-{}", username, &simple[..8]));
        let body = manifests::certificate_signing_request(&name, &STANDARD.encode(csr_pem));
        self.post(CSR_API, &body).await?;
        let csr_path = format!("{}/{}", CSR_API, name);

        let result = async {
            let mut csr = self.get(&csr_path).await?;
            let status = csr
                .as_object_mut()
                .ok_or_else(|| KubeError::Decode {
                    path: csr_path.clone(),
                    message: "CSR is not an object".into(),
                })?
                .entry("status")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(status) = status.as_object_mut() {
                let conditions = status
                    .entry("conditions")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Some(list) = conditions.as_array_mut() {
                    list.push(manifests::approve_condition());
                }
            }
            self.send(Method::PUT, &format!("{}/approval", csr_path), Some(&csr))
                .await?;
            self.wait_for_certificate(&csr_path).await
        }
        .await;

        if let Err(e) = self.delete(&csr_path).await {
            warn!("Failed to delete CSR {} on {}: {}", name, self.cluster, e);
        }
        let cert = result?;
        info!("Issued client certificate for {} on {}", username, self.cluster);
        Ok(cert)
    }

    async fn has_permission(&self, resource: &str, verb: &str) -> Result<PermissionCheckResult> {
        let body = manifests::self_subject_access_review(resource, verb);
        let allowed = self
            .access_review(&format!("{}/selfsubjectaccessreviews", AUTHZ_API), &body)
            .await?;
        Ok(PermissionCheckResult {
            resource: resource.to_string(),
            verb: verb.to_string(),
            allowed,
        })
    }

    async fn is_namespaced_resource(&self, resource: &str) -> Result<bool> {
        if let Some(namespaced) = self.discover("/api/v1", resource).await? {
            return Ok(namespaced);
        }
        let groups = self.get("/apis").await?;
        let versions: Vec<String> = groups
            .get("groups")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|g| g.pointer("/preferredVersion/groupVersion"))
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        for gv in versions {
            if let Some(namespaced) = self.discover(&format!("/apis/{}", gv), resource).await? {
                return Ok(namespaced);
            }
        }
        debug!("Resource {} not served by {}", resource, self.cluster);
        Ok(false)
    }

    async fn can_visit_all_namespace(&self, user: &str) -> Result<bool> {
        let body = manifests::subject_access_review(user, "namespaces", "list");
        self.access_review(&format!("{}/subjectaccessreviews", AUTHZ_API), &body)
            .await
    }

    async fn get_user_namespace_names(&self, user: &str) -> Result<Vec<String>> {
        let bindings = self.list_managed(&format!("{}/rolebindings", RBAC_API)).await?;
        let namespaces: BTreeSet<String> = bindings
            .iter()
            .filter(|b| manifests::binds_user(b, user))
            .filter_map(|b| b.pointer("/metadata/namespace").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(namespaces.into_iter().collect())
    }

    async fn clean_all_rbac_resource(&self) -> Result<()> {
        for binding in self.list_managed(&format!("{}/rolebindings", RBAC_API)).await? {
            let ns = binding.pointer("/metadata/namespace").and_then(Value::as_str);
            let name = binding.pointer("/metadata/name").and_then(Value::as_str);
            if let (Some(ns), Some(name)) = (ns, name) {
                self.delete(&format!("{}/namespaces/{}/rolebindings/{}", RBAC_API, ns, name))
                    .await?;
            }
        }
        for kind in ["clusterrolebindings", "clusterroles"] {
            let collection = format!("{}/{}", RBAC_API, kind);
            for item in self.list_managed(&collection).await? {
                if let Some(name) = item.pointer("/metadata/name").and_then(Value::as_str) {
                    self.delete(&format!("{}/{}", collection, name)).await?;
                }
            }
        }
        info!("Removed fleetgate RBAC objects from {}", self.cluster);
        Ok(())
    }
}

/// Builds [`HttpClusterClient`]s over the cluster's admin credentials.
pub struct HttpClientFactory {
    pub connect_timeout: Duration,
}

impl ClientFactory for HttpClientFactory {
    fn for_cluster(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterClient>> {
        let transport = admin_transport(cluster, self.connect_timeout)?;
        Ok(Arc::new(HttpClusterClient::new(
            cluster.name.clone(),
            transport,
            cluster.private_key.clone(),
        )))
    }
}
