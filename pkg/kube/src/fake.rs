//! In-memory [`ClusterClient`] for tests.

use async_trait::async_trait;
use rcgen::{CertificateParams, DnType, KeyPair};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pkg_types::cluster::Cluster;
use pkg_types::discovery::{ApiGroup, ApiResource};
use pkg_types::rbac::{ClusterRole, default_cluster_roles};

use crate::error::KubeError;
use crate::{ClientConfig, ClientFactory, ClusterClient, PermissionCheckResult, Result};

/// Behaviour knobs and call records shared by every fake client a
/// [`FakeClientFactory`] hands out.
#[derive(Debug, Default)]
pub struct FakeState {
    /// `(resource, verb)` pairs the control plane is denied.
    pub denied: HashSet<(String, String)>,
    /// Fail every access review with this message.
    pub permission_error: Option<String>,
    /// Fail `ping` with this message.
    pub ping_error: Option<String>,
    pub version: String,
    /// Endpoint reported by `config`, for kubeconfig-registered clusters.
    pub endpoint: Option<String>,
    /// Refuse to build clients at all.
    pub factory_error: Option<String>,

    /// Remaining failures to inject, per operation.
    pub fail_default_roles: usize,
    pub fail_binding: usize,
    pub fail_namespace_binding: usize,
    pub fail_issue: usize,
    pub fail_cleanup: bool,
    pub fail_unbind: bool,
    /// Hold each cluster role binding call this long before answering.
    pub bind_delay: Option<Duration>,
    /// Make access reviews panic instead of answering.
    pub panic_checks: bool,

    pub namespaced: HashSet<String>,
    pub all_namespace_users: HashSet<String>,
    pub user_namespaces: BTreeMap<String, Vec<String>>,
    /// Delay each access review by this long.
    pub check_delay: Option<Duration>,

    /// Every call, as `"<op>:<arg>"`.
    pub calls: Vec<String>,
    /// `(role, user, cluster_scoped)` for each binding created.
    pub role_bindings: Vec<(String, String, bool)>,
    /// `(namespace, role, user)` for each namespaced binding created.
    pub namespace_bindings: Vec<(String, String, String)>,
    pub cluster_roles: BTreeMap<String, ClusterRole>,
    pub namespaces: Vec<String>,
    pub in_flight_checks: usize,
    pub peak_checks: usize,
}

impl FakeState {
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

fn status(code: u16, op: &str, body: &str) -> KubeError {
    KubeError::Status {
        method: "POST".into(),
        path: format!("/fake/{}", op),
        code,
        body: body.to_string(),
    }
}

fn injected(op: &str) -> KubeError {
    KubeError::Status {
        method: "POST".into(),
        path: format!("/fake/{}", op),
        code: 500,
        body: format!("injected {} failure", op),
    }
}

/// Consume one injected failure, if any remain.
fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

pub struct FakeClusterClient {
    state: Arc<Mutex<FakeState>>,
    host: String,
    private_key: String,
}

impl FakeClusterClient {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: String) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    /// Certificate for `username` over the cluster's key, so it pairs with
    /// the key in a client identity.
    fn sign(&self, username: &str) -> Result<String> {
        let key = KeyPair::from_pem(&self.private_key).map_err(|e| KubeError::Pki(e.to_string()))?;
        let mut params =
            CertificateParams::new(Vec::<String>::new()).map_err(|e| KubeError::Pki(e.to_string()))?;
        params.distinguished_name.push(DnType::CommonName, username);
        let cert = params
            .self_signed(&key)
            .map_err(|e| KubeError::Pki(e.to_string()))?;
        Ok(cert.pem())
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn ping(&self) -> Result<()> {
        match self.record("ping:".into()).ping_error.clone() {
            Some(msg) => Err(KubeError::Timeout(msg)),
            None => Ok(()),
        }
    }

    async fn version(&self) -> Result<String> {
        let state = self.record("version:".into());
        if state.version.is_empty() {
            Ok("v1.30.0".into())
        } else {
            Ok(state.version.clone())
        }
    }

    async fn config(&self) -> Result<ClientConfig> {
        let state = self.record("config:".into());
        Ok(ClientConfig {
            host: state.endpoint.clone().unwrap_or_else(|| self.host.clone()),
        })
    }

    async fn create_or_update_cluster_role_binding(
        &self,
        role: &str,
        user: &str,
        cluster_scoped: bool,
    ) -> Result<()> {
        let delay = {
            let mut state = self.record(format!("bind:{}/{}", role, user));
            if take_failure(&mut state.fail_binding) {
                return Err(injected("bind"));
            }
            state.bind_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state()
            .role_bindings
            .push((role.to_string(), user.to_string(), cluster_scoped));
        Ok(())
    }

    async fn create_or_update_role_binding(
        &self,
        namespace: &str,
        role: &str,
        user: &str,
    ) -> Result<()> {
        let mut state = self.record(format!("bind-ns:{}/{}/{}", namespace, role, user));
        if take_failure(&mut state.fail_namespace_binding) {
            return Err(injected("bind"));
        }
        let entry = (namespace.to_string(), role.to_string(), user.to_string());
        if !state.namespace_bindings.contains(&entry) {
            state.namespace_bindings.push(entry);
        }
        let namespaces = state.user_namespaces.entry(user.to_string()).or_default();
        if !namespaces.iter().any(|ns| ns == namespace) {
            namespaces.push(namespace.to_string());
            namespaces.sort();
        }
        Ok(())
    }

    async fn remove_user_role_bindings(&self, user: &str) -> Result<usize> {
        let mut state = self.record(format!("unbind:{}", user));
        if state.fail_unbind {
            return Err(injected("unbind"));
        }
        let before = state.role_bindings.len() + state.namespace_bindings.len();
        state.role_bindings.retain(|(_, u, _)| u != user);
        state.namespace_bindings.retain(|(_, _, u)| u != user);
        state.user_namespaces.remove(user);
        Ok(before - state.role_bindings.len() - state.namespace_bindings.len())
    }

    async fn create_default_cluster_roles(&self) -> Result<()> {
        let mut state = self.record("default-roles:".into());
        if take_failure(&mut state.fail_default_roles) {
            return Err(injected("default-roles"));
        }
        for role in default_cluster_roles() {
            state.cluster_roles.insert(role.name.clone(), role);
        }
        Ok(())
    }

    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>> {
        Ok(self
            .record("roles:".into())
            .cluster_roles
            .values()
            .cloned()
            .collect())
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<()> {
        let mut state = self.record(format!("role-create:{}", role.name));
        if state.cluster_roles.contains_key(&role.name) {
            return Err(status(409, "clusterroles", "AlreadyExists"));
        }
        state.cluster_roles.insert(role.name.clone(), role.clone());
        Ok(())
    }

    async fn update_cluster_role(&self, role: &ClusterRole) -> Result<()> {
        let mut state = self.record(format!("role-update:{}", role.name));
        match state.cluster_roles.get_mut(&role.name) {
            Some(existing) => {
                *existing = role.clone();
                Ok(())
            }
            None => Err(status(404, "clusterroles", "NotFound")),
        }
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<()> {
        self.record(format!("role-delete:{}", name))
            .cluster_roles
            .remove(name);
        Ok(())
    }

    async fn list_api_groups(&self) -> Result<Vec<ApiGroup>> {
        self.record("groups:".into());
        Ok(vec![
            ApiGroup {
                name: String::new(),
                versions: vec!["v1".into()],
                preferred_version: "v1".into(),
            },
            ApiGroup {
                name: "apps".into(),
                versions: vec!["apps/v1".into()],
                preferred_version: "apps/v1".into(),
            },
        ])
    }

    async fn list_group_resources(&self, group_version: &str) -> Result<Vec<ApiResource>> {
        let state = self.record(format!("resources:{}", group_version));
        if group_version != "v1" {
            return Err(status(404, "discovery", "NotFound"));
        }
        let mut names: Vec<&String> = state.namespaced.iter().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| ApiResource {
                name: name.clone(),
                kind: String::new(),
                namespaced: true,
                verbs: vec!["get".into(), "list".into()],
            })
            .collect())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let mut namespaces = self.record("namespaces:".into()).namespaces.clone();
        namespaces.sort();
        Ok(namespaces)
    }

    async fn create_common_user(&self, username: &str) -> Result<String> {
        {
            let mut state = self.record(format!("issue:{}", username));
            if take_failure(&mut state.fail_issue) {
                return Err(injected("issue"));
            }
        }
        self.sign(username)
    }

    async fn has_permission(&self, resource: &str, verb: &str) -> Result<PermissionCheckResult> {
        let delay = {
            let mut state = self.record(format!("check:{}-{}", resource, verb));
            if let Some(msg) = state.permission_error.clone() {
                return Err(KubeError::Timeout(msg));
            }
            if state.panic_checks {
                drop(state);
                panic!("access review for {}-{} blew up", resource, verb);
            }
            state.in_flight_checks += 1;
            state.peak_checks = state.peak_checks.max(state.in_flight_checks);
            state.check_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.in_flight_checks -= 1;
        let allowed = !state
            .denied
            .contains(&(resource.to_string(), verb.to_string()));
        Ok(PermissionCheckResult {
            resource: resource.to_string(),
            verb: verb.to_string(),
            allowed,
        })
    }

    async fn is_namespaced_resource(&self, resource: &str) -> Result<bool> {
        Ok(self
            .record(format!("scope:{}", resource))
            .namespaced
            .contains(resource))
    }

    async fn can_visit_all_namespace(&self, user: &str) -> Result<bool> {
        Ok(self
            .record(format!("all-ns:{}", user))
            .all_namespace_users
            .contains(user))
    }

    async fn get_user_namespace_names(&self, user: &str) -> Result<Vec<String>> {
        Ok(self
            .record(format!("user-ns:{}", user))
            .user_namespaces
            .get(user)
            .cloned()
            .unwrap_or_default())
    }

    async fn clean_all_rbac_resource(&self) -> Result<()> {
        let mut state = self.record("cleanup:".into());
        if state.fail_cleanup {
            return Err(injected("cleanup"));
        }
        state.role_bindings.clear();
        state.namespace_bindings.clear();
        state.user_namespaces.clear();
        state.cluster_roles.clear();
        Ok(())
    }
}

/// Hands out [`FakeClusterClient`]s that share one [`FakeState`].
#[derive(Clone, Default)]
pub struct FakeClientFactory {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ClientFactory for FakeClientFactory {
    fn for_cluster(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterClient>> {
        if let Some(msg) = self.state().factory_error.clone() {
            return Err(KubeError::Config(msg));
        }
        Ok(Arc::new(FakeClusterClient {
            state: self.state.clone(),
            host: cluster.api_server().to_string(),
            private_key: cluster.private_key.clone(),
        }))
    }
}
