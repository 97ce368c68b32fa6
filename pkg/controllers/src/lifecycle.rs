use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pkg_constants::cluster::{
    ADMIN_CLUSTER_ROLE, DEFAULT_DOWNSTREAM_TIMEOUT_SECS, DEFAULT_PREFLIGHT_LIMIT,
    DEFAULT_PROVISION_ATTEMPTS, DEFAULT_PROVISION_BACKOFF_MS, MAX_PROVISION_BACKOFF_MS,
    REQUIRED_CAPABILITIES,
};
use pkg_kube::{ClientFactory, ClusterClient};
use pkg_pki::key::ClusterKey;
use pkg_state::client::StateStore;
use pkg_state::repo;
use pkg_task::{RetryPolicy, TaskObserver, TaskOutcome, supervise};
use pkg_types::cluster::{
    Authentication, Cluster, ClusterPhase, ClusterStatus, ClusterView, CreateClusterRequest,
    SearchConditions,
};
use pkg_types::page::{Page, PageWindow};
use pkg_types::user::UserProfile;

use crate::error::ClusterError;
use crate::{access, issuer, preflight};

#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    /// Ceiling on concurrent preflight permission checks.
    pub preflight_limit: usize,
    /// Retry policy for background provisioning.
    pub provisioning: RetryPolicy,
    /// Bound on a downstream call made while the store's writer lock is held.
    pub downstream_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            preflight_limit: DEFAULT_PREFLIGHT_LIMIT,
            provisioning: RetryPolicy {
                max_attempts: DEFAULT_PROVISION_ATTEMPTS,
                initial_backoff: Duration::from_millis(DEFAULT_PROVISION_BACKOFF_MS),
                max_backoff: Duration::from_millis(MAX_PROVISION_BACKOFF_MS),
            },
            downstream_timeout: Duration::from_secs(DEFAULT_DOWNSTREAM_TIMEOUT_SECS),
        }
    }
}

/// A committed registration plus the handle of its provisioning task.
pub struct Registered {
    pub cluster: Cluster,
    pub provisioning: JoinHandle<TaskOutcome>,
}

/// Result of a deletion. The store side always succeeded when this is
/// returned; `cleanup_warning` is set if the downstream RBAC cleanup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deleted {
    pub name: String,
    pub bindings_removed: usize,
    pub cleanup_warning: Option<String>,
}

/// Owns the cluster onboarding state machine:
/// `Saved → Initializing → Completed | Failed`.
#[derive(Clone)]
pub struct ClusterLifecycle {
    pub(crate) store: StateStore,
    pub(crate) factory: Arc<dyn ClientFactory>,
    config: LifecycleConfig,
}

impl ClusterLifecycle {
    pub fn new(store: StateStore, factory: Arc<dyn ClientFactory>, config: LifecycleConfig) -> Self {
        Self {
            store,
            factory,
            config,
        }
    }

    pub(crate) async fn load(&self, name: &str) -> Result<Cluster, ClusterError> {
        repo::get_cluster(&self.store, name)
            .await
            .map_err(ClusterError::persistence)?
            .ok_or_else(|| ClusterError::NotFound(format!("cluster {}", name)))
    }

    pub(crate) fn client_for(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        self.factory
            .for_cluster(cluster)
            .map_err(ClusterError::connectivity)
    }

    /// Admit a new cluster.
    ///
    /// Everything up to the commit is synchronous: validation, connectivity,
    /// the capability preflight and the requester's admin binding. Any
    /// failure there leaves no trace in the store. After the commit a
    /// supervised task provisions default roles and the requester's
    /// credential; its progress is visible only through the stored phase.
    pub async fn register(
        &self,
        caller: &UserProfile,
        request: CreateClusterRequest,
        cancel: &CancellationToken,
    ) -> Result<Registered, ClusterError> {
        request
            .validate()
            .map_err(|e| ClusterError::Validation(format!("{:#}", e)))?;
        let name = request.name.clone();

        if repo::get_cluster(&self.store, &name)
            .await
            .map_err(ClusterError::persistence)?
            .is_some()
        {
            return Err(ClusterError::Conflict(format!("cluster {}", name)));
        }

        let key = ClusterKey::generate(&name)
            .map_err(|e| ClusterError::Upstream(format!("key generation failed: {:#}", e)))?;
        let mut cluster = Cluster {
            name: name.clone(),
            spec: request.spec,
            private_key: key.to_pem(),
            status: ClusterStatus::default(),
            created_by: caller.name.clone(),
            created_at: Utc::now(),
        };

        let client = self.client_for(&cluster)?;
        client.ping().await.map_err(ClusterError::connectivity)?;
        cluster.status.version = client.version().await.map_err(ClusterError::connectivity)?;
        if matches!(cluster.spec.authentication, Authentication::ConfigFile { .. }) {
            let config = client.config().await.map_err(ClusterError::connectivity)?;
            cluster.spec.connect.forward.api_server = config.host;
        }
        info!(
            "Cluster {} reachable at {} ({})",
            name,
            cluster.api_server(),
            cluster.status.version
        );

        match preflight::verify(
            client.clone(),
            REQUIRED_CAPABILITIES,
            self.config.preflight_limit,
            cancel,
        )
        .await
        {
            Ok(None) => {}
            Ok(Some(denied)) => return Err(ClusterError::Capability(denied)),
            Err(e) => return Err(ClusterError::connectivity(e)),
        }

        let mut tx = self.store.begin().await;
        if repo::get_cluster(&tx, &name)
            .await
            .map_err(ClusterError::persistence)?
            .is_some()
        {
            tx.rollback();
            return Err(ClusterError::Conflict(format!("cluster {}", name)));
        }
        repo::put_cluster(&mut tx, &cluster).map_err(ClusterError::persistence)?;
        // The writer lock is held across this call.
        let bound = tokio::time::timeout(
            self.config.downstream_timeout,
            client.create_or_update_cluster_role_binding(ADMIN_CLUSTER_ROLE, &caller.name, true),
        )
        .await;
        let failure = match bound {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(ClusterError::upstream(e)),
            Err(_) => Some(ClusterError::Connectivity(format!(
                "admin binding did not complete within {:?}",
                self.config.downstream_timeout
            ))),
        };
        if let Some(e) = failure {
            tx.rollback();
            warn!(
                "Registration of {} rolled back, admin binding failed: {}",
                name, e
            );
            return Err(e);
        }
        tx.commit().await.map_err(ClusterError::persistence)?;
        info!("Cluster {} registered by {}", name, caller.name);

        let provisioning = self.spawn_provisioning(cluster.clone(), client, caller.name.clone());
        Ok(Registered {
            cluster,
            provisioning,
        })
    }

    fn spawn_provisioning(
        &self,
        cluster: Cluster,
        client: Arc<dyn ClusterClient>,
        owner: String,
    ) -> JoinHandle<TaskOutcome> {
        let observer = Arc::new(ProvisioningObserver {
            store: self.store.clone(),
            cluster: cluster.name.clone(),
        });
        self.provision(cluster, client, owner, observer)
    }

    /// Default roles, then the owner's credential, under the retry policy.
    fn provision(
        &self,
        cluster: Cluster,
        client: Arc<dyn ClusterClient>,
        owner: String,
        observer: Arc<dyn TaskObserver>,
    ) -> JoinHandle<TaskOutcome> {
        let store = self.store.clone();
        supervise(
            format!("provision-{}", cluster.name),
            self.config.provisioning,
            observer,
            move || {
                let store = store.clone();
                let client = client.clone();
                let cluster = cluster.clone();
                let owner = owner.clone();
                async move {
                    client.create_default_cluster_roles().await?;
                    issuer::ensure_binding(
                        &store,
                        client.as_ref(),
                        &cluster,
                        &owner,
                        vec![ADMIN_CLUSTER_ROLE.to_string()],
                    )
                    .await?;
                    Ok(())
                }
            },
        )
    }

    async fn views(
        &self,
        caller: &UserProfile,
        clusters: &[Cluster],
    ) -> Result<Vec<ClusterView>, ClusterError> {
        let mut views = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let accessible = repo::get_binding(&self.store, &cluster.name, &caller.name)
                .await
                .map_err(ClusterError::persistence)?
                .is_some();
            views.push(ClusterView::from_cluster(cluster, accessible));
        }
        Ok(views)
    }

    /// Every cluster, flagged with whether `caller` holds a binding for it.
    pub async fn list(&self, caller: &UserProfile) -> Result<Vec<ClusterView>, ClusterError> {
        let clusters = repo::list_clusters(&self.store)
            .await
            .map_err(ClusterError::persistence)?;
        self.views(caller, &clusters).await
    }

    pub async fn get(&self, caller: &UserProfile, name: &str) -> Result<ClusterView, ClusterError> {
        let cluster = self.load(name).await?;
        let accessible = repo::get_binding(&self.store, name, &caller.name)
            .await
            .map_err(ClusterError::persistence)?
            .is_some();
        Ok(ClusterView::from_cluster(&cluster, accessible))
    }

    /// Clusters matching `conditions`, sliced to `window` when given.
    pub async fn search(
        &self,
        caller: &UserProfile,
        conditions: &SearchConditions,
        window: Option<PageWindow>,
    ) -> Result<Page<ClusterView>, ClusterError> {
        let matched: Vec<Cluster> = repo::list_clusters(&self.store)
            .await
            .map_err(ClusterError::persistence)?
            .into_iter()
            .filter(|cluster| conditions.matches(cluster))
            .collect();
        let page = match window {
            Some(window) => window.apply(matched),
            None => Page {
                total: matched.len(),
                items: matched,
            },
        };
        Ok(Page {
            items: self.views(caller, &page.items).await?,
            total: page.total,
        })
    }

    /// Remove a cluster and all of its bindings in one transaction, then
    /// clean fleetgate's RBAC objects off the downstream cluster. Only the
    /// cluster's admins may do this.
    pub async fn delete(&self, caller: &UserProfile, name: &str) -> Result<Deleted, ClusterError> {
        let mut tx = self.store.begin().await;
        let cluster = match repo::get_cluster(&tx, name)
            .await
            .map_err(ClusterError::persistence)?
        {
            Some(c) => c,
            None => {
                tx.rollback();
                return Err(ClusterError::NotFound(format!("cluster {}", name)));
            }
        };
        if let Err(e) = access::require_admin(&tx, caller, &cluster).await {
            tx.rollback();
            return Err(e);
        }
        let bindings = repo::list_bindings(&tx, name)
            .await
            .map_err(ClusterError::persistence)?;
        for binding in &bindings {
            repo::delete_binding(&mut tx, name, &binding.user_ref);
        }
        repo::delete_cluster(&mut tx, name);
        tx.commit().await.map_err(ClusterError::persistence)?;
        info!(
            "Cluster {} deleted with {} binding(s)",
            name,
            bindings.len()
        );

        let cleanup = match self.client_for(&cluster) {
            Ok(client) => client
                .clean_all_rbac_resource()
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let cleanup_warning = match cleanup {
            Ok(()) => None,
            Err(e) => {
                warn!("RBAC cleanup on deleted cluster {} failed: {}", name, e);
                Some(format!("downstream RBAC cleanup failed: {}", e))
            }
        };

        Ok(Deleted {
            name: name.to_string(),
            bindings_removed: bindings.len(),
            cleanup_warning,
        })
    }
}

/// Records provisioning progress as cluster phase transitions.
struct ProvisioningObserver {
    store: StateStore,
    cluster: String,
}

impl ProvisioningObserver {
    /// Move the stored cluster to `phase`. Backward moves are refused, and a
    /// cluster deleted meanwhile is not written back.
    async fn set_phase(&self, phase: ClusterPhase, message: String) {
        if let Err(e) = self.try_set_phase(phase, message).await {
            error!(
                "Failed to record phase {} for cluster {}: {:#}",
                phase, self.cluster, e
            );
        }
    }

    async fn try_set_phase(&self, phase: ClusterPhase, message: String) -> anyhow::Result<()> {
        let mut tx = self.store.begin().await;
        let Some(mut cluster) = repo::get_cluster(&tx, &self.cluster).await? else {
            tx.rollback();
            warn!(
                "Cluster {} was deleted during provisioning, dropping phase {}",
                self.cluster, phase
            );
            return Ok(());
        };
        let current = cluster.status.phase;
        if current != phase && !current.can_transition_to(phase) {
            tx.rollback();
            warn!(
                "Refusing phase change {} → {} for cluster {}",
                current, phase, self.cluster
            );
            return Ok(());
        }
        cluster.status.phase = phase;
        cluster.status.message = message;
        repo::put_cluster(&mut tx, &cluster)?;
        tx.commit().await?;
        if current != phase {
            info!("Cluster {} phase: {} → {}", self.cluster, current, phase);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskObserver for ProvisioningObserver {
    async fn on_start(&self) {
        self.set_phase(ClusterPhase::Initializing, String::new()).await;
    }

    async fn on_retry(&self, attempt: usize, error: &anyhow::Error, delay: Duration) {
        self.set_phase(
            ClusterPhase::Initializing,
            format!(
                "attempt {} failed, retrying in {}ms: {:#}",
                attempt,
                delay.as_millis(),
                error
            ),
        )
        .await;
    }

    async fn on_success(&self, _attempts: usize) {
        self.set_phase(ClusterPhase::Completed, String::new()).await;
    }

    async fn on_failure(&self, attempts: usize, error: &anyhow::Error) {
        let mut message = format!("provisioning failed after {} attempt(s): {:#}", attempts, error);
        if message.trim().is_empty() {
            message = "provisioning failed".to_string();
        }
        self.set_phase(ClusterPhase::Failed, message).await;
    }
}
