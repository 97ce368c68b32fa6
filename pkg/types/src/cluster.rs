use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::member::NamespaceGrant;
use crate::validate::{validate_endpoint, validate_name};

// --- Connection spec ---

/// How the control plane authenticates against a managed cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Authentication {
    /// Static bearer token.
    Bearer { token: String },
    /// Client certificate and key, both PEM.
    Certificate { cert_data: String, key_data: String },
    /// A full kubeconfig document. The live endpoint is read from it at
    /// registration time.
    ConfigFile { config_file_content: String },
}

impl Authentication {
    pub fn mode(&self) -> &'static str {
        match self {
            Authentication::Bearer { .. } => "bearer",
            Authentication::Certificate { .. } => "certificate",
            Authentication::ConfigFile { .. } => "configFile",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardSpec {
    /// Base URL of the downstream API server, e.g. `https://10.0.0.1:6443`.
    #[serde(default)]
    pub api_server: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectSpec {
    #[serde(default)]
    pub forward: ForwardSpec,
    /// Skip server certificate validation on the control plane's own
    /// admin transport.
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub connect: ConnectSpec,
    pub authentication: Authentication,
    /// PEM bundle of the downstream API server's CA.
    #[serde(default)]
    pub ca_data: Option<String>,
}

// --- Lifecycle ---

/// Onboarding phase of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterPhase {
    Saved,
    Initializing,
    Completed,
    Failed,
}

impl ClusterPhase {
    /// Phases only move forward: `Saved → Initializing → Completed | Failed`.
    pub fn can_transition_to(self, next: ClusterPhase) -> bool {
        matches!(
            (self, next),
            (ClusterPhase::Saved, ClusterPhase::Initializing)
                | (ClusterPhase::Initializing, ClusterPhase::Completed)
                | (ClusterPhase::Initializing, ClusterPhase::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ClusterPhase::Completed | ClusterPhase::Failed)
    }
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Saved => write!(f, "Saved"),
            ClusterPhase::Initializing => write!(f, "Initializing"),
            ClusterPhase::Completed => write!(f, "Completed"),
            ClusterPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub phase: ClusterPhase,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub message: String,
}

impl Default for ClusterStatus {
    fn default() -> Self {
        Self {
            phase: ClusterPhase::Saved,
            version: String::new(),
            message: String::new(),
        }
    }
}

// --- Persisted Cluster object ---

/// A registered downstream cluster, as stored.
///
/// Holds the cluster-scoped private key that every user certificate for this
/// cluster is requested with. Never returned to API callers; see
/// [`ClusterView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    pub spec: ClusterSpec,
    /// PKCS#8 PEM.
    pub private_key: String,
    #[serde(default)]
    pub status: ClusterStatus,
    #[serde(default)]
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Cluster {
    pub fn api_server(&self) -> &str {
        &self.spec.connect.forward.api_server
    }
}

// --- Registration messages ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterRequest {
    pub name: String,
    pub spec: ClusterSpec,
}

impl CreateClusterRequest {
    /// Structural validation, run before any network call.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_name(&self.name)?;
        match &self.spec.authentication {
            Authentication::Bearer { token } => {
                if token.trim().is_empty() {
                    anyhow::bail!("bearer authentication requires a token");
                }
                validate_endpoint(&self.spec.connect.forward.api_server)?;
            }
            Authentication::Certificate {
                cert_data,
                key_data,
            } => {
                if cert_data.trim().is_empty() || key_data.trim().is_empty() {
                    anyhow::bail!("certificate authentication requires certData and keyData");
                }
                validate_endpoint(&self.spec.connect.forward.api_server)?;
            }
            Authentication::ConfigFile {
                config_file_content,
            } => {
                if config_file_content.trim().is_empty() {
                    anyhow::bail!("configFile authentication requires configFileContent");
                }
            }
        }
        Ok(())
    }
}

/// API representation of a cluster. Credentials and key material are left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterView {
    pub name: String,
    pub api_server: String,
    pub authentication_mode: String,
    pub status: ClusterStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Whether the caller holds a binding for this cluster.
    #[serde(default)]
    pub accessible: bool,
}

impl ClusterView {
    pub fn from_cluster(cluster: &Cluster, accessible: bool) -> Self {
        Self {
            name: cluster.name.clone(),
            api_server: cluster.api_server().to_string(),
            authentication_mode: cluster.spec.authentication.mode().to_string(),
            status: cluster.status.clone(),
            created_by: cluster.created_by.clone(),
            created_at: cluster.created_at,
            accessible,
        }
    }
}

// --- Bindings ---

/// The credential one user holds against one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBinding {
    pub name: String,
    pub cluster_ref: String,
    pub user_ref: String,
    /// Client certificate PEM, signed by the downstream cluster.
    pub certificate: String,
    /// Cluster roles bound downstream for this user.
    #[serde(default)]
    pub cluster_roles: Vec<String>,
    /// Namespace-scoped grants bound downstream for this user.
    #[serde(default)]
    pub namespace_roles: Vec<NamespaceGrant>,
    pub created_at: DateTime<Utc>,
}

impl ClusterBinding {
    pub fn new(cluster: &str, user: &str, certificate: String) -> Self {
        Self {
            name: Self::name_for(cluster, user),
            cluster_ref: cluster.to_string(),
            user_ref: user.to_string(),
            certificate,
            cluster_roles: Vec::new(),
            namespace_roles: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.cluster_roles = roles;
        self
    }

    pub fn with_namespace_roles(mut self, grants: Vec<NamespaceGrant>) -> Self {
        self.namespace_roles = grants;
        self
    }

    pub fn name_for(cluster: &str, user: &str) -> String {
        format!("{}-{}-cluster-binding", cluster, user)
    }
}

/// Filter body accepted by cluster search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConditions {
    /// Substring match on the cluster name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phase: Option<ClusterPhase>,
}

impl SearchConditions {
    pub fn matches(&self, cluster: &Cluster) -> bool {
        if let Some(name) = &self.name {
            if !cluster.name.contains(name.as_str()) {
                return false;
            }
        }
        if let Some(phase) = self.phase {
            if cluster.status.phase != phase {
                return false;
            }
        }
        true
    }
}
