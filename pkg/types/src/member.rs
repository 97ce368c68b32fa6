use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterBinding;
use crate::validate::validate_name;

/// A cluster role granted inside one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceGrant {
    pub namespace: String,
    pub role: String,
}

impl NamespaceGrant {
    pub fn new(namespace: &str, role: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            role: role.to_string(),
        }
    }
}

/// A user with access to a cluster, as shown by the members API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMember {
    pub name: String,
    pub binding_name: String,
    #[serde(default)]
    pub cluster_roles: Vec<String>,
    #[serde(default)]
    pub namespace_roles: Vec<NamespaceGrant>,
    pub created_at: DateTime<Utc>,
}

impl ClusterMember {
    pub fn from_binding(binding: &ClusterBinding) -> Self {
        Self {
            name: binding.user_ref.clone(),
            binding_name: binding.name.clone(),
            cluster_roles: binding.cluster_roles.clone(),
            namespace_roles: binding.namespace_roles.clone(),
            created_at: binding.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMemberRequest {
    pub name: String,
    /// Cluster roles to bind for the new member, e.g. `view-cluster`.
    #[serde(default)]
    pub cluster_roles: Vec<String>,
    /// Roles granted only inside the listed namespaces.
    #[serde(default)]
    pub namespace_roles: Vec<NamespaceGrant>,
}

/// Replacement role set for an existing member.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemberRequest {
    #[serde(default)]
    pub cluster_roles: Vec<String>,
    #[serde(default)]
    pub namespace_roles: Vec<NamespaceGrant>,
}

/// Check that every grant names a valid namespace and one of `allowed`.
pub fn validate_grants(grants: &[NamespaceGrant], allowed: &[&str]) -> anyhow::Result<()> {
    for grant in grants {
        validate_name(&grant.namespace)?;
        if !allowed.contains(&grant.role.as_str()) {
            anyhow::bail!(
                "role {} cannot be granted in namespace {}",
                grant.role,
                grant.namespace
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_namespace_grants() {
        let req: CreateMemberRequest = serde_json::from_str(
            r#"{"name":"bob","namespaceRoles":[{"namespace":"team-a","role":"view-namespace"}]}"#,
        )
        .unwrap();
        assert!(req.cluster_roles.is_empty());
        assert_eq!(
            req.namespace_roles,
            vec![NamespaceGrant::new("team-a", "view-namespace")]
        );
    }

    #[test]
    fn grants_are_checked() {
        let allowed = &["view-namespace"];
        assert!(validate_grants(&[NamespaceGrant::new("team-a", "view-namespace")], allowed).is_ok());
        assert!(validate_grants(&[NamespaceGrant::new("Team_A", "view-namespace")], allowed).is_err());
        assert!(validate_grants(&[NamespaceGrant::new("team-a", "admin-cluster")], allowed).is_err());
    }
}
