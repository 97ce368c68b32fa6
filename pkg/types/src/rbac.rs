use serde::{Deserialize, Serialize};

use crate::validate::validate_name;

use pkg_constants::cluster::{
    ADMIN_CLUSTER_ROLE, MANAGE_NAMESPACE_ROLE, VIEW_CLUSTER_ROLE, VIEW_NAMESPACE_ROLE,
};

// --- Policy rules ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    /// API groups this rule applies to (e.g., "" for core, "*" for all)
    pub api_groups: Vec<String>,
    /// Resource types (e.g., "pods", "services", "*" for all)
    pub resources: Vec<String>,
    /// Allowed verbs (e.g., "get", "list", "create", "update", "delete", "*" for all)
    pub verbs: Vec<String>,
}

impl PolicyRule {
    fn new(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> Self {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            api_groups: owned(api_groups),
            resources: owned(resources),
            verbs: owned(verbs),
        }
    }
}

// --- ClusterRole ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRole {
    pub name: String,
    pub rules: Vec<PolicyRule>,
}

impl ClusterRole {
    /// Reject roles Kubernetes would refuse, or that grant nothing.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_name(&self.name)?;
        if self.rules.is_empty() {
            anyhow::bail!("cluster role {} has no rules", self.name);
        }
        for rule in &self.rules {
            if rule.verbs.is_empty() || rule.resources.is_empty() {
                anyhow::bail!(
                    "every rule of cluster role {} needs at least one resource and one verb",
                    self.name
                );
            }
        }
        Ok(())
    }
}

/// Body of a cluster role update: the full replacement rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateClusterRoleRequest {
    pub rules: Vec<PolicyRule>,
}

/// Whether `name` is one of the roles fleetgate provisions itself.
pub fn is_builtin_role(name: &str) -> bool {
    [
        ADMIN_CLUSTER_ROLE,
        VIEW_CLUSTER_ROLE,
        MANAGE_NAMESPACE_ROLE,
        VIEW_NAMESPACE_ROLE,
    ]
    .contains(&name)
}

// --- Subject ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Subject {
    pub fn user(name: &str) -> Self {
        Self {
            kind: SubjectKind::User,
            name: name.to_string(),
            namespace: None,
        }
    }
}

/// Cluster roles provisioned on every managed cluster after registration.
pub fn default_cluster_roles() -> Vec<ClusterRole> {
    const READ: &[&str] = &["get", "list", "watch"];
    vec![
        ClusterRole {
            name: ADMIN_CLUSTER_ROLE.to_string(),
            rules: vec![PolicyRule::new(&["*"], &["*"], &["*"])],
        },
        ClusterRole {
            name: VIEW_CLUSTER_ROLE.to_string(),
            rules: vec![PolicyRule::new(&["*"], &["*"], READ)],
        },
        ClusterRole {
            name: MANAGE_NAMESPACE_ROLE.to_string(),
            rules: vec![PolicyRule::new(&["*"], &["*"], &["*"])],
        },
        ClusterRole {
            name: VIEW_NAMESPACE_ROLE.to_string(),
            rules: vec![PolicyRule::new(&["*"], &["*"], READ)],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_admin_role() {
        let roles = default_cluster_roles();
        assert_eq!(roles.len(), 4);
        assert!(roles.iter().any(|r| r.name == ADMIN_CLUSTER_ROLE));
        let rule = serde_json::to_value(&roles[0].rules[0]).unwrap();
        assert_eq!(rule["apiGroups"], serde_json::json!(["*"]));
        assert!(roles.iter().all(|r| is_builtin_role(&r.name)));
    }

    #[test]
    fn custom_role_needs_rules() {
        let mut role = ClusterRole {
            name: "pod-reader".into(),
            rules: vec![PolicyRule::new(&[""], &["pods"], &["get", "list"])],
        };
        assert!(role.validate().is_ok());
        assert!(!is_builtin_role(&role.name));

        role.rules[0].verbs.clear();
        assert!(role.validate().is_err());
        role.rules.clear();
        assert!(role.validate().is_err());
        role.name = "Pod_Reader".into();
        assert!(role.validate().is_err());
    }
}
