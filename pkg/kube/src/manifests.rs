//! JSON bodies for the Kubernetes objects fleetgate creates downstream.

use serde_json::{Value, json};

use pkg_constants::cluster::{CLIENT_SIGNER_NAME, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SCOPE_LABEL};
use pkg_types::rbac::{ClusterRole, PolicyRule, Subject};

/// Label selector matching every object fleetgate manages, URL-encoded.
pub fn managed_selector() -> String {
    format!(
        "{}%3D{}",
        MANAGED_BY_LABEL.replace('/', "%2F"),
        MANAGED_BY_VALUE
    )
}

/// Lowercase RFC 1123 form of `value`: anything outside `[a-z0-9-.]` becomes
/// `-`, and leading/trailing separators are dropped.
pub fn sanitize_name(value: &str) -> String {
    let mapped: String = value
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "user".to_string()
    } else {
        trimmed.chars().take(253).collect()
    }
}

/// Name of the ClusterRoleBinding granting `role` to `user`.
pub fn cluster_role_binding_name(role: &str, user: &str) -> String {
    sanitize_name(&format!("fleetgate-{}-{}", user, role))
}

fn managed_labels(extra: Option<(&str, &str)>) -> Value {
    let mut labels = serde_json::Map::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), json!(MANAGED_BY_VALUE));
    if let Some((k, v)) = extra {
        labels.insert(k.to_string(), json!(v));
    }
    Value::Object(labels)
}

pub fn cluster_role(role: &ClusterRole) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRole",
        "metadata": {
            "name": role.name,
            "labels": managed_labels(None),
        },
        "rules": role.rules,
    })
}

pub fn cluster_role_binding(role: &str, user: &str, cluster_scoped: bool) -> Value {
    let scope = if cluster_scoped { "cluster" } else { "namespace" };
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRoleBinding",
        "metadata": {
            "name": cluster_role_binding_name(role, user),
            "labels": managed_labels(Some((SCOPE_LABEL, scope))),
        },
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "ClusterRole",
            "name": role,
        },
        "subjects": [{
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "User",
            "name": user,
        }],
    })
}

/// RoleBinding granting cluster role `role` to `user` inside `namespace`.
/// Carries the managed-by label, which is how user namespaces are found.
pub fn role_binding(namespace: &str, role: &str, user: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "RoleBinding",
        "metadata": {
            "name": cluster_role_binding_name(role, user),
            "namespace": namespace,
            "labels": managed_labels(Some((SCOPE_LABEL, "namespace"))),
        },
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "ClusterRole",
            "name": role,
        },
        "subjects": [{
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "User",
            "name": user,
        }],
    })
}

/// Whether a (cluster) role binding names `user` as a `User` subject.
pub fn binds_user(binding: &Value, user: &str) -> bool {
    let wanted = Subject::user(user);
    binding
        .get("subjects")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|s| serde_json::from_value::<Subject>(s.clone()).ok())
        .any(|s| s.kind == wanted.kind && s.name == wanted.name)
}

/// Read a ClusterRole object back. Rules Kubernetes allows but fleetgate
/// does not model (non-resource URLs) are dropped.
pub fn parse_cluster_role(item: &Value) -> Option<ClusterRole> {
    let name = item.pointer("/metadata/name")?.as_str()?.to_string();
    let rules = item
        .get("rules")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|r| serde_json::from_value::<PolicyRule>(r.clone()).ok())
        .collect();
    Some(ClusterRole { name, rules })
}

/// CertificateSigningRequest for a client certificate. `request_b64` is the
/// base64 of the PEM CSR.
pub fn certificate_signing_request(name: &str, request_b64: &str) -> Value {
    json!({
        "apiVersion": "certificates.k8s.io/v1",
        "kind": "CertificateSigningRequest",
        "metadata": {
            "name": name,
            "labels": managed_labels(None),
        },
        "spec": {
            "request": request_b64,
            "signerName": CLIENT_SIGNER_NAME,
            "usages": ["digital signature", "key encipherment", "client auth"],
        },
    })
}

/// Approval condition merged into a fetched CSR before `PUT .../approval`.
pub fn approve_condition() -> Value {
    json!({
        "type": "Approved",
        "status": "True",
        "reason": "FleetgateApproved",
        "message": "Approved by fleetgate for cluster member access",
    })
}

pub fn self_subject_access_review(resource: &str, verb: &str) -> Value {
    json!({
        "apiVersion": "authorization.k8s.io/v1",
        "kind": "SelfSubjectAccessReview",
        "spec": {
            "resourceAttributes": {
                "resource": resource,
                "verb": verb,
                "group": rbac_group(resource),
            },
        },
    })
}

pub fn subject_access_review(user: &str, resource: &str, verb: &str) -> Value {
    json!({
        "apiVersion": "authorization.k8s.io/v1",
        "kind": "SubjectAccessReview",
        "spec": {
            "user": user,
            "resourceAttributes": {
                "resource": resource,
                "verb": verb,
                "group": rbac_group(resource),
            },
        },
    })
}

/// API group owning `resource` for access reviews.
fn rbac_group(resource: &str) -> &'static str {
    match resource {
        "clusterroles" | "clusterrolebindings" | "roles" | "rolebindings" => {
            "rbac.authorization.k8s.io"
        }
        _ => "",
    }
}
