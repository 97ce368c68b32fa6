//! Minimal kubeconfig reader: resolves the current context to an endpoint,
//! CA bundle and credentials.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::error::KubeError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    user: String,
}

/// Credentials carried by a kubeconfig user entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    ClientCertificate { cert_pem: String, key_pem: String },
    None,
}

/// The parts of a kubeconfig's current context fleetgate uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKubeconfig {
    pub server: String,
    pub ca_pem: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub credentials: Credentials,
}

fn decode_data(field: &str, data: &str) -> Result<String, KubeError> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| KubeError::Config(format!("{} is not valid base64: {}", field, e)))?;
    String::from_utf8(bytes)
        .map_err(|e| KubeError::Config(format!("{} is not valid UTF-8: {}", field, e)))
}

/// Parse `content` and resolve its current context. Without a
/// `current-context`, the first context is used.
pub fn resolve(content: &str) -> Result<ResolvedKubeconfig, KubeError> {
    let config: Kubeconfig = serde_yaml::from_str(content)
        .map_err(|e| KubeError::Config(format!("malformed kubeconfig: {}", e)))?;

    let context = match &config.current_context {
        Some(name) => config.contexts.iter().find(|c| &c.name == name),
        None => config.contexts.first(),
    }
    .ok_or_else(|| KubeError::Config("kubeconfig has no usable context".into()))?;

    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == context.context.cluster)
        .ok_or_else(|| {
            KubeError::Config(format!(
                "context {} references unknown cluster {}",
                context.name, context.context.cluster
            ))
        })?;

    let user = config
        .users
        .iter()
        .find(|u| u.name == context.context.user)
        .map(|u| &u.user);

    let credentials = match user {
        Some(UserEntry {
            token: Some(token), ..
        }) => Credentials::Token(token.clone()),
        Some(UserEntry {
            client_certificate_data: Some(cert),
            client_key_data: Some(key),
            ..
        }) => Credentials::ClientCertificate {
            cert_pem: decode_data("client-certificate-data", cert)?,
            key_pem: decode_data("client-key-data", key)?,
        },
        _ => Credentials::None,
    };

    let ca_pem = cluster
        .cluster
        .certificate_authority_data
        .as_deref()
        .map(|data| decode_data("certificate-authority-data", data))
        .transpose()?;

    Ok(ResolvedKubeconfig {
        server: cluster.cluster.server.trim_end_matches('/').to_string(),
        ca_pem,
        insecure_skip_tls_verify: cluster.cluster.insecure_skip_tls_verify,
        credentials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> String {
        STANDARD.encode(s)
    }

    #[test]
    fn resolves_current_context() {
        let yaml = format!(
            r#"
apiVersion: v1
kind: Config
current-context: prod
clusters:
  - name: staging
    cluster:
      server: https://staging:6443
  - name: prod
    cluster:
      server: https://prod:6443/
      certificate-authority-data: {ca}
contexts:
  - name: staging
    context: {{cluster: staging, user: ops}}
  - name: prod
    context: {{cluster: prod, user: admin}}
users:
  - name: ops
    user:
      token: ops-token
  - name: admin
    user:
      client-certificate-data: {cert}
      client-key-data: {key}
"#,
            ca = b64("CA PEM"),
            cert = b64("CERT PEM"),
            key = b64("KEY PEM"),
        );
        let resolved = resolve(&yaml).unwrap();
        assert_eq!(resolved.server, "https://prod:6443");
        assert_eq!(resolved.ca_pem.as_deref(), Some("CA PEM"));
        assert_eq!(
            resolved.credentials,
            Credentials::ClientCertificate {
                cert_pem: "CERT PEM".into(),
                key_pem: "KEY PEM".into()
            }
        );
    }

    #[test]
    fn falls_back_to_first_context() {
        let yaml = r#"
clusters:
  - name: c
    cluster:
      server: https://c:6443
      insecure-skip-tls-verify: true
contexts:
  - name: only
    context: {cluster: c, user: u}
users:
  - name: u
    user:
      token: abc
"#;
        let resolved = resolve(yaml).unwrap();
        assert_eq!(resolved.server, "https://c:6443");
        assert!(resolved.insecure_skip_tls_verify);
        assert_eq!(resolved.credentials, Credentials::Token("abc".into()));
    }

    #[test]
    fn rejects_dangling_references() {
        let yaml = r#"
clusters: []
contexts:
  - name: only
    context: {cluster: missing, user: u}
"#;
        assert!(matches!(resolve(yaml), Err(KubeError::Config(_))));
        assert!(matches!(resolve("clusters: ["), Err(KubeError::Config(_))));
        assert!(matches!(resolve("kind: Config"), Err(KubeError::Config(_))));
    }
}
