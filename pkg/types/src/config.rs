use serde::{Deserialize, Serialize};

/// A bearer token accepted by the API server and the user it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub name: String,
    pub token: String,
}

/// Gateway behaviour switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfigFile {
    /// Rewrite a downstream 403 on single forwarded calls to a 500.
    #[serde(default, alias = "remap-forbidden")]
    pub remap_forbidden: Option<bool>,
    /// Validate downstream server certificates against the cluster CA.
    #[serde(default, alias = "verify-upstream-tls")]
    pub verify_upstream_tls: Option<bool>,
    #[serde(default, alias = "fanout-limit")]
    pub fanout_limit: Option<usize>,
    #[serde(default, alias = "connect-timeout-secs")]
    pub connect_timeout_secs: Option<u64>,
}

/// Retry policy for background cluster provisioning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningConfigFile {
    #[serde(default, alias = "max-attempts")]
    pub max_attempts: Option<usize>,
    #[serde(default, alias = "initial-backoff-ms")]
    pub initial_backoff_ms: Option<u64>,
}

/// Server configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// port: 8080
/// data-dir: /var/lib/fleetgate/data
/// users:
///   - name: admin
///     token: my-secret-token
/// preflight-limit: 8
/// downstream-timeout-secs: 30
/// gateway:
///   remap-forbidden: true
///   verify-upstream-tls: false
///   fanout-limit: 16
/// provisioning:
///   max-attempts: 3
///   initial-backoff-ms: 500
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub users: Vec<UserEntry>,
    #[serde(default, alias = "preflight-limit")]
    pub preflight_limit: Option<usize>,
    /// Bound on cluster calls made while registration holds the store.
    #[serde(default, alias = "downstream-timeout-secs")]
    pub downstream_timeout_secs: Option<u64>,
    #[serde(default)]
    pub gateway: GatewayConfigFile,
    #[serde(default)]
    pub provisioning: ProvisioningConfigFile,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_case_keys() {
        let yaml = r#"
port: 9090
data-dir: /var/lib/fleetgate
users:
  - name: alice
    token: t-alice
preflight-limit: 4
downstream-timeout-secs: 10
gateway:
  remap-forbidden: false
  fanout-limit: 2
provisioning:
  max-attempts: 5
"#;
        let cfg: ServerConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.port, Some(9090));
        assert_eq!(cfg.data_dir.as_deref(), Some("/var/lib/fleetgate"));
        assert_eq!(cfg.users.len(), 1);
        assert_eq!(cfg.preflight_limit, Some(4));
        assert_eq!(cfg.downstream_timeout_secs, Some(10));
        assert_eq!(cfg.gateway.remap_forbidden, Some(false));
        assert_eq!(cfg.gateway.fanout_limit, Some(2));
        assert_eq!(cfg.gateway.verify_upstream_tls, None);
        assert_eq!(cfg.provisioning.max_attempts, Some(5));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg: ServerConfigFile =
            load_config_file("/nonexistent/fleetgate/config.yaml").unwrap();
        assert!(cfg.port.is_none());
        assert!(cfg.users.is_empty());
    }
}
