use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Certificate, Client, Identity};
use std::time::Duration;
use tracing::warn;

use pkg_types::cluster::{Authentication, Cluster};

use crate::error::KubeError;
use crate::kubeconfig::{self, Credentials};

/// Server verification settings for a downstream connection.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// PEM bundle trusted in addition to the platform roots.
    pub ca_pem: Option<String>,
    /// Accept any server certificate.
    pub accept_invalid_certs: bool,
}

/// A ready HTTP client plus the base URL it talks to.
#[derive(Debug, Clone)]
pub struct Transport {
    pub base: String,
    pub client: Client,
}

/// Build a reqwest client with an optional client identity (key + cert PEM
/// bundle) and default headers.
pub fn build_client(
    tls: &TlsSettings,
    identity_pem: Option<&[u8]>,
    headers: HeaderMap,
    connect_timeout: Duration,
) -> Result<Client, KubeError> {
    let mut builder = Client::builder()
        .connect_timeout(connect_timeout)
        .default_headers(headers);

    if let Some(ca) = &tls.ca_pem {
        let cert = Certificate::from_pem(ca.as_bytes())
            .map_err(|e| KubeError::Config(format!("invalid CA bundle: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }
    if tls.accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(pem) = identity_pem {
        let identity = Identity::from_pem(pem)
            .map_err(|e| KubeError::Pki(format!("invalid client identity: {}", e)))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| KubeError::Config(format!("failed to build HTTP client: {}", e)))
}

fn bearer_headers(token: &str) -> Result<HeaderMap, KubeError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
        .map_err(|_| KubeError::Config("bearer token contains invalid characters".into()))?;
    value.set_sensitive(true);
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

fn identity_bundle(key_pem: &str, cert_pem: &str) -> Result<Vec<u8>, KubeError> {
    pkg_pki::identity::client_identity_pem(key_pem, cert_pem)
        .map_err(|e| KubeError::Pki(format!("{:#}", e)))
}

/// Transport authenticated as the control plane itself, using whatever
/// credentials the cluster was registered with.
pub fn admin_transport(cluster: &Cluster, connect_timeout: Duration) -> Result<Transport, KubeError> {
    let spec = &cluster.spec;
    let mut tls = TlsSettings {
        ca_pem: spec.ca_data.clone().filter(|ca| !ca.trim().is_empty()),
        accept_invalid_certs: spec.connect.insecure_skip_tls_verify,
    };

    let (base, headers, identity) = match &spec.authentication {
        Authentication::Bearer { token } => {
            (cluster.api_server().to_string(), bearer_headers(token)?, None)
        }
        Authentication::Certificate {
            cert_data,
            key_data,
        } => (
            cluster.api_server().to_string(),
            HeaderMap::new(),
            Some(identity_bundle(key_data, cert_data)?),
        ),
        Authentication::ConfigFile {
            config_file_content,
        } => {
            let resolved = kubeconfig::resolve(config_file_content)?;
            if tls.ca_pem.is_none() {
                tls.ca_pem = resolved.ca_pem.clone();
            }
            tls.accept_invalid_certs |= resolved.insecure_skip_tls_verify;
            match resolved.credentials {
                Credentials::Token(token) => (resolved.server, bearer_headers(&token)?, None),
                Credentials::ClientCertificate { cert_pem, key_pem } => (
                    resolved.server,
                    HeaderMap::new(),
                    Some(identity_bundle(&key_pem, &cert_pem)?),
                ),
                Credentials::None => (resolved.server, HeaderMap::new(), None),
            }
        }
    };

    if base.is_empty() {
        return Err(KubeError::Config(format!(
            "cluster {} has no API server endpoint",
            cluster.name
        )));
    }
    if tls.accept_invalid_certs {
        warn!(
            "TLS verification disabled for admin transport of cluster {}",
            cluster.name
        );
    }

    let client = build_client(&tls, identity.as_deref(), headers, connect_timeout)?;
    Ok(Transport {
        base: base.trim_end_matches('/').to_string(),
        client,
    })
}

/// Transport authenticated as an end user: the cluster's private key plus
/// the certificate issued to that user.
pub fn user_transport(
    cluster: &Cluster,
    cert_pem: &str,
    verify_tls: bool,
    connect_timeout: Duration,
) -> Result<Transport, KubeError> {
    let mut ca_pem = cluster.spec.ca_data.clone().filter(|ca| !ca.trim().is_empty());
    if ca_pem.is_none() {
        if let Authentication::ConfigFile {
            config_file_content,
        } = &cluster.spec.authentication
        {
            ca_pem = kubeconfig::resolve(config_file_content)?.ca_pem;
        }
    }
    let tls = TlsSettings {
        ca_pem,
        accept_invalid_certs: !verify_tls,
    };
    let identity = identity_bundle(&cluster.private_key, cert_pem)?;
    let client = build_client(&tls, Some(&identity), HeaderMap::new(), connect_timeout)?;

    let base = cluster.api_server().trim_end_matches('/').to_string();
    if base.is_empty() {
        return Err(KubeError::Config(format!(
            "cluster {} has no API server endpoint",
            cluster.name
        )));
    }
    Ok(Transport { base, client })
}
