use std::io::BufReader;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::key::ClusterKey;

/// Check that `pem` holds at least one well-formed X.509 certificate.
pub fn validate_certificate_pem(pem: &str) -> anyhow::Result<()> {
    let mut reader = BufReader::new(pem.as_bytes());
    let mut count = 0;
    for cert in rustls_pemfile::certs(&mut reader) {
        cert.map_err(|e| anyhow::anyhow!("malformed certificate PEM: {}", e))?;
        count += 1;
    }
    if count == 0 {
        anyhow::bail!("no certificate found in PEM data");
    }
    Ok(())
}

/// Whether the first certificate in `cert_pem` was issued for `key`, i.e.
/// carries the same public key.
pub fn certificate_matches_key(cert_pem: &str, key: &ClusterKey) -> anyhow::Result<bool> {
    let mut reader = BufReader::new(cert_pem.as_bytes());
    let der = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| anyhow::anyhow!("no certificate found in PEM data"))??;
    let (_, cert) = X509Certificate::from_der(der.as_ref())
        .map_err(|e| anyhow::anyhow!("malformed certificate: {}", e))?;
    Ok(cert.public_key().raw == key.public_key_der().as_slice())
}

/// Concatenate a private key and client certificate into the single PEM
/// bundle that TLS client identities are loaded from.
pub fn client_identity_pem(key_pem: &str, cert_pem: &str) -> anyhow::Result<Vec<u8>> {
    let mut reader = BufReader::new(key_pem.as_bytes());
    if rustls_pemfile::private_key(&mut reader)?.is_none() {
        anyhow::bail!("no private key found in PEM data");
    }
    validate_certificate_pem(cert_pem)?;

    let mut bundle = Vec::with_capacity(key_pem.len() + cert_pem.len() + 1);
    bundle.extend_from_slice(key_pem.as_bytes());
    if !key_pem.ends_with('\n') {
        bundle.push(b'\n');
    }
    bundle.extend_from_slice(cert_pem.as_bytes());
    Ok(bundle)
}
