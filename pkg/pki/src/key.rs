use rcgen::{CertificateParams, DnType, KeyPair};
use tracing::info;

/// The private key owned by one managed cluster.
pub struct ClusterKey {
    key_pair: KeyPair,
}

impl ClusterKey {
    /// Mint a fresh key (ECDSA P-256).
    pub fn generate(cluster_name: &str) -> anyhow::Result<Self> {
        info!("Generating private key for cluster: {}", cluster_name);
        let key_pair = KeyPair::generate()?;
        Ok(Self { key_pair })
    }

    /// Load a key previously produced by [`ClusterKey::to_pem`].
    pub fn from_pem(pem: &str) -> anyhow::Result<Self> {
        let key_pair = KeyPair::from_pem(pem)
            .map_err(|e| anyhow::anyhow!("invalid cluster private key: {}", e))?;
        Ok(Self { key_pair })
    }

    /// SubjectPublicKeyInfo DER of the public half.
    pub fn public_key_der(&self) -> Vec<u8> {
        self.key_pair.public_key_der()
    }

    /// PKCS#8 PEM encoding.
    pub fn to_pem(&self) -> String {
        self.key_pair.serialize_pem()
    }

    /// Build a PEM certificate signing request for `username`, signed with
    /// this cluster's key. The username becomes the subject CN, which is the
    /// identity the downstream API server authenticates.
    pub fn user_csr(&self, username: &str) -> anyhow::Result<String> {
        if username.is_empty() {
            anyhow::bail!("username must not be empty");
        }
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, username);
        let csr = params.serialize_request(&self.key_pair)?;
        Ok(csr.pem()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pem_round_trip_keeps_the_key() {
        let key = ClusterKey::generate("prod").unwrap();
        let pem = key.to_pem();
        assert!(pem.contains("BEGIN PRIVATE KEY"));
        let reloaded = ClusterKey::from_pem(&pem).unwrap();
        assert_eq!(reloaded.to_pem(), pem);
    }

    #[test]
    fn csr_is_pem_encoded() {
        let key = ClusterKey::generate("prod").unwrap();
        let csr = key.user_csr("alice").unwrap();
        assert!(csr.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
        assert!(key.user_csr("").is_err());
    }

    #[test]
    fn rejects_garbage_key() {
        assert!(ClusterKey::from_pem("not a key").is_err());
    }
}
