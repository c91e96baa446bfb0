use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest::{digest, SHA256};
use std::path::Path;
use tracing::info;
use wtransport::Identity;

use crate::config::ServerConfig;

// Dev certificate paths (generated by scripts/gen-dev-cert)
const DEV_CERT_FILE: &str = "certs/cert.pem";
const DEV_KEY_FILE: &str = "certs/key.pem";

/// TLS identity for the WebTransport endpoint
pub struct TlsConfig {
    pub identity: Identity,
    /// Base64-encoded SHA-256 hash of the leaf certificate
    pub cert_hash: String,
}

impl TlsConfig {
    /// Load the certificate named in `config`, falling back to certs/
    pub async fn load(config: &ServerConfig) -> Result<Self> {
        if let (Some(cert_path), Some(key_path)) = (&config.tls_cert_path, &config.tls_key_path) {
            info!("Loading TLS certificate from {}", cert_path);
            return Self::load_from_paths(cert_path, key_path).await;
        }

        if Path::new(DEV_CERT_FILE).exists() && Path::new(DEV_KEY_FILE).exists() {
            info!("Loading dev certificate from certs/");
            Self::load_from_paths(DEV_CERT_FILE, DEV_KEY_FILE).await
        } else {
            Err(anyhow!(
                "TLS certificate not found.\n\n\
                For development: run `cargo run --manifest-path scripts/Cargo.toml` to generate certs/.\n\
                For production: set TLS_CERT_PATH and TLS_KEY_PATH."
            ))
        }
    }

    async fn load_from_paths(cert_path: &str, key_path: &str) -> Result<Self> {
        let identity = Identity::load_pemfiles(cert_path, key_path)
            .await
            .context("Failed to load certificate from PEM files")?;

        let cert_hash = Self::compute_cert_hash(&identity);
        Ok(Self {
            identity,
            cert_hash,
        })
    }

    fn compute_cert_hash(identity: &Identity) -> String {
        identity
            .certificate_chain()
            .as_slice()
            .first()
            .map(|cert| hash_der(cert.der()))
            .unwrap_or_default()
    }

    pub fn cert_hash(&self) -> &str {
        &self.cert_hash
    }
}

/// Base64 SHA-256 of a DER certificate, the form viewers pass as CERT_HASH
pub fn hash_der(der: &[u8]) -> String {
    STANDARD.encode(digest(&SHA256, der).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_der_is_sha256() {
        let hash = hash_der(b"certificate bytes");
        let decoded = STANDARD.decode(&hash).unwrap();
        assert_eq!(decoded.len(), 32);
        assert_eq!(hash, hash_der(b"certificate bytes"));
        assert_ne!(hash, hash_der(b"other bytes"));
    }

    #[tokio::test]
    async fn test_missing_cert_error() {
        let config = ServerConfig {
            tls_cert_path: Some("/nonexistent/cert.pem".to_string()),
            tls_key_path: Some("/nonexistent/key.pem".to_string()),
            ..ServerConfig::default()
        };
        assert!(TlsConfig::load(&config).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires certs/ from scripts/gen-dev-cert
    async fn test_load_dev_cert() {
        let config = TlsConfig::load(&ServerConfig::default()).await.unwrap();
        assert_eq!(STANDARD.decode(config.cert_hash()).unwrap().len(), 32);
    }
}
