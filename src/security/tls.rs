//! TLS server context.
//!
//! # Responsibilities
//! - Load the server certificate chain and key (`<name>.crt`, `<name>.key`)
//! - Load client trust anchors: the local CA bundle (`self`) or the platform store (`root`)
//! - Build a TLS 1.3 rustls config, verifying client certificates when mutual
//!
//! # Design Decisions
//! - Built during bootstrap so bad material fails before any listener binds
//! - The `self` CA bundle is always parsed, even without mutual auth
//! - Never falls back to plain HTTP

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{VerifierBuilderError, WebPkiClientVerifier};
use rustls::{RootCertStore, ServerConfig};
use thiserror::Error;

use crate::config::schema::TlsStrategy;
use crate::security::SecurityProfile;

/// Error type for TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid CA bundle {}: {reason}", path.display())]
    InvalidCa { path: PathBuf, reason: String },
    #[error("no certificate found in {}", path.display())]
    MissingCertificate { path: PathBuf },
    #[error("no private key found in {}", path.display())]
    MissingKey { path: PathBuf },
    #[error("mutual TLS with strategy {0:?} has no client trust anchor")]
    MissingTrustAnchor(TlsStrategy),
    #[error("failed to load platform certificates: {0}")]
    NativeRoots(String),
    #[error("invalid client verifier")]
    Verifier(#[from] VerifierBuilderError),
    #[error("invalid TLS configuration")]
    Rustls(#[from] rustls::Error),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Install AWS-LC as the process default provider. Later calls are ignored.
pub fn install_crypto_provider() {
    if CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

/// Path of `<name><ext>` resolved against `root`.
pub fn material_path(root: &Path, name: &str, ext: &str) -> PathBuf {
    root.join(format!("{name}{ext}"))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Parse every certificate in the PEM bundle at `path` into a trust store.
///
/// An empty bundle or a block that does not parse is an error.
pub fn load_ca_bundle(path: &Path) -> Result<RootCertStore, TlsError> {
    let invalid = |reason: String| TlsError::InvalidCa {
        path: path.to_path_buf(),
        reason,
    };
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| invalid(err.to_string()))?;
    if certs.is_empty() {
        return Err(invalid("no certificates".into()));
    }

    let mut store = RootCertStore::empty();
    for cert in certs {
        store.add(cert).map_err(|err| invalid(err.to_string()))?;
    }
    Ok(store)
}

fn load_native_roots() -> Result<RootCertStore, TlsError> {
    let result = rustls_native_certs::load_native_certs();
    if !result.errors.is_empty() && result.certs.is_empty() {
        let joined = result
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(TlsError::NativeRoots(joined));
    }

    let mut store = RootCertStore::empty();
    let (added, failed) = store.add_parsable_certificates(result.certs);
    tracing::debug!(added, failed, "Loaded platform root certificates");
    if added == 0 {
        return Err(TlsError::MissingTrustAnchor(TlsStrategy::Root));
    }
    Ok(store)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::MissingCertificate {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::MissingKey {
            path: path.to_path_buf(),
        })
}

/// Client trust anchors for `profile`, `None` when the strategy has none.
fn trust_anchors(profile: &SecurityProfile, root: &Path) -> Result<Option<RootCertStore>, TlsError> {
    match profile.strategy {
        TlsStrategy::SelfSigned => {
            let name = profile
                .ca_cert_name
                .as_deref()
                .ok_or(TlsError::MissingTrustAnchor(TlsStrategy::SelfSigned))?;
            load_ca_bundle(&material_path(root, name, ".crt")).map(Some)
        }
        TlsStrategy::Root if profile.mutual => load_native_roots().map(Some),
        TlsStrategy::Root | TlsStrategy::LetsEncrypt => Ok(None),
    }
}

/// Build the server TLS context for `profile`.
pub fn server_config(profile: &SecurityProfile, root: &Path) -> Result<Arc<ServerConfig>, TlsError> {
    let anchors = trust_anchors(profile, root)?;
    let certs = load_certs(&material_path(root, &profile.server_cert_name, ".crt"))?;
    let key = load_key(&material_path(root, &profile.server_cert_name, ".key"))?;

    let provider = provider();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])?;

    let builder = if profile.mutual {
        let anchors = anchors.ok_or(TlsError::MissingTrustAnchor(profile.strategy))?;
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(anchors), provider).build()?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    let mut config = builder.with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    tracing::info!(
        strategy = ?profile.strategy,
        mutual = profile.mutual,
        server_cert = %profile.server_cert_name,
        "TLS context ready"
    );
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(strategy: TlsStrategy, mutual: bool) -> SecurityProfile {
        SecurityProfile {
            strategy,
            mutual,
            ca_cert_name: Some("ca".into()),
            server_cert_name: "server".into(),
            client_cert_name: None,
        }
    }

    #[test]
    fn corrupt_ca_bundle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.crt");
        std::fs::write(&path, "-----BEGIN CERTIFICATE-----\nnot base64!\n-----END CERTIFICATE-----\n").unwrap();
        assert!(matches!(load_ca_bundle(&path), Err(TlsError::InvalidCa { .. })));

        std::fs::write(&path, "").unwrap();
        assert!(matches!(load_ca_bundle(&path), Err(TlsError::InvalidCa { .. })));
    }

    #[test]
    fn missing_material_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = server_config(&profile(TlsStrategy::LetsEncrypt, false), dir.path()).unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }));
    }

    #[test]
    fn le_cannot_verify_clients() {
        let dir = tempfile::tempdir().unwrap();
        assert!(trust_anchors(&profile(TlsStrategy::LetsEncrypt, true), dir.path())
            .unwrap()
            .is_none());
    }
}
