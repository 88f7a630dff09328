//! TLS bootstrap failures and handshakes against the built server context.

mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use common::{free_port, local_settings, project_root, secure_web, Pki};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use socle::runtime::Subsystem;
use socle::security::{tls, SecurityProfile, TlsError};
use socle::{EntryRole, InitError, Socle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

fn client_config(pki: &Pki, with_identity: bool) -> Arc<ClientConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut roots = RootCertStore::empty();
    roots.add(CertificateDer::from(pki.ca_der.clone())).unwrap();
    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .unwrap()
        .with_root_certificates(roots);
    let config = if with_identity {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pki.client_key_der.clone()));
        builder
            .with_client_auth_cert(vec![CertificateDer::from(pki.client_cert_der.clone())], key)
            .unwrap()
    } else {
        builder.with_no_client_auth()
    };
    Arc::new(config)
}

fn profile(mutual: bool) -> SecurityProfile {
    SecurityProfile {
        strategy: Default::default(),
        mutual,
        ca_cert_name: Some("ca".into()),
        server_cert_name: "server".into(),
        client_cert_name: None,
    }
}

/// Accept one connection with `server_config` and report whether the
/// server side of the handshake completed.
async fn server_handshake(server: Arc<rustls::ServerConfig>, client: Arc<ClientConfig>) -> bool {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = TlsAcceptor::from(server);

    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        acceptor.accept(stream).await.is_ok()
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    // In TLS 1.3 the client may finish before the server rejects its identity,
    // so the outcome is read from the server side. Keep the stream open until then.
    let _client = TlsConnector::from(client).connect(name, stream).await;

    tokio::time::timeout(Duration::from_secs(5), accept)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_corrupt_ca_fails_before_bind() {
    let root = project_root();
    let pki = Pki::generate();
    pki.write_to(root.path());
    std::fs::write(
        root.path().join("ca.crt"),
        "-----BEGIN CERTIFICATE-----\nbm90IGEgY2VydGlmaWNhdGU=\n-----END CERTIFICATE-----\n",
    )
    .unwrap();

    let port = free_port();
    let mut settings = local_settings();
    settings.entries.web.port = port;
    secure_web(&mut settings, false);

    let err = Socle::initialize(root.path(), EntryRole::Web, settings)
        .await
        .unwrap_err();
    assert!(matches!(err, InitError::Tls(TlsError::InvalidCa { .. })));
    assert_eq!(err.subsystem(), Subsystem::Security);

    // Nothing was bound on the entry port.
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await.unwrap();
}

#[tokio::test]
async fn test_missing_server_key_fails() {
    let root = project_root();
    let pki = Pki::generate();
    pki.write_to(root.path());
    std::fs::remove_file(root.path().join("server.key")).unwrap();

    let mut settings = local_settings();
    secure_web(&mut settings, false);
    let err = Socle::initialize(root.path(), EntryRole::Web, settings)
        .await
        .unwrap_err();
    assert!(matches!(err, InitError::Tls(TlsError::Read { .. })));
}

#[tokio::test]
async fn test_mutual_requires_client_certificate() {
    let root = project_root();
    let pki = Pki::generate();
    pki.write_to(root.path());
    tls::install_crypto_provider();
    let server = tls::server_config(&profile(true), root.path()).unwrap();

    assert!(!server_handshake(server.clone(), client_config(&pki, false)).await);
    assert!(server_handshake(server, client_config(&pki, true)).await);
}

#[tokio::test]
async fn test_self_strategy_without_mutual_accepts_any_client() {
    let root = project_root();
    let pki = Pki::generate();
    pki.write_to(root.path());
    let server = tls::server_config(&profile(false), root.path()).unwrap();

    assert!(server_handshake(server, client_config(&pki, false)).await);
}

#[tokio::test]
async fn test_secure_web_entry_serves_over_tls() {
    let root = project_root();
    let pki = Pki::generate();
    pki.write_to(root.path());

    let mut settings = local_settings();
    secure_web(&mut settings, false);
    let socle = Socle::initialize(root.path(), EntryRole::Web, settings)
        .await
        .unwrap();
    assert!(socle.is_secure());
    assert!(!socle.security().unwrap().mutual);
    assert!(socle.server.as_ref().unwrap().url().starts_with("https://"));

    let handle = socle.server_handle();
    let shutdown = socle.shutdown().clone();
    let routes = socle.default_routes();
    let task = tokio::spawn(socle.listen_and_serve(routes));
    let addr = handle.listening().await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut stream = TlsConnector::from(client_config(&pki, false))
        .connect(ServerName::try_from("localhost").unwrap(), stream)
        .await
        .unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
