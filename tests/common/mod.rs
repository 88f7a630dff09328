//! Shared utilities for integration testing.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use socle::cache::resp::{read_reply, Reply};
use socle::Settings;
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

#[allow(dead_code)]
pub const HOME_VIEW: &str = "<h1>{{ app_name }}</h1>";
#[allow(dead_code)]
pub const MAINTENANCE_BODY: &str = "<h1>Back soon</h1>";

/// A project root with a home view and a maintenance page.
#[allow(dead_code)]
pub fn project_root() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("views")).unwrap();
    std::fs::create_dir_all(dir.path().join("public")).unwrap();
    std::fs::write(dir.path().join("views/home.html"), HOME_VIEW).unwrap();
    std::fs::write(dir.path().join("public/maintenance.html"), MAINTENANCE_BODY).unwrap();
    dir
}

/// Settings bound to loopback with an ephemeral port for every entry.
#[allow(dead_code)]
pub fn local_settings() -> Settings {
    let mut settings = Settings::default();
    settings.app.name = "testapp".into();
    settings.server.address = Some("127.0.0.1".into());
    settings.server.shutdown_grace_secs = 1;
    settings.entries.web.port = 0;
    settings.entries.api.port = 0;
    settings.entries.rpc.port = 0;
    settings.observability.log_level = "warn".into();
    settings
}

/// A loopback port that was free a moment ago.
#[allow(dead_code)]
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

/// In-process stand-in for a RESP cache server.
#[allow(dead_code)]
pub struct FakeRedis {
    pub addr: SocketAddr,
    /// When set, connections are closed on their next command.
    pub drop_connections: Arc<AtomicBool>,
    /// Connections accepted so far.
    pub accepted: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FakeRedis {
    pub fn address(&self) -> String {
        self.addr.to_string()
    }
}

/// Start a fake cache server answering PING, AUTH, SELECT, GET, SET, DEL,
/// EXISTS, INCR and EXPIRE.
#[allow(dead_code)]
pub async fn start_fake_redis() -> FakeRedis {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let store: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>> = Arc::default();
    let drop_connections = Arc::new(AtomicBool::new(false));
    let accepted = Arc::new(AtomicUsize::new(0));

    let (flag, count) = (drop_connections.clone(), accepted.clone());
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            count.fetch_add(1, Ordering::SeqCst);
            let store = store.clone();
            let flag = flag.clone();
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut reader = BufReader::new(read);
                loop {
                    let Ok(Reply::Array(Some(items))) = read_reply(&mut reader).await else {
                        return;
                    };
                    if flag.load(Ordering::SeqCst) {
                        return;
                    }
                    let args: Vec<Vec<u8>> = items
                        .into_iter()
                        .filter_map(|item| match item {
                            Reply::Bulk(Some(bytes)) => Some(bytes),
                            _ => None,
                        })
                        .collect();
                    let reply = answer(&store, &args);
                    if write.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    FakeRedis {
        addr,
        drop_connections,
        accepted,
    }
}

#[allow(dead_code)]
fn answer(store: &Mutex<HashMap<Vec<u8>, Vec<u8>>>, args: &[Vec<u8>]) -> Vec<u8> {
    let Some(command) = args.first() else {
        return b"-ERR empty command\r\n".to_vec();
    };
    let mut store = store.lock().unwrap();
    match command.to_ascii_uppercase().as_slice() {
        b"PING" => b"+PONG\r\n".to_vec(),
        b"AUTH" | b"SELECT" | b"EXPIRE" if args.len() >= 2 => b"+OK\r\n".to_vec(),
        b"GET" if args.len() == 2 => match store.get(&args[1]) {
            Some(value) => bulk(value),
            None => b"$-1\r\n".to_vec(),
        },
        b"SET" if args.len() >= 3 => {
            store.insert(args[1].clone(), args[2].clone());
            b"+OK\r\n".to_vec()
        }
        b"DEL" if args.len() >= 2 => {
            let removed = args[1..].iter().filter(|key| store.remove(*key).is_some()).count();
            format!(":{removed}\r\n").into_bytes()
        }
        b"EXISTS" if args.len() >= 2 => {
            let found = args[1..].iter().filter(|key| store.contains_key(*key)).count();
            format!(":{found}\r\n").into_bytes()
        }
        b"INCR" if args.len() == 2 => {
            let current = store
                .get(&args[1])
                .and_then(|raw| std::str::from_utf8(raw).ok()?.parse::<i64>().ok())
                .unwrap_or(0);
            let next = current + 1;
            store.insert(args[1].clone(), next.to_string().into_bytes());
            format!(":{next}\r\n").into_bytes()
        }
        _ => b"-ERR unknown command\r\n".to_vec(),
    }
}

#[allow(dead_code)]
fn bulk(value: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", value.len()).into_bytes();
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
    out
}

/// Test PKI: a CA, a server identity for localhost and a client identity.
#[allow(dead_code)]
pub struct Pki {
    pub ca_pem: String,
    pub ca_der: Vec<u8>,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_der: Vec<u8>,
    pub client_key_der: Vec<u8>,
}

#[allow(dead_code)]
impl Pki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, "socle test ca");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let mut server_params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
        server_params.distinguished_name.push(DnType::CommonName, "localhost");
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server = server_params.signed_by(&server_key, &ca, &ca_key).unwrap();

        let client_key = KeyPair::generate().unwrap();
        let mut client_params = CertificateParams::new(vec!["client.local".to_string()]).unwrap();
        client_params.distinguished_name.push(DnType::CommonName, "socle test client");
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let client = client_params.signed_by(&client_key, &ca, &ca_key).unwrap();

        Self {
            ca_pem: ca.pem(),
            ca_der: ca.der().to_vec(),
            server_cert_pem: server.pem(),
            server_key_pem: server_key.serialize_pem(),
            client_cert_der: client.der().to_vec(),
            client_key_der: client_key.serialize_der(),
        }
    }

    /// Write `ca.crt`, `server.crt` and `server.key` under `root`.
    pub fn write_to(&self, root: &Path) {
        std::fs::write(root.join("ca.crt"), &self.ca_pem).unwrap();
        std::fs::write(root.join("server.crt"), &self.server_cert_pem).unwrap();
        std::fs::write(root.join("server.key"), &self.server_key_pem).unwrap();
    }
}

/// Enable `self` TLS on the web entry using the material from [`Pki::write_to`].
#[allow(dead_code)]
pub fn secure_web(settings: &mut Settings, mutual: bool) {
    let security = &mut settings.entries.web.security;
    security.enabled = true;
    security.tls.mutual = mutual;
    security.tls.ca_cert_name = Some("ca".into());
    security.tls.server_cert_name = "server".into();
}
