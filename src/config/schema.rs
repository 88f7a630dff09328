//! Configuration schema definitions.
//!
//! This module defines the complete settings snapshot consumed by the
//! bootstrap orchestrator. All types derive Serde traits for deserialization
//! from `socle.toml`, and every section has defaults so minimal files work.

use serde::{Deserialize, Serialize};

use crate::runtime::EntryRole;

/// Root settings snapshot for a socle process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Application identity.
    pub app: AppConfig,

    /// Public server naming (host used in the bind address).
    pub server: ServerConfig,

    /// Relational store switch.
    pub store: StoreConfig,

    /// Relational database connection settings.
    pub database: DatabaseConfig,

    /// Cache backend selection.
    pub cache: CacheConfig,

    /// Session backend and cookie settings.
    pub session: SessionConfig,

    /// Mail dispatcher settings.
    pub mail: MailConfig,

    /// Per-entry (role) settings.
    pub entries: EntriesConfig,

    /// Control-plane listener settings.
    pub control: ControlConfig,

    /// Upload limits (consumed by application handlers).
    pub uploads: UploadConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Per-connection timeouts of the primary server.
    pub timeouts: TimeoutConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Application identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application name, reported by the default routes.
    pub name: String,

    /// Run mode (`dev`, `prod`, ...).
    pub mode: String,

    /// Enables debug output in handlers.
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "socle".to_string(),
            mode: "dev".to_string(),
            debug: true,
        }
    }
}

/// Public server naming.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name, used in `"<name>:<port>"`.
    pub name: String,

    /// Optional bind host overriding `name` (e.g. "0.0.0.0").
    pub address: Option<String>,

    /// Grace period for in-flight requests on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "localhost".to_string(),
            address: None,
            shutdown_grace_secs: 10,
        }
    }
}

/// Relational store switch.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Open a database pool for roles that use persistence.
    pub enabled: bool,
}

/// Supported relational backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[serde(alias = "postgresql", alias = "pgx")]
    Postgres,
    #[serde(alias = "mariadb")]
    Mysql,
    Sqlite,
}

/// Relational database connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Backend kind; no pool is opened when unset.
    pub kind: Option<DatabaseKind>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database name, or file path for sqlite (`:memory:` allowed).
    pub name: String,
    /// SSL mode passed through to the driver (`disable`, `require`, ...).
    pub ssl_mode: String,
    /// Upper bound of open connections in the pool.
    pub max_open_conns: u32,
    /// Connections kept open while idle.
    pub min_idle_conns: u32,
    /// Idle connections are closed after this many seconds.
    pub max_idle_time_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            name: "socle".to_string(),
            ssl_mode: "disable".to_string(),
            max_open_conns: 30,
            min_idle_conns: 0,
            max_idle_time_secs: 15 * 60,
        }
    }
}

/// Cache backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    #[serde(alias = "memory")]
    None,
    #[serde(alias = "redis")]
    Distributed,
    #[serde(alias = "badger")]
    Embedded,
}

/// Cache backend selection.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis: RedisConfig,
    pub embedded: EmbeddedConfig,
}

/// Distributed (RESP) cache connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// `host:port` of the cache service.
    pub address: String,
    pub password: Option<String>,
    /// Prefix applied to every key.
    pub prefix: String,
    /// Logical database selected after connect.
    pub db: i64,
    /// Idle connections kept for reuse.
    pub max_idle: usize,
    /// Hard cap on borrowed connections.
    pub max_active: usize,
    /// Idle connections older than this are discarded on borrow.
    pub idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            password: None,
            prefix: String::new(),
            db: 0,
            max_idle: 50,
            max_active: 10_000,
            idle_timeout_secs: 240,
            connect_timeout_secs: 5,
        }
    }
}

/// Embedded on-disk store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    /// Store directory, relative to the root path.
    pub path: String,
    /// Compaction cadence (`@daily`, `@hourly`, `@every 30m`).
    pub compaction_schedule: String,
    /// Minimum discardable fraction before a compaction rewrites the log.
    pub discard_ratio: f64,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            path: "tmp/embedded".to_string(),
            compaction_schedule: "@daily".to_string(),
            discard_ratio: 0.7,
        }
    }
}

/// Session store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Cookie,
    #[serde(alias = "redis")]
    Distributed,
    #[serde(
        alias = "database",
        alias = "postgres",
        alias = "postgresql",
        alias = "mysql",
        alias = "mariadb",
        alias = "sqlite"
    )]
    Relational,
}

/// Session backend and cookie settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    pub cookie: CookieConfig,
}

/// Session cookie attributes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    pub name: String,
    pub lifetime_secs: u64,
    /// Emit `Max-Age` so the cookie survives browser restarts.
    pub persist: bool,
    pub secure: bool,
    pub domain: Option<String>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "socle_session".to_string(),
            lifetime_secs: 24 * 60 * 60,
            persist: true,
            secure: false,
            domain: None,
        }
    }
}

/// Mail dispatcher settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MailConfig {
    pub domain: String,
    pub from_name: String,
    pub from_address: String,
    /// HTTP mail service; messages go to the log transport when unset.
    pub service: MailServiceConfig,
    /// Capacity of both the jobs and the results queues.
    pub queue_capacity: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            from_name: String::new(),
            from_address: String::new(),
            service: MailServiceConfig::default(),
            queue_capacity: 20,
        }
    }
}

/// HTTP mail service endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MailServiceConfig {
    /// Provider label forwarded with each message (e.g. "sendgrid").
    pub provider: String,
    pub url: Option<String>,
    pub key: String,
}

/// TLS strategies for a served entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum TlsStrategy {
    /// Local CA bundle.
    #[default]
    #[serde(rename = "self")]
    SelfSigned,
    /// Platform trust store.
    #[serde(rename = "root")]
    Root,
    /// Certificates issued by an external ACME client.
    #[serde(rename = "le")]
    LetsEncrypt,
}

/// TLS material references.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsSettings {
    pub strategy: TlsStrategy,
    /// Require and verify client certificates.
    pub mutual: bool,
    /// CA bundle name; `<name>.crt` is read.
    pub ca_cert_name: Option<String>,
    /// Server identity; `<name>.crt` and `<name>.key` are read.
    pub server_cert_name: String,
    /// Client identity used by tooling that talks to this entry.
    pub client_cert_name: Option<String>,
}

/// Security block of an entry.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub tls: TlsSettings,
}

/// Render engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderKind {
    Html,
    Json,
}

/// Settings of a served entry (web, api, rpc).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EntryConfig {
    pub enabled: bool,
    pub port: u16,
    /// Optional middleware, outermost first.
    pub middlewares: Vec<String>,
    pub security: SecurityConfig,
    /// Render engine override.
    pub render: Option<RenderKind>,
}

impl EntryConfig {
    fn on_port(port: u16) -> Self {
        Self {
            enabled: true,
            port,
            middlewares: Vec::new(),
            security: SecurityConfig::default(),
            render: None,
        }
    }
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self::on_port(8090)
    }
}

/// Settings of an entry that serves nothing (worker, cli).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DefaultEntry {
    pub enabled: bool,
}

impl Default for DefaultEntry {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Per-entry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EntriesConfig {
    pub web: EntryConfig,
    pub api: EntryConfig,
    pub rpc: EntryConfig,
    pub worker: DefaultEntry,
    pub cli: DefaultEntry,
}

impl Default for EntriesConfig {
    fn default() -> Self {
        Self {
            web: EntryConfig::on_port(8090),
            api: EntryConfig::on_port(8091),
            rpc: EntryConfig::on_port(8092),
            worker: DefaultEntry::default(),
            cli: DefaultEntry::default(),
        }
    }
}

impl EntriesConfig {
    /// Served entry settings for a role, `None` for roles without a server.
    pub fn served(&self, role: EntryRole) -> Option<&EntryConfig> {
        match role {
            EntryRole::Web => Some(&self.web),
            EntryRole::Api => Some(&self.api),
            EntryRole::Rpc => Some(&self.rpc),
            EntryRole::Worker | EntryRole::Cli => None,
        }
    }

    /// Whether the entry for a role is switched on.
    pub fn is_enabled(&self, role: EntryRole) -> bool {
        match role {
            EntryRole::Worker => self.worker.enabled,
            EntryRole::Cli => self.cli.enabled,
            served => self.served(served).is_some_and(|entry| entry.enabled),
        }
    }
}

/// Control-plane listener settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ControlConfig {
    /// Loopback port; the control plane is disabled when unset.
    pub port: Option<u16>,
    /// Shared token required on every call when set.
    pub token: Option<String>,
}

/// Upload limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    pub allowed_mime_types: Vec<String>,
    pub max_upload_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: Vec::new(),
            max_upload_size: 10 << 20,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per client and window.
    pub requests_per_window: u32,

    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_window: 20,
            window_secs: 60,
        }
    }
}

/// Per-connection timeouts of the primary server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle keep-alive timeout in seconds.
    pub idle_secs: u64,

    /// Request header read timeout in seconds.
    pub read_secs: u64,

    /// Upper bound for producing a response, in seconds.
    pub write_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 30,
            read_secs: 30,
            write_secs: 600,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Emit JSON lines instead of the human format.
    pub json: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_missing_sections() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.entries.web.port, 8090);
        assert_eq!(settings.entries.api.port, 8091);
        assert_eq!(settings.entries.rpc.port, 8092);
        assert_eq!(settings.cache.backend, CacheBackend::None);
        assert_eq!(settings.session.backend, SessionBackend::Cookie);
        assert_eq!(settings.mail.queue_capacity, 20);
        assert!(settings.control.port.is_none());
    }

    #[test]
    fn legacy_backend_names_are_accepted() {
        let settings: Settings = toml::from_str(
            r#"
            [cache]
            backend = "badger"

            [session]
            backend = "postgres"

            [database]
            kind = "mariadb"

            [entries.web.security]
            enabled = true
            tls = { strategy = "le", server_cert_name = "certs/server" }
            "#,
        )
        .unwrap();

        assert_eq!(settings.cache.backend, CacheBackend::Embedded);
        assert_eq!(settings.session.backend, SessionBackend::Relational);
        assert_eq!(settings.database.kind, Some(DatabaseKind::Mysql));
        assert_eq!(settings.entries.web.security.tls.strategy, TlsStrategy::LetsEncrypt);
    }

    #[test]
    fn served_entries_follow_role() {
        let entries = EntriesConfig::default();
        assert_eq!(entries.served(EntryRole::Api).map(|e| e.port), Some(8091));
        assert!(entries.served(EntryRole::Cli).is_none());
        assert!(entries.is_enabled(EntryRole::Worker));
    }
}
