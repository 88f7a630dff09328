//! Runtime instance and process lifecycle.
//!
//! # Data Flow
//! ```text
//! (root path, entry, Settings)
//!     → bootstrap.rs (ordered initialization) → Socle
//!     → serve.rs
//!         web/api/rpc → control plane + primary server until shutdown
//!         worker      → scheduler + mail loop until shutdown
//!     → teardown (newest resource first)
//! ```
//!
//! # Design Decisions
//! - No globals: every handle lives on `Socle` and is cloned into tasks
//! - The maintenance flag is the only state mutated after bootstrap

mod bootstrap;
pub mod entry;
pub mod error;
mod serve;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use axum_server::Handle;
use rustls::ServerConfig;

use crate::cache::CacheHandle;
use crate::config::schema::Settings;
use crate::control::MaintenanceMode;
use crate::http::ServerDescriptor;
use crate::lifecycle::{ResourceRegistry, Shutdown};
use crate::mail::Mailer;
use crate::persistence::Database;
use crate::render::RenderEngine;
use crate::scheduler::Scheduler;
use crate::security::RateLimiter;
use crate::session::SessionManager;

pub use entry::{EntryRole, UnknownEntry};
pub use error::{InitError, ServeError, Subsystem};

/// Crate version reported by the runtime and the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A bootstrapped process: one handle per activated subsystem.
pub struct Socle {
    pub app_name: String,
    pub version: &'static str,
    pub debug: bool,
    pub root_path: PathBuf,
    pub entry: EntryRole,
    pub settings: Arc<Settings>,
    /// Present when the role needs persistence and a store is configured.
    pub database: Option<Database>,
    pub scheduler: Scheduler,
    pub cache: CacheHandle,
    /// Present for web, api and rpc.
    pub server: Option<ServerDescriptor>,
    /// Present for web.
    pub sessions: Option<SessionManager>,
    pub render: Option<RenderEngine>,
    pub mail: Mailer,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub maintenance: MaintenanceMode,
    tls: Option<Arc<ServerConfig>>,
    shutdown: Shutdown,
    handle: Handle,
    resources: ResourceRegistry,
}

impl fmt::Debug for Socle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socle")
            .field("app_name", &self.app_name)
            .field("version", &self.version)
            .field("entry", &self.entry)
            .field("root_path", &self.root_path)
            .field("database", &self.database.is_some())
            .field("scheduler", &self.scheduler)
            .field("cache", &self.cache.kind())
            .field("server", &self.server)
            .field("sessions", &self.sessions.is_some())
            .field("render", &self.render)
            .field("maintenance", &self.maintenance.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Socle {
    /// Shutdown coordinator shared by every background task.
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Handle of the primary server; `listening()` yields the bound address.
    pub fn server_handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Whether a TLS context was built for the primary server.
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Names of the resources awaiting teardown, in acquisition order.
    pub fn resource_names(&self) -> Vec<&'static str> {
        self.resources.names()
    }
}
