//! Ordered subsystem initialization.
//!
//! # Data Flow
//! ```text
//! Settings (validated) + EntryRole
//!     → logging → persistence → scheduler → cache
//!     → security/server descriptor → sessions → render → mail → rate limiter
//!     → Socle
//! ```
//!
//! # Design Decisions
//! - Strictly sequential, the first failure aborts with the failing subsystem
//! - Earlier subsystems are not rolled back on failure
//! - TLS material is loaded here so bad files fail before any bind

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum_server::Handle;

use crate::cache::{self, CacheError, CacheHandle, RedisCache};
use crate::config::schema::{SessionBackend, Settings};
use crate::config::validation::validate_settings;
use crate::control::MaintenanceMode;
use crate::http::ServerDescriptor;
use crate::lifecycle::{Resource, ResourceRegistry, Shutdown};
use crate::mail::{MailTransport, Mailer};
use crate::observability::{init_logging, metrics, LoggingError};
use crate::persistence::Database;
use crate::render::RenderEngine;
use crate::runtime::{EntryRole, InitError, Socle, Subsystem, VERSION};
use crate::scheduler::Scheduler;
use crate::security::{tls, RateLimiter, SecurityProfile};
use crate::session::{SessionError, SessionManager};

impl Socle {
    /// Initialize every subsystem `entry` needs, in dependency order.
    pub async fn initialize(
        root_path: impl Into<PathBuf>,
        entry: EntryRole,
        settings: Settings,
    ) -> Result<Socle, InitError> {
        let root_path = root_path.into();

        if let Err(errors) = validate_settings(&settings) {
            let reason = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(InitError::config(Subsystem::Settings, reason));
        }
        if !settings.entries.is_enabled(entry) {
            return Err(InitError::config(
                Subsystem::Settings,
                format!("entry `{entry}` is disabled"),
            ));
        }

        // Logging
        match init_logging(&settings.observability) {
            Ok(()) | Err(LoggingError::AlreadyInstalled) => {}
            Err(err) => return Err(InitError::config(Subsystem::Logging, err.to_string())),
        }
        if settings.observability.metrics_enabled {
            let addr: SocketAddr = settings
                .observability
                .metrics_address
                .parse()
                .map_err(|_| {
                    InitError::config(
                        Subsystem::Metrics,
                        format!("invalid address `{}`", settings.observability.metrics_address),
                    )
                })?;
            metrics::init_metrics(addr).map_err(|err| InitError::config(Subsystem::Metrics, err.to_string()))?;
        }
        tracing::info!(
            app = %settings.app.name,
            version = VERSION,
            entry = %entry,
            root = %root_path.display(),
            "Bootstrapping"
        );

        let resources = ResourceRegistry::new();
        let shutdown = Shutdown::new();

        // Persistence
        let database = if entry.needs_persistence()
            && settings.store.enabled
            && settings.database.kind.is_some()
        {
            let db = Database::connect(&settings.database, &root_path)
                .await
                .map_err(|err| InitError::connect(Subsystem::Persistence, err))?;
            resources.register(Resource::Database(db.clone()));
            Some(db)
        } else {
            None
        };

        // Scheduler
        let scheduler = Scheduler::new();

        // Cache
        let distributed_sessions =
            entry.uses_sessions() && settings.session.backend == SessionBackend::Distributed;
        let selection = cache::select(&settings.cache, &root_path, distributed_sessions, &scheduler)
            .await
            .map_err(cache_error)?;
        let cache = selection.handle;
        if let Some(pool) = &selection.pool {
            if !matches!(cache, CacheHandle::Distributed(_)) {
                resources.register(Resource::Pool(pool.clone()));
            }
        }
        resources.register(Resource::Cache(cache.clone()));

        // Security and server descriptor
        let server = ServerDescriptor::for_role(entry, &settings);
        let tls = match server.as_ref().and_then(|s| s.security.as_ref()) {
            Some(profile) => {
                tls::install_crypto_provider();
                Some(tls::server_config(profile, &root_path)?)
            }
            None => None,
        };

        // Sessions
        let sessions = if entry.uses_sessions() {
            let session_cache = match (&cache, &selection.pool) {
                (CacheHandle::Distributed(_), _) | (_, None) => cache.clone(),
                (_, Some(pool)) => CacheHandle::Distributed(RedisCache::new(
                    pool.clone(),
                    settings.cache.redis.prefix.clone(),
                )),
            };
            let manager = SessionManager::from_config(&settings.session, &session_cache, database.as_ref())
                .await
                .map_err(|err| match err {
                    SessionError::MissingBackend(_) => InitError::config(Subsystem::Sessions, err.to_string()),
                    other => InitError::connect(Subsystem::Sessions, other),
                })?;
            manager.register_sweep(&scheduler);
            Some(manager)
        } else {
            None
        };

        // Render
        let render_kind = settings.entries.served(entry).and_then(|e| e.render);
        let render = RenderEngine::for_role(entry, render_kind, &root_path);

        // Mail
        let transport = MailTransport::from_config(&settings.mail)
            .map_err(|err| InitError::config(Subsystem::Mail, err.to_string()))?;
        let (mail, mail_loop) = Mailer::new(&settings.mail, transport);
        tokio::spawn(mail_loop.run(shutdown.subscribe()));

        // Rate limiter
        let rate_limiter = (entry.serves_http() && settings.rate_limit.enabled)
            .then(|| Arc::new(RateLimiter::new(&settings.rate_limit, cache.clone())));

        tracing::info!(
            persistence = database.is_some(),
            cache = ?cache.kind(),
            jobs = scheduler.job_count(),
            secure = tls.is_some(),
            sessions = sessions.is_some(),
            render = ?render.as_ref().map(RenderEngine::kind),
            "Bootstrap complete"
        );

        Ok(Socle {
            app_name: settings.app.name.clone(),
            version: VERSION,
            debug: settings.app.debug,
            root_path,
            entry,
            database,
            scheduler,
            cache,
            server,
            sessions,
            render,
            mail,
            rate_limiter,
            maintenance: MaintenanceMode::new(),
            settings: Arc::new(settings),
            tls,
            shutdown,
            handle: Handle::new(),
            resources,
        })
    }

    /// Security profile of the served entry, if TLS is on.
    pub fn security(&self) -> Option<&SecurityProfile> {
        self.server.as_ref().and_then(|server| server.security.as_ref())
    }
}

fn cache_error(err: CacheError) -> InitError {
    InitError::connect(Subsystem::Cache, err)
}
