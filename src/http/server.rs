//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Describe the bind target of a served entry
//! - Wrap application routes in the maintenance gate and entry middleware
//! - Configure HTTP/1.1 and HTTP/2 timeouts
//! - Serve plain or TLS until the shutdown handle fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use rustls::ServerConfig;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::schema::{Settings, TimeoutConfig};
use crate::http::csrf::{csrf_middleware, CsrfGuard};
use crate::http::maintenance::{maintenance_gate, MaintenanceGate};
use crate::http::routes::record_metrics;
use crate::http::Middleware;
use crate::runtime::{EntryRole, ServeError};
use crate::security::{rate_limit_middleware, RateLimiter, SecurityProfile};
use crate::session::{session_middleware, SessionManager};

/// Bind target and request pipeline of a served entry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    /// Host the server binds to.
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub security: Option<SecurityProfile>,
    /// Optional middleware, outermost first.
    pub middlewares: Vec<Middleware>,
}

impl ServerDescriptor {
    /// Descriptor for `role`, `None` for roles that serve nothing.
    ///
    /// Unknown middleware names are skipped; settings validation rejects them
    /// before this point.
    pub fn for_role(role: EntryRole, settings: &Settings) -> Option<Self> {
        let entry = settings.entries.served(role)?;
        let security = SecurityProfile::resolve(role, settings);
        let host = settings
            .server
            .address
            .clone()
            .filter(|address| !address.is_empty())
            .unwrap_or_else(|| settings.server.name.clone());
        Some(Self {
            name: settings.server.name.clone(),
            host,
            port: entry.port,
            secure: security.is_some(),
            security,
            middlewares: entry
                .middlewares
                .iter()
                .filter_map(|name| name.parse().ok())
                .collect(),
        })
    }

    /// `<host>:<port>`.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Public URL of the entry.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.name, self.port)
    }
}

/// Request-path collaborators the middleware stack may need.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub gate: MaintenanceGate,
    pub sessions: Option<SessionManager>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub csrf: CsrfGuard,
    pub write_timeout: Duration,
}

/// HTTP server for one entry.
pub struct HttpServer {
    descriptor: ServerDescriptor,
    router: Router,
    tls: Option<Arc<ServerConfig>>,
    timeouts: TimeoutConfig,
}

impl HttpServer {
    /// Create a server, wrapping `routes` in the entry's middleware stack.
    pub fn new(
        descriptor: ServerDescriptor,
        routes: Router,
        pipeline: Pipeline,
        tls: Option<Arc<ServerConfig>>,
        timeouts: TimeoutConfig,
    ) -> Self {
        let router = Self::build_router(&descriptor, routes, pipeline);
        Self {
            descriptor,
            router,
            tls,
            timeouts,
        }
    }

    /// Layer the entry middleware (first listed outermost) under the
    /// maintenance gate, metrics and the write timeout.
    #[allow(deprecated)]
    fn build_router(descriptor: &ServerDescriptor, routes: Router, pipeline: Pipeline) -> Router {
        let mut router = routes;
        for middleware in descriptor.middlewares.iter().rev() {
            router = match middleware {
                Middleware::RequestId => router
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid)),
                Middleware::Trace => router.layer(TraceLayer::new_for_http()),
                Middleware::Session => match &pipeline.sessions {
                    Some(manager) => {
                        router.layer(from_fn_with_state(manager.clone(), session_middleware))
                    }
                    None => {
                        tracing::warn!("Session middleware listed but sessions are not active for this entry");
                        router
                    }
                },
                Middleware::Csrf => {
                    router.layer(from_fn_with_state(pipeline.csrf.clone(), csrf_middleware))
                }
                Middleware::RateLimit => match &pipeline.rate_limiter {
                    Some(limiter) => {
                        router.layer(from_fn_with_state(limiter.clone(), rate_limit_middleware))
                    }
                    None => {
                        tracing::warn!("Rate limit middleware listed but rate limiting is disabled");
                        router
                    }
                },
            };
        }

        router
            .layer(from_fn_with_state(pipeline.gate, maintenance_gate))
            .layer(from_fn(record_metrics))
            .layer(TimeoutLayer::new(pipeline.write_timeout))
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// Serve until `handle` shuts the server down.
    pub async fn run(self, handle: Handle) -> Result<(), ServeError> {
        let bind = self.descriptor.bind_address();
        let addr = tokio::net::lookup_host(&bind)
            .await
            .map_err(|err| ServeError::Resolve(bind.clone(), err))?
            .next()
            .ok_or_else(|| {
                ServeError::Resolve(
                    bind.clone(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
                )
            })?;

        tracing::info!(
            address = %addr,
            secure = self.descriptor.secure,
            url = %self.descriptor.url(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        match self.tls {
            Some(config) => {
                let mut server =
                    axum_server::bind_rustls(addr, RustlsConfig::from_config(config)).handle(handle);
                configure(server.http_builder(), &self.timeouts);
                server.serve(app).await?;
            }
            None => {
                let mut server = axum_server::bind(addr).handle(handle);
                configure(server.http_builder(), &self.timeouts);
                server.serve(app).await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn configure(builder: &mut Builder<TokioExecutor>, timeouts: &TimeoutConfig) {
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(Duration::from_secs(timeouts.read_secs));
    builder
        .http2()
        .timer(TokioTimer::new())
        .keep_alive_interval(Duration::from_secs(timeouts.idle_secs))
        .keep_alive_timeout(Duration::from_secs(timeouts.idle_secs));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_uses_address_over_name() {
        let mut settings = Settings::default();
        settings.entries.api.middlewares = vec!["trace".into(), "request_id".into()];
        let descriptor = ServerDescriptor::for_role(EntryRole::Api, &settings).unwrap();
        assert_eq!(descriptor.bind_address(), "localhost:8091");
        assert_eq!(descriptor.url(), "http://localhost:8091");
        assert_eq!(descriptor.middlewares, vec![Middleware::Trace, Middleware::RequestId]);

        settings.server.address = Some("127.0.0.1".into());
        let descriptor = ServerDescriptor::for_role(EntryRole::Api, &settings).unwrap();
        assert_eq!(descriptor.bind_address(), "127.0.0.1:8091");
        assert!(ServerDescriptor::for_role(EntryRole::Worker, &settings).is_none());
    }
}
