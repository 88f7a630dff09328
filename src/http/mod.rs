//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (axum-server, timeouts from settings)
//!     → server.rs (write timeout, request metrics)
//!     → maintenance.rs (503 while in maintenance, page exempt)
//!     → per-entry middleware, outermost first
//!         request_id → trace → session → csrf → rate_limit
//!     → routes.rs (default routes) or application routes
//!     → Send to client
//! ```

pub mod csrf;
pub mod maintenance;
pub mod routes;
pub mod server;

use std::fmt;
use std::str::FromStr;

pub use csrf::{csrf_middleware, CsrfGuard, CsrfToken};
pub use maintenance::{maintenance_gate, MaintenanceGate, MAINTENANCE_PAGE};
pub use routes::{default_routes, AppState};
pub use server::{HttpServer, ServerDescriptor};

/// Optional middleware an entry can list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Middleware {
    /// Set and propagate `x-request-id`.
    RequestId,
    /// Request/response tracing spans.
    Trace,
    /// Load and commit sessions.
    Session,
    /// Per-client request budget.
    RateLimit,
    /// Double-submit CSRF check on unsafe methods.
    Csrf,
}

impl Middleware {
    pub fn as_str(self) -> &'static str {
        match self {
            Middleware::RequestId => "request_id",
            Middleware::Trace => "trace",
            Middleware::Session => "session",
            Middleware::RateLimit => "rate_limit",
            Middleware::Csrf => "csrf",
        }
    }
}

impl fmt::Display for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned for middleware names that are not known.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown middleware `{0}`")]
pub struct UnknownMiddleware(pub String);

impl FromStr for Middleware {
    type Err = UnknownMiddleware;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "request_id" => Ok(Middleware::RequestId),
            "trace" => Ok(Middleware::Trace),
            "session" | "sessions" => Ok(Middleware::Session),
            "rate_limit" | "ratelimit" => Ok(Middleware::RateLimit),
            "csrf" | "nosurf" => Ok(Middleware::Csrf),
            _ => Err(UnknownMiddleware(s.to_string())),
        }
    }
}
