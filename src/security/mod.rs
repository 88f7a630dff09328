//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Bootstrap:
//!     settings.entries.<role>.security
//!     → profile.rs (SecurityProfile, None when disabled)
//!     → tls.rs (rustls ServerConfig, fails fast on bad material)
//!
//! Incoming request:
//!     → rate_limit.rs (per-client budget, when enabled)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Fail closed: unusable TLS material aborts bootstrap
//! - TLS 1.3 only

pub mod profile;
pub mod rate_limit;
pub mod tls;

pub use profile::SecurityProfile;
pub use rate_limit::{rate_limit_middleware, RateLimiter};
pub use tls::TlsError;
