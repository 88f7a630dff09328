//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! .env + socle.toml
//!     → loader.rs (env expansion, parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → Settings (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once loaded; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_settings, parse_settings, ConfigError};
pub use schema::{
    CacheBackend, CacheConfig, ControlConfig, CookieConfig, DatabaseConfig, DatabaseKind,
    EntryConfig, MailConfig, ObservabilityConfig, RateLimitConfig, RenderKind, SessionBackend,
    SessionConfig, Settings, TimeoutConfig, TlsSettings, TlsStrategy,
};
pub use validation::{validate_settings, ValidationError};
