//! socle: application bootstrap orchestrator and runtime control plane.
//!
//! # Architecture Overview
//!
//! ```text
//!   socle.toml + .env ──▶ config ──▶ Settings
//!                                      │
//!                                      ▼
//!   ┌──────────────────────── runtime::Socle::initialize ────────────────────────┐
//!   │ logging → persistence → scheduler → cache → security → sessions → render  │
//!   │         → mail → rate limiter                                              │
//!   └────────────────────────────────────┬───────────────────────────────────────┘
//!                                        │
//!             ┌──────────────────────────┼──────────────────────────┐
//!             ▼                          ▼                          ▼
//!     control plane              primary server               scheduler / mail
//!     (loopback, JSON lines)     (maintenance gate,           (background tasks)
//!        │                        middleware, routes)
//!        └──── MaintenanceMode ──────────▲
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod runtime;

// Backends
pub mod cache;
pub mod persistence;
pub mod session;

// Services
pub mod control;
pub mod mail;
pub mod render;
pub mod scheduler;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::Settings;
pub use control::MaintenanceMode;
pub use lifecycle::Shutdown;
pub use runtime::{EntryRole, InitError, ServeError, Socle, VERSION};
