//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (runtime::bootstrap):
//!     Settings → Validate → Initialize subsystems in order → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal or explicit trigger → Stop accepting → Drain → teardown.rs
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Teardown (teardown.rs):
//!     Release pooled resources once, newest first
//! ```
//!
//! # Design Decisions
//! - Ordered startup: logging first, listeners last
//! - Ordered shutdown: stop accept, drain, release
//! - Release failures are logged; the process exits regardless

pub mod shutdown;
pub mod signals;
pub mod teardown;

pub use shutdown::Shutdown;
pub use signals::spawn_signal_listener;
pub use teardown::{Resource, ResourceRegistry};
