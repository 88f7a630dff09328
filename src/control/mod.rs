//! Runtime control plane.
//!
//! # Data Flow
//! ```text
//! socle-cli down/up
//!     → client.rs (JSON line over loopback TCP)
//!     → listener.rs (Control.SetMaintenance)
//!     → maintenance.rs (AtomicBool, release store)
//!     → http maintenance gate (acquire load per request)
//! ```
//!
//! # Design Decisions
//! - The control plane is the only writer of the maintenance flag
//! - The loopback bind is the primary authentication, an optional shared
//!   token is checked on every call
//! - A control port that cannot be bound is logged and the primary server
//!   keeps running

pub mod client;
pub mod listener;
pub mod maintenance;
pub mod protocol;

use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

pub use client::{ControlClient, ControlError};
pub use listener::ControlListener;
pub use maintenance::MaintenanceMode;

/// Start the control listener when a port is configured.
pub async fn spawn_control_plane(
    port: Option<u16>,
    token: Option<String>,
    maintenance: MaintenanceMode,
    shutdown: &Shutdown,
) -> Option<JoinHandle<()>> {
    let port = port?;
    match ControlListener::bind(port, maintenance, token).await {
        Ok(listener) => Some(tokio::spawn(listener.run(shutdown.subscribe()))),
        Err(err) => {
            tracing::error!(port, error = %err, "Failed to bind control plane");
            None
        }
    }
}
