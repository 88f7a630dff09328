//! Per-entry security profile.

use crate::config::schema::{Settings, TlsStrategy};
use crate::runtime::EntryRole;

/// Resolved TLS requirements of a served entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityProfile {
    pub strategy: TlsStrategy,
    /// Require and verify client certificates.
    pub mutual: bool,
    pub ca_cert_name: Option<String>,
    pub server_cert_name: String,
    pub client_cert_name: Option<String>,
}

impl SecurityProfile {
    /// Profile for `role`, `None` when the role serves nothing or its
    /// security block is disabled.
    pub fn resolve(role: EntryRole, settings: &Settings) -> Option<Self> {
        let entry = settings.entries.served(role)?;
        if !entry.security.enabled {
            return None;
        }
        let tls = &entry.security.tls;
        Some(Self {
            strategy: tls.strategy,
            mutual: tls.mutual,
            ca_cert_name: tls.ca_cert_name.clone().filter(|name| !name.is_empty()),
            server_cert_name: tls.server_cert_name.clone(),
            client_cert_name: tls.client_cert_name.clone().filter(|name| !name.is_empty()),
        })
    }
}
