//! Entry roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The role a process was started in. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    /// Server-rendered HTML with sessions.
    Web,
    /// JSON API (`api`, `api/rest`).
    Api,
    /// RPC-style API (`rpc`, `api/rpc`).
    Rpc,
    /// Background jobs only.
    Worker,
    /// One-shot command line tooling.
    Cli,
}

impl EntryRole {
    pub const ALL: [EntryRole; 5] = [
        EntryRole::Web,
        EntryRole::Api,
        EntryRole::Rpc,
        EntryRole::Worker,
        EntryRole::Cli,
    ];

    /// Whether this role binds a primary server.
    pub fn serves_http(self) -> bool {
        matches!(self, EntryRole::Web | EntryRole::Api | EntryRole::Rpc)
    }

    /// Whether this role may open a database pool.
    pub fn needs_persistence(self) -> bool {
        !matches!(self, EntryRole::Cli)
    }

    /// Whether this role carries a session store.
    pub fn uses_sessions(self) -> bool {
        matches!(self, EntryRole::Web)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryRole::Web => "web",
            EntryRole::Api => "api",
            EntryRole::Rpc => "rpc",
            EntryRole::Worker => "worker",
            EntryRole::Cli => "cli",
        }
    }
}

impl fmt::Display for EntryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an entry string names no known role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entry `{0}` (expected web, api, rpc, worker or cli)")]
pub struct UnknownEntry(pub String);

impl FromStr for EntryRole {
    type Err = UnknownEntry;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(EntryRole::Web),
            "api" | "api/rest" | "rest" => Ok(EntryRole::Api),
            "rpc" | "api/rpc" => Ok(EntryRole::Rpc),
            "worker" => Ok(EntryRole::Worker),
            "cli" => Ok(EntryRole::Cli),
            _ => Err(UnknownEntry(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("api/rest".parse::<EntryRole>().unwrap(), EntryRole::Api);
        assert_eq!("API/RPC".parse::<EntryRole>().unwrap(), EntryRole::Rpc);
        assert_eq!(" web ".parse::<EntryRole>().unwrap(), EntryRole::Web);
        assert!("daemon".parse::<EntryRole>().is_err());
    }

    #[test]
    fn activation_table() {
        for role in EntryRole::ALL {
            assert_eq!(role.needs_persistence(), role != EntryRole::Cli);
            assert_eq!(role.uses_sessions(), role == EntryRole::Web);
            assert_eq!(
                role.serves_http(),
                !matches!(role, EntryRole::Worker | EntryRole::Cli)
            );
        }
    }
}
