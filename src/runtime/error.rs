//! Bootstrap and serve errors.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

use crate::security::TlsError;

/// Subsystems initialized during bootstrap, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Settings,
    Logging,
    Metrics,
    Persistence,
    Scheduler,
    Cache,
    Security,
    Sessions,
    Render,
    Mail,
    RateLimiter,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::Settings => "settings",
            Subsystem::Logging => "logging",
            Subsystem::Metrics => "metrics",
            Subsystem::Persistence => "persistence",
            Subsystem::Scheduler => "scheduler",
            Subsystem::Cache => "cache",
            Subsystem::Security => "security",
            Subsystem::Sessions => "sessions",
            Subsystem::Render => "render",
            Subsystem::Mail => "mail",
            Subsystem::RateLimiter => "rate limiter",
        };
        f.write_str(name)
    }
}

/// Fatal bootstrap failure. Earlier subsystems are not rolled back.
#[derive(Debug, Error)]
pub enum InitError {
    /// Malformed or missing settings.
    #[error("{subsystem}: invalid configuration: {reason}")]
    Config { subsystem: Subsystem, reason: String },

    /// A backend could not be reached.
    #[error("{subsystem}: connection failed")]
    Connect {
        subsystem: Subsystem,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Unusable certificate material.
    #[error("security: TLS setup failed")]
    Tls(#[from] TlsError),
}

impl InitError {
    pub(crate) fn config(subsystem: Subsystem, reason: impl Into<String>) -> Self {
        InitError::Config {
            subsystem,
            reason: reason.into(),
        }
    }

    pub(crate) fn connect<E>(subsystem: Subsystem, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        InitError::Connect {
            subsystem,
            source: Box::new(source),
        }
    }

    /// The subsystem that failed.
    pub fn subsystem(&self) -> Subsystem {
        match self {
            InitError::Config { subsystem, .. } | InitError::Connect { subsystem, .. } => *subsystem,
            InitError::Tls(_) => Subsystem::Security,
        }
    }
}

/// Failure while running a bootstrapped process.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("entry `{0}` does not serve HTTP")]
    NotServed(crate::runtime::EntryRole),
    #[error("failed to resolve bind address `{0}`")]
    Resolve(String, #[source] io::Error),
    #[error("server failed")]
    Io(#[from] io::Error),
}
