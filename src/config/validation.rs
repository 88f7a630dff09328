//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check cross-section references (sessions need their backend)
//! - Validate value ranges (ports, pool sizes, ratios)
//! - Reject unknown middleware names and unusable TLS references
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Settings → Result<(), Vec<ValidationError>>
//! - Runs before settings are accepted into the system

use std::collections::HashMap;
use std::fmt;

use crate::config::schema::{
    CacheBackend, EntryConfig, SessionBackend, Settings, TlsStrategy,
};
use crate::http::Middleware;
use crate::scheduler::Cadence;

/// A single semantic problem in the settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human readable reason.
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Validate a settings snapshot.
pub fn validate_settings(settings: &Settings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_entries(settings, &mut errors);
    validate_store(settings, &mut errors);
    validate_cache(settings, &mut errors);
    validate_session(settings, &mut errors);

    if settings.mail.queue_capacity == 0 {
        errors.push(ValidationError::new("mail.queue_capacity", "must be at least 1"));
    }
    if settings.rate_limit.enabled {
        if settings.rate_limit.requests_per_window == 0 {
            errors.push(ValidationError::new(
                "rate_limit.requests_per_window",
                "must be at least 1",
            ));
        }
        if settings.rate_limit.window_secs == 0 {
            errors.push(ValidationError::new("rate_limit.window_secs", "must be at least 1"));
        }
    }
    if settings.uploads.max_upload_size == 0 {
        errors.push(ValidationError::new("uploads.max_upload_size", "must be positive"));
    }
    for (name, secs) in [
        ("timeouts.idle_secs", settings.timeouts.idle_secs),
        ("timeouts.read_secs", settings.timeouts.read_secs),
        ("timeouts.write_secs", settings.timeouts.write_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::new(name, "must be positive"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_entries(settings: &Settings, errors: &mut Vec<ValidationError>) {
    let served = [
        ("web", &settings.entries.web),
        ("api", &settings.entries.api),
        ("rpc", &settings.entries.rpc),
    ];

    // Port 0 asks the OS for an ephemeral port and never collides.
    let mut ports: HashMap<u16, &str> = HashMap::new();
    for (name, entry) in served {
        if entry.enabled && entry.port != 0 {
            if let Some(other) = ports.insert(entry.port, name) {
                errors.push(ValidationError::new(
                    format!("entries.{name}.port"),
                    format!("port {} already used by entry {other}", entry.port),
                ));
            }
        }
        validate_entry(name, entry, errors);
    }

    if let Some(control) = settings.control.port {
        if control == 0 {
            errors.push(ValidationError::new("control.port", "must be a fixed port"));
        } else if let Some(entry) = ports.get(&control) {
            errors.push(ValidationError::new(
                "control.port",
                format!("port {control} collides with entry {entry}"),
            ));
        }
    }
}

fn validate_entry(name: &str, entry: &EntryConfig, errors: &mut Vec<ValidationError>) {
    for middleware in &entry.middlewares {
        if middleware.parse::<Middleware>().is_err() {
            errors.push(ValidationError::new(
                format!("entries.{name}.middlewares"),
                format!("unknown middleware `{middleware}`"),
            ));
        }
    }

    if !entry.security.enabled {
        return;
    }
    let tls = &entry.security.tls;
    let field = |leaf: &str| format!("entries.{name}.security.tls.{leaf}");
    if tls.server_cert_name.trim().is_empty() {
        errors.push(ValidationError::new(field("server_cert_name"), "required when security is enabled"));
    }
    match tls.strategy {
        TlsStrategy::SelfSigned if tls.ca_cert_name.as_deref().is_none_or(str::is_empty) => {
            errors.push(ValidationError::new(field("ca_cert_name"), "required by the `self` strategy"));
        }
        TlsStrategy::LetsEncrypt if tls.mutual => {
            errors.push(ValidationError::new(
                field("mutual"),
                "the `le` strategy has no client trust anchor",
            ));
        }
        _ => {}
    }
}

fn validate_store(settings: &Settings, errors: &mut Vec<ValidationError>) {
    let db = &settings.database;
    if settings.store.enabled && db.kind.is_none() {
        errors.push(ValidationError::new("database.kind", "required when store is enabled"));
    }
    if db.max_open_conns == 0 {
        errors.push(ValidationError::new("database.max_open_conns", "must be at least 1"));
    }
    if db.min_idle_conns > db.max_open_conns {
        errors.push(ValidationError::new(
            "database.min_idle_conns",
            "cannot exceed database.max_open_conns",
        ));
    }
}

fn validate_cache(settings: &Settings, errors: &mut Vec<ValidationError>) {
    let cache = &settings.cache;
    let uses_pool = cache.backend == CacheBackend::Distributed
        || settings.session.backend == SessionBackend::Distributed;
    if uses_pool {
        if cache.redis.address.trim().is_empty() {
            errors.push(ValidationError::new("cache.redis.address", "required"));
        }
        if cache.redis.max_active == 0 {
            errors.push(ValidationError::new("cache.redis.max_active", "must be at least 1"));
        }
        if cache.redis.max_idle > cache.redis.max_active {
            errors.push(ValidationError::new(
                "cache.redis.max_idle",
                "cannot exceed cache.redis.max_active",
            ));
        }
    }
    if cache.backend == CacheBackend::Embedded {
        let ratio = cache.embedded.discard_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            errors.push(ValidationError::new(
                "cache.embedded.discard_ratio",
                "must be between 0 and 1 (exclusive)",
            ));
        }
        if let Err(err) = cache.embedded.compaction_schedule.parse::<Cadence>() {
            errors.push(ValidationError::new("cache.embedded.compaction_schedule", err.to_string()));
        }
        if cache.embedded.path.trim().is_empty() {
            errors.push(ValidationError::new("cache.embedded.path", "required"));
        }
    }
}

fn validate_session(settings: &Settings, errors: &mut Vec<ValidationError>) {
    if settings.session.backend == SessionBackend::Relational
        && !(settings.store.enabled && settings.database.kind.is_some())
    {
        errors.push(ValidationError::new(
            "session.backend",
            "relational sessions require store.enabled and database.kind",
        ));
    }
    if settings.session.cookie.name.trim().is_empty() {
        errors.push(ValidationError::new("session.cookie.name", "required"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DatabaseKind;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_settings(&Settings::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut settings = Settings::default();
        settings.entries.api.port = settings.entries.web.port;
        settings.entries.web.middlewares.push("csrf-magic".into());
        settings.session.backend = SessionBackend::Relational;
        settings.mail.queue_capacity = 0;

        let errors = validate_settings(&settings).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"entries.api.port"));
        assert!(fields.contains(&"entries.web.middlewares"));
        assert!(fields.contains(&"session.backend"));
        assert!(fields.contains(&"mail.queue_capacity"));
    }

    #[test]
    fn control_port_must_not_shadow_entry() {
        let mut settings = Settings::default();
        settings.control.port = Some(settings.entries.web.port);
        let errors = validate_settings(&settings).unwrap_err();
        assert_eq!(errors[0].field, "control.port");
    }

    #[test]
    fn tls_references_are_checked() {
        let mut settings = Settings::default();
        settings.entries.web.security.enabled = true;
        settings.entries.web.security.tls.strategy = TlsStrategy::SelfSigned;

        let errors = validate_settings(&settings).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"entries.web.security.tls.server_cert_name"));
        assert!(fields.contains(&"entries.web.security.tls.ca_cert_name"));

        settings.entries.web.security.tls = Default::default();
        settings.entries.web.security.tls.strategy = TlsStrategy::LetsEncrypt;
        settings.entries.web.security.tls.server_cert_name = "server".into();
        settings.entries.web.security.tls.mutual = true;
        let errors = validate_settings(&settings).unwrap_err();
        assert_eq!(errors[0].field, "entries.web.security.tls.mutual");
    }

    #[test]
    fn embedded_cache_ratio_and_schedule() {
        let mut settings = Settings::default();
        settings.cache.backend = CacheBackend::Embedded;
        settings.cache.embedded.discard_ratio = 1.5;
        settings.cache.embedded.compaction_schedule = "@fortnightly".into();
        let errors = validate_settings(&settings).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn overflowing_schedule_is_a_validation_error() {
        let mut settings = Settings::default();
        settings.cache.backend = CacheBackend::Embedded;
        settings.cache.embedded.compaction_schedule = "@every 6000000000000000h".into();
        let errors = validate_settings(&settings).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "cache.embedded.compaction_schedule");
    }

    #[test]
    fn relational_sessions_accept_enabled_store() {
        let mut settings = Settings::default();
        settings.session.backend = SessionBackend::Relational;
        settings.store.enabled = true;
        settings.database.kind = Some(DatabaseKind::Sqlite);
        assert!(validate_settings(&settings).is_ok());
    }
}
