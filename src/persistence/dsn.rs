//! Connection string builder.

use std::path::Path;

use url::Url;

use crate::config::schema::{DatabaseConfig, DatabaseKind};
use crate::persistence::DatabaseError;

/// In-memory SQLite connection string.
pub const SQLITE_MEMORY: &str = "sqlite::memory:";

/// Build the connection string for `config`. SQLite paths resolve against `root`.
pub fn build_dsn(config: &DatabaseConfig, root: &Path) -> Result<String, DatabaseError> {
    let kind = config
        .kind
        .ok_or_else(|| DatabaseError::Dsn("database kind is not set".into()))?;

    match kind {
        DatabaseKind::Sqlite => {
            let name = config.name.trim();
            if name.is_empty() || name == ":memory:" {
                return Ok(SQLITE_MEMORY.to_string());
            }
            let path = root.join(name);
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
        DatabaseKind::Postgres => network_dsn("postgres", "sslmode", config),
        DatabaseKind::Mysql => network_dsn("mysql", "ssl-mode", config),
    }
}

fn network_dsn(scheme: &str, ssl_param: &str, config: &DatabaseConfig) -> Result<String, DatabaseError> {
    let host = config.host.trim();
    if host.is_empty() {
        return Err(DatabaseError::Dsn("database host is not set".into()));
    }
    let mut url = Url::parse(&format!("{scheme}://{host}"))
        .map_err(|err| DatabaseError::Dsn(format!("invalid host `{host}`: {err}")))?;
    let invalid = |what: &str| DatabaseError::Dsn(format!("cannot set {what} on `{host}`"));

    url.set_port(Some(config.port)).map_err(|_| invalid("port"))?;
    if !config.user.is_empty() {
        url.set_username(&config.user).map_err(|_| invalid("user"))?;
    }
    if !config.password.is_empty() {
        url.set_password(Some(&config.password))
            .map_err(|_| invalid("password"))?;
    }
    url.set_path(&config.name);
    if !config.ssl_mode.is_empty() {
        url.query_pairs_mut().append_pair(ssl_param, &config.ssl_mode);
    }
    Ok(url.into())
}
